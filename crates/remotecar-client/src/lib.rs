//! Remotecar Client Library
//!
//! Async client for a connected-vehicle cloud: login per region, vehicle
//! state and remote commands.
//!
//! # Example
//!
//! ```rust,no_run
//! use remotecar_client::{Account, Region, RemoteCommand};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let account = Account::new("user@example.com", "secret", Region::RestOfWorld).await?;
//!     account.set_captcha_token(Some("<captcha token>".into()));
//!     let cancel = CancellationToken::new();
//!
//!     for vehicle in account.get_vehicles(false, &cancel).await? {
//!         println!("{} {:?}", vehicle.vin, vehicle.model);
//!     }
//!
//!     let event = account
//!         .execute("WBA00000000000001", &RemoteCommand::LightFlash, None, &cancel)
//!         .await?;
//!     println!("{}", event.status);
//!     Ok(())
//! }
//! ```
//!
//! # Concurrency
//!
//! An [`Account`] can be shared between tasks. Concurrent requests that find
//! the session expired share a single refresh (see [`SessionManager`]).
//! Every long-running operation takes a `CancellationToken`.
//!
//! # Testing
//!
//! The `testing` module provides an in-memory transport and an authenticator
//! that needs no backend, plus an axum-based [`testing::TestServer`]:
//!
//! ```rust,ignore
//! use remotecar_client::testing::TestServer;
//!
//! let server = TestServer::start(mock_backend()).await?;
//! let config = ClientConfig::default().with_endpoints(server.endpoints());
//! ```

mod account;
pub mod anonymize;
pub mod auth;
mod config;
mod error;
pub mod pipeline;
mod region;
pub mod remote;
mod session;
pub mod store;
pub mod testing;
pub mod transport;
mod vehicle;

pub use account::{
    Account, AccountBuilder, Login, CHARGING_SETTINGS_PATH, VEHICLES_PATH, VEHICLE_STATE_PATH,
};
pub use anonymize::{anonymize_json, AnonymizedResponse};
pub use auth::{Authenticator, Credentials, Grant, OAuthAuthenticator, SessionManager};
pub use config::{ClientConfig, PollingConfig, RetryConfig, SessionConfig, TimeoutsConfig};
pub use error::{ClientError, Result};
pub use pipeline::{ApiPipeline, ApiRequest, RetryPolicy};
pub use region::{valid_regions, CaptchaProvider, Region, RegionEndpoints};
pub use remote::{
    Capabilities, ChargingMode, ChargingProfileUpdate, ChargingSettings, CommandEvent,
    CommandStatus, GpsPosition, PointOfInterest, PollInterval, RemoteCommand, RemoteDispatcher,
    VehiclePosition, WaitOptions,
};
pub use session::{Session, DEFAULT_REFRESH_MARGIN};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
pub use vehicle::{Brand, Vehicle};
