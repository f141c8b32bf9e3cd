//! Remote commands
//!
//! A command is validated against the vehicle's capabilities, submitted,
//! and then followed by polling its event until the backend reports
//! `EXECUTED` or `ERROR`:
//!
//! ```text
//! submit -> INITIATED -> PENDING -> DELIVERED -> EXECUTED
//!                                            \-> ERROR
//! ```
//!
//! Charging commands the vehicle cannot act on in its current state end as
//! `IGNORED` without a request.

mod command;
mod dispatcher;
mod position;
mod profile;

pub use command::{
    Capabilities, ChargingSettings, CommandEvent, CommandStatus, RemoteCommand,
    EVENT_POSITION_PATH, EVENT_STATUS_PATH,
};
pub use dispatcher::{PollInterval, RemoteDispatcher, WaitOptions};
pub use position::{GpsPosition, PointOfInterest, VehiclePosition, DEFAULT_POI_NAME};
pub use profile::{ChargingMode, ChargingProfileUpdate};
