//! Account aggregate: login, vehicle list and remote commands

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::anonymize::{AnonymizedResponse, ResponseRecorder};
use crate::auth::{Authenticator, Credentials, OAuthAuthenticator, SessionManager};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::pipeline::{ApiPipeline, ApiRequest};
use crate::region::Region;
use crate::remote::{CommandEvent, GpsPosition, RemoteCommand, RemoteDispatcher, WaitOptions};
use crate::session::Session;
use crate::store::{MemoryTokenStore, TokenStore};
use crate::transport::{ReqwestTransport, Transport};
use crate::vehicle::{Brand, Vehicle};

pub const VEHICLES_PATH: &str = "/eadrax-vcs/v4/vehicles";
pub const VEHICLE_STATE_PATH: &str = "/eadrax-vcs/v4/vehicles/state";
pub const CHARGING_SETTINGS_PATH: &str = "/eadrax-crccs/v2/vehicles";

/// Store key of accounts that are only known by a refresh token
const DEFAULT_ACCOUNT_KEY: &str = "default";

/// How an account logs in
#[derive(Debug, Clone)]
pub enum Login {
    /// Username and password, with refresh tokens used once available
    Credentials(Credentials),
    /// A refresh token obtained elsewhere. Fails once the token is revoked.
    RefreshToken {
        refresh_token: String,
        gcid: Option<String>,
    },
}

impl From<Credentials> for Login {
    fn from(credentials: Credentials) -> Self {
        Login::Credentials(credentials)
    }
}

/// Builder for [`Account`]
pub struct AccountBuilder {
    login: Login,
    region: Region,
    config: ClientConfig,
    account_key: Option<String>,
    captcha_token: Option<String>,
    store: Option<Arc<dyn TokenStore>>,
    transport: Option<Arc<dyn Transport>>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl AccountBuilder {
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Key the session is stored under (default: the username)
    pub fn account_key(mut self, key: impl Into<String>) -> Self {
        self.account_key = Some(key.into());
        self
    }

    /// Captcha token for the first password login
    pub fn captcha_token(mut self, token: impl Into<String>) -> Self {
        self.captcha_token = Some(token.into());
        self
    }

    pub fn token_store(mut self, store: Arc<dyn TokenStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Wire up the account and restore a stored session.
    ///
    /// Nothing is sent to the backend; the first request logs in.
    pub async fn build(self) -> Result<Account> {
        self.config.validate()?;

        let endpoints = Arc::new(
            self.config
                .endpoints
                .clone()
                .unwrap_or_else(|| self.region.endpoints()),
        );
        let policy = self.config.retry_policy();

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config.timeouts)?),
        };
        let authenticator: Arc<dyn Authenticator> = match self.authenticator {
            Some(authenticator) => authenticator,
            None => Arc::new(OAuthAuthenticator::new(
                transport.clone(),
                endpoints.clone(),
                policy.clone(),
            )),
        };
        let store: Arc<dyn TokenStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryTokenStore::new()),
        };

        let (credentials, refresh) = match self.login {
            Login::Credentials(credentials) => (Some(credentials), None),
            Login::RefreshToken {
                refresh_token,
                gcid,
            } => (None, Some((refresh_token, gcid))),
        };
        let account_key = self
            .account_key
            .or_else(|| credentials.as_ref().map(|c| c.username.clone()))
            .unwrap_or_else(|| DEFAULT_ACCOUNT_KEY.to_string());

        let sessions = Arc::new(SessionManager::new(
            account_key,
            self.region,
            authenticator,
            store,
            credentials,
            self.config.session.refresh_margin(),
        ));
        if let Err(e) = sessions.restore().await {
            warn!(error = %e, "Unable to restore stored session");
        }
        // A restored session that already carries this refresh token stays usable
        if let Some((refresh_token, gcid)) = refresh {
            if sessions.refresh_token().as_deref() != Some(refresh_token.as_str()) {
                sessions.set_refresh_token(refresh_token, gcid);
            }
        }
        sessions.set_captcha_token(self.captcha_token);

        let recorder = self
            .config
            .log_responses
            .then(|| Arc::new(ResponseRecorder::default()));
        let mut pipeline = ApiPipeline::new(
            transport,
            sessions.clone(),
            endpoints,
            self.region,
            policy,
        );
        if let Some(recorder) = &recorder {
            pipeline = pipeline.with_recorder(recorder.clone());
        }
        let pipeline = Arc::new(pipeline);
        let remote = RemoteDispatcher::new(pipeline.clone(), self.config.polling.wait_options());
        remote.set_observer_position(self.config.observer_position);

        Ok(Account {
            region: self.region,
            sessions,
            remote,
            pipeline,
            recorder,
            vehicles: RwLock::new(Vec::new()),
        })
    }
}

/// One account of the vehicle cloud and its vehicles
pub struct Account {
    region: Region,
    sessions: Arc<SessionManager>,
    pipeline: Arc<ApiPipeline>,
    remote: RemoteDispatcher,
    recorder: Option<Arc<ResponseRecorder>>,
    vehicles: RwLock<Vec<Vehicle>>,
}

impl Account {
    /// Start building an account that logs in with `login`
    pub fn builder(login: impl Into<Login>, region: Region) -> AccountBuilder {
        AccountBuilder {
            login: login.into(),
            region,
            config: ClientConfig::default(),
            account_key: None,
            captcha_token: None,
            store: None,
            transport: None,
            authenticator: None,
        }
    }

    /// Account with default configuration talking to the region's backend
    pub async fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        region: Region,
    ) -> Result<Self> {
        Self::builder(Credentials::new(username, password), region)
            .build()
            .await
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Establish a session now instead of on the first request
    #[instrument(skip(self, cancel), fields(region = %self.region))]
    pub async fn login(&self, cancel: &CancellationToken) -> Result<Session> {
        self.sessions.valid_session(cancel).await
    }

    /// Fetch the vehicle list (once, or again with `force_init`) and the
    /// current state of every vehicle.
    ///
    /// States are fetched concurrently. A vehicle whose state cannot be
    /// fetched keeps its previous state; authentication and quota failures
    /// abort the whole fetch, and so does a failure of every vehicle.
    #[instrument(skip(self, cancel))]
    pub async fn get_vehicles(
        &self,
        force_init: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vehicle>> {
        if force_init || self.vehicles.read().is_empty() {
            let listed = self.list_vehicles(cancel).await?;
            let mut vehicles = self.vehicles.write();
            if force_init {
                vehicles.clear();
            }
            for vehicle in listed {
                if !vehicles.iter().any(|v| v.vin.eq_ignore_ascii_case(&vehicle.vin)) {
                    vehicles.push(vehicle);
                }
            }
        }

        let current = self.vehicles.read().clone();
        if current.is_empty() {
            info!("No vehicles registered for this account");
            return Ok(current);
        }

        let fetched_at = Utc::now().trunc_subsecs(0);
        let results = join_all(
            current
                .iter()
                .map(|vehicle| self.fetch_state(vehicle.clone(), fetched_at, cancel)),
        )
        .await;

        let total = results.len();
        let mut failures = 0;
        let mut last_error = None;
        let mut updated = Vec::with_capacity(total);
        for (previous, result) in current.into_iter().zip(results) {
            match result {
                Ok(vehicle) => updated.push(vehicle),
                Err(err) if err.is_account_wide() => return Err(err),
                Err(err) => {
                    warn!(vin = %previous.vin, error = %err, "Unable to get details for vehicle");
                    failures += 1;
                    last_error = Some(err);
                    updated.push(previous);
                }
            }
        }
        if failures == total {
            if let Some(err) = last_error {
                return Err(err);
            }
        }

        info!(vehicles = total, failures, "Vehicle states updated");
        *self.vehicles.write() = updated.clone();
        Ok(updated)
    }

    async fn list_vehicles(&self, cancel: &CancellationToken) -> Result<Vec<Vehicle>> {
        let mut vehicles: Vec<Vehicle> = Vec::new();
        for brand in Brand::all() {
            let request = ApiRequest::get(VEHICLES_PATH)
                .query("apptimezone", 0)
                .query("appDateTime", Utc::now().timestamp_millis())
                .brand(brand);
            let response: Value = self.pipeline.get_json(request, cancel).await?;

            let entries = match response {
                Value::Array(entries) => entries,
                Value::Object(mut map) => match map.remove("mappingInfos") {
                    Some(Value::Array(entries)) => entries,
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            debug!(%brand, count = entries.len(), "Vehicle list received");

            for entry in &entries {
                let vehicle = Vehicle::from_list_entry(entry, brand)?;
                if !vehicles.iter().any(|v| v.vin == vehicle.vin) {
                    vehicles.push(vehicle);
                }
            }
        }
        Ok(vehicles)
    }

    async fn fetch_state(
        &self,
        mut vehicle: Vehicle,
        fetched_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vehicle> {
        let request = ApiRequest::get(VEHICLE_STATE_PATH)
            .query("apptimezone", 0)
            .query("appDateTime", fetched_at.timestamp_millis())
            .header("bmw-vin", vehicle.vin.clone())
            .brand(vehicle.brand);
        let state: Value = self.pipeline.get_json(request, cancel).await?;
        vehicle.apply_state(state, fetched_at);

        if vehicle.has_charging_settings() {
            let request = ApiRequest::get(CHARGING_SETTINGS_PATH)
                .query("fields", "charging-profile")
                .query(
                    "has_charging_settings_capabilities",
                    vehicle.capabilities.charging_settings,
                )
                .header("bmw-vin", vehicle.vin.clone())
                .header("bmw-current-date", fetched_at.to_rfc3339())
                .brand(vehicle.brand);
            let settings: Value = self.pipeline.get_json(request, cancel).await?;
            vehicle.apply_charging_settings(settings);
        }
        Ok(vehicle)
    }

    /// Cached vehicles in list order
    pub fn vehicles(&self) -> Vec<Vehicle> {
        self.vehicles.read().clone()
    }

    /// Cached vehicle by VIN, ignoring case
    pub fn get_vehicle(&self, vin: &str) -> Option<Vehicle> {
        self.vehicles
            .read()
            .iter()
            .find(|v| v.vin.eq_ignore_ascii_case(vin))
            .cloned()
    }

    /// Cached vehicle by VIN, fetching the vehicle list first when nothing is
    /// cached yet
    pub async fn vehicle(&self, vin: &str, cancel: &CancellationToken) -> Result<Vehicle> {
        if self.vehicles.read().is_empty() {
            self.get_vehicles(false, cancel).await?;
        }
        self.get_vehicle(vin)
            .ok_or_else(|| ClientError::VehicleNotFound(vin.to_string()))
    }

    /// Dispatcher for remote commands of this account
    pub fn remote(&self) -> &RemoteDispatcher {
        &self.remote
    }

    /// Run a remote command on a vehicle and wait for its final status.
    ///
    /// `options` defaults to the polling section of the configuration. A
    /// position found by the vehicle finder is kept on the cached vehicle.
    #[instrument(skip(self, options, cancel), fields(command = %command))]
    pub async fn execute(
        &self,
        vin: &str,
        command: &RemoteCommand,
        options: Option<&WaitOptions>,
        cancel: &CancellationToken,
    ) -> Result<CommandEvent> {
        let vehicle = self.vehicle(vin, cancel).await?;
        let event = self.remote.execute(&vehicle, command, options, cancel).await?;
        if let Some(position) = &event.position {
            if let Some(cached) = self
                .vehicles
                .write()
                .iter_mut()
                .find(|v| v.vin == vehicle.vin)
            {
                cached.finder_position = Some(position.clone());
            }
        }
        Ok(event)
    }

    /// Observer position used to locate vehicles with the vehicle finder
    pub fn set_observer_position(&self, position: Option<GpsPosition>) {
        self.remote.set_observer_position(position);
    }

    pub fn session(&self) -> Option<Session> {
        self.sessions.session()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.sessions.refresh_token()
    }

    pub fn gcid(&self) -> Option<String> {
        self.sessions.gcid()
    }

    /// Replace the refresh token (and GCID, if given) used for the next login
    pub fn set_refresh_token(&self, refresh_token: impl Into<String>, gcid: Option<String>) {
        self.sessions.set_refresh_token(refresh_token, gcid);
    }

    /// Captcha token for the next password login
    pub fn set_captcha_token(&self, token: Option<String>) {
        self.sessions.set_captcha_token(token);
    }

    /// Anonymized copies of the latest responses, if `log_responses` is on
    pub fn stored_responses(&self) -> Vec<AnonymizedResponse> {
        self.recorder
            .as_ref()
            .map(|r| r.responses())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("region", &self.region)
            .field("sessions", &self.sessions)
            .field("vehicles", &self.vehicles.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::region::{CaptchaProvider, RegionEndpoints};
    use crate::remote::CommandStatus;
    use crate::testing::{MockTransport, StaticAuthenticator};
    use crate::transport::HttpResponse;
    use serde_json::json;

    const VIN_1: &str = "WBA00000000000001";
    const VIN_2: &str = "WMW00000000000002";

    fn config() -> ClientConfig {
        ClientConfig::default()
            .with_endpoints(RegionEndpoints::local(
                MockTransport::BASE_URL,
                CaptchaProvider::ReCaptcha,
            ))
            .with_retry(RetryConfig {
                max_retries: 0,
                ..RetryConfig::default()
            })
    }

    async fn account(transport: Arc<MockTransport>, auth: Arc<StaticAuthenticator>) -> Account {
        Account::builder(
            Login::RefreshToken {
                refresh_token: "refresh-0".into(),
                gcid: None,
            },
            Region::RestOfWorld,
        )
        .config(config().with_log_responses(true))
        .transport(transport)
        .authenticator(auth)
        .build()
        .await
        .unwrap()
    }

    fn backend() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.on("GET", VEHICLES_PATH, |req| {
            let brand = req.header_value("x-user-agent").unwrap_or_default();
            if brand.contains(";mini;") {
                HttpResponse::json_body(200, &json!([{"vin": VIN_2, "attributes": {"model": "Cooper SE"}}]))
            } else {
                HttpResponse::json_body(200, &json!([{"vin": VIN_1, "attributes": {"model": "i4"}}]))
            }
        });
        transport.on("GET", VEHICLE_STATE_PATH, |req| {
            let vin = req.header_value("bmw-vin").unwrap_or_default();
            HttpResponse::json_body(
                200,
                &json!({
                    "state": {"vin": vin, "mileage": 1234},
                    "capabilities": {"lock": true, "unlock": true}
                }),
            )
        });
        transport
    }

    #[tokio::test]
    async fn test_get_vehicles_lists_all_brands() {
        let transport = backend();
        let auth = Arc::new(StaticAuthenticator::new());
        let account = account(transport.clone(), auth.clone()).await;
        let cancel = CancellationToken::new();

        let vehicles = account.get_vehicles(false, &cancel).await.unwrap();

        assert_eq!(vehicles.len(), 2);
        assert_eq!(vehicles[0].vin, VIN_1);
        assert_eq!(vehicles[1].brand, Brand::Mini);
        assert_eq!(vehicles[1].state["vin"], json!(VIN_2));
        assert!(vehicles.iter().all(|v| v.has_state()));
        assert_eq!(transport.calls("GET", VEHICLES_PATH), 2);
        assert_eq!(transport.calls("GET", VEHICLE_STATE_PATH), 2);
        assert_eq!(auth.calls(), 1);

        // The list is only fetched again on request
        account.get_vehicles(false, &cancel).await.unwrap();
        assert_eq!(transport.calls("GET", VEHICLES_PATH), 2);
        account.get_vehicles(true, &cancel).await.unwrap();
        assert_eq!(transport.calls("GET", VEHICLES_PATH), 4);
        assert_eq!(account.vehicles().len(), 2);
    }

    #[tokio::test]
    async fn test_get_vehicle_ignores_case() {
        let account = account(backend(), Arc::new(StaticAuthenticator::new())).await;
        account
            .get_vehicles(false, &CancellationToken::new())
            .await
            .unwrap();

        let vehicle = account.get_vehicle(&VIN_1.to_lowercase()).unwrap();
        assert_eq!(vehicle.vin, VIN_1);
        assert!(account.get_vehicle("WBA99999999999999").is_none());
    }

    #[tokio::test]
    async fn test_one_failing_vehicle_is_skipped() {
        let transport = backend();
        transport.on("GET", VEHICLE_STATE_PATH, |req| {
            if req.header_value("bmw-vin") == Some(VIN_2) {
                HttpResponse::new(404, "state unavailable")
            } else {
                HttpResponse::json_body(200, &json!({"state": {}, "capabilities": {}}))
            }
        });
        let account = account(transport, Arc::new(StaticAuthenticator::new())).await;

        let vehicles = account
            .get_vehicles(false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(vehicles.len(), 2);
        assert!(vehicles[0].has_state());
        assert!(!vehicles[1].has_state());
    }

    #[tokio::test]
    async fn test_all_vehicles_failing_returns_last_error() {
        let transport = backend();
        transport.on("GET", VEHICLE_STATE_PATH, |_| HttpResponse::new(404, "gone"));
        let account = account(transport, Arc::new(StaticAuthenticator::new())).await;

        let err = account
            .get_vehicles(false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::Api { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_quota_aborts_fetch() {
        let transport = backend();
        transport.on("GET", VEHICLE_STATE_PATH, |req| {
            if req.header_value("bmw-vin") == Some(VIN_1) {
                HttpResponse::new(403, "Out of call volume quota")
            } else {
                HttpResponse::json_body(200, &json!({"state": {}, "capabilities": {}}))
            }
        });
        let account = account(transport, Arc::new(StaticAuthenticator::new())).await;

        let err = account
            .get_vehicles(false, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::QuotaExceeded(_)));
        assert!(!account.vehicles().iter().any(Vehicle::has_state));
    }

    #[tokio::test]
    async fn test_charging_settings_are_fetched_when_supported() {
        let transport = backend();
        transport.on("GET", VEHICLE_STATE_PATH, |_| {
            HttpResponse::json_body(
                200,
                &json!({"state": {}, "capabilities": {"isChargingSettingsEnabled": true}}),
            )
        });
        transport.on("GET", CHARGING_SETTINGS_PATH, |req| {
            assert_eq!(req.query_value("fields").as_deref(), Some("charging-profile"));
            assert!(req.header_value("bmw-current-date").is_some());
            HttpResponse::json_body(
                200,
                &json!({"chargingSettingsDetail": {"acLimit": {"values": [6, 16, 32]}}}),
            )
        });
        let account = account(transport.clone(), Arc::new(StaticAuthenticator::new())).await;

        let vehicles = account
            .get_vehicles(false, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(transport.calls("GET", CHARGING_SETTINGS_PATH), 2);
        assert_eq!(vehicles[0].capabilities.ac_limits, vec![6, 16, 32]);
    }

    #[tokio::test]
    async fn test_execute_looks_up_vehicle() {
        let transport = backend();
        transport.on("POST", &RemoteCommand::DoorLock.endpoint(VIN_1), |_| {
            HttpResponse::json_body(200, &json!({}))
        });
        let account = account(transport.clone(), Arc::new(StaticAuthenticator::new())).await;
        let cancel = CancellationToken::new();

        let event = account
            .execute(VIN_1, &RemoteCommand::DoorLock, None, &cancel)
            .await
            .unwrap();
        assert_eq!(event.status, CommandStatus::Executed);
        assert_eq!(transport.calls("GET", VEHICLES_PATH), 2);

        let err = account
            .execute("WBA99999999999999", &RemoteCommand::DoorLock, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::VehicleNotFound(_)));

        let err = account
            .execute(VIN_1, &RemoteCommand::Horn, None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::UnsupportedCommand { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_vehicle_finder_position_is_cached() {
        let transport = backend();
        transport.on("GET", VEHICLE_STATE_PATH, |_| {
            HttpResponse::json_body(200, &json!({"state": {}, "capabilities": {"vehicleFinder": true}}))
        });
        transport.on("POST", &RemoteCommand::VehicleFinder.endpoint(VIN_1), |_| {
            HttpResponse::json_body(200, &json!({"eventId": "event-1"}))
        });
        transport.on("POST", crate::remote::EVENT_STATUS_PATH, |_| {
            HttpResponse::json_body(200, &json!({"eventStatus": "EXECUTED"}))
        });
        transport.on("POST", crate::remote::EVENT_POSITION_PATH, |_| {
            HttpResponse::json_body(
                200,
                &json!({"positionData": {"position": {"latitude": 1.5, "longitude": 2.5}}}),
            )
        });
        let account = account(transport, Arc::new(StaticAuthenticator::new())).await;
        let cancel = CancellationToken::new();

        let event = account
            .execute(VIN_1, &RemoteCommand::VehicleFinder, None, &cancel)
            .await
            .unwrap();
        assert!(event.position.is_none());

        account.set_observer_position(Some(GpsPosition::new(1.0, 2.0).unwrap()));
        let event = account
            .execute(VIN_1, &RemoteCommand::VehicleFinder, None, &cancel)
            .await
            .unwrap();
        assert_eq!(event.position.as_ref().map(|p| p.latitude), Some(1.5));
        let cached = account.get_vehicle(VIN_1).unwrap();
        assert_eq!(cached.finder_position.map(|p| p.longitude), Some(2.5));
    }

    #[tokio::test]
    async fn test_responses_are_recorded_anonymized() {
        let account = account(backend(), Arc::new(StaticAuthenticator::new())).await;
        account
            .get_vehicles(false, &CancellationToken::new())
            .await
            .unwrap();

        let responses = account.stored_responses();
        assert_eq!(responses.len(), 4);
        assert_eq!(responses[0].filename, "bmw-eadrax-vcs_v4_vehicles.json");
        assert_eq!(responses[0].content[0]["vin"], json!("WBA0FINGERPRINT01"));
    }

    #[tokio::test]
    async fn test_restored_session_is_kept_for_same_refresh_token() {
        let store = Arc::new(MemoryTokenStore::new());
        let stored = Session::issued(
            "access-stored",
            "refresh-0",
            3600,
            Utc::now(),
            Region::RestOfWorld,
        );
        store.save(DEFAULT_ACCOUNT_KEY, &stored).await.unwrap();
        let auth = Arc::new(StaticAuthenticator::new());

        let account = Account::builder(
            Login::RefreshToken {
                refresh_token: "refresh-0".into(),
                gcid: None,
            },
            Region::RestOfWorld,
        )
        .config(config())
        .transport(backend())
        .authenticator(auth.clone())
        .token_store(store)
        .build()
        .await
        .unwrap();

        let session = account.login(&CancellationToken::new()).await.unwrap();
        assert_eq!(session.access_token, "access-stored");
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_token_accessors() {
        let account = account(backend(), Arc::new(StaticAuthenticator::new())).await;
        assert_eq!(account.refresh_token().as_deref(), Some("refresh-0"));

        account.login(&CancellationToken::new()).await.unwrap();
        assert_eq!(account.refresh_token().as_deref(), Some("refresh-1"));

        account.set_refresh_token("external", Some("gcid-9".into()));
        assert_eq!(account.refresh_token().as_deref(), Some("external"));
        assert_eq!(account.gcid().as_deref(), Some("gcid-9"));
    }
}
