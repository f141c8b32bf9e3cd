//! Remote command submission and status polling

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::command::{
    CommandEvent, CommandStatus, RemoteCommand, EVENT_POSITION_PATH, EVENT_STATUS_PATH,
};
use super::position::{GpsPosition, VehiclePosition};
use crate::error::{ClientError, Result};
use crate::pipeline::{sleep_or_cancel, ApiPipeline, ApiRequest};
use crate::vehicle::{Brand, Vehicle};

/// Time between status polls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollInterval {
    Fixed(Duration),
    /// Starts at `initial` and doubles after every poll up to `max`
    Exponential { initial: Duration, max: Duration },
}

impl PollInterval {
    /// Interval after `polls` status requests
    pub fn after(&self, polls: u32) -> Duration {
        match *self {
            PollInterval::Fixed(interval) => interval,
            PollInterval::Exponential { initial, max } => {
                let factor = 2u32.saturating_pow(polls.saturating_sub(1));
                initial.checked_mul(factor).unwrap_or(max).min(max)
            }
        }
    }
}

/// How long and how often to poll for a final status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    pub timeout: Duration,
    pub poll_interval: PollInterval,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(240),
            poll_interval: PollInterval::Fixed(Duration::from_secs(3)),
        }
    }
}

impl WaitOptions {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval: PollInterval::Fixed(poll_interval),
        }
    }
}

/// Submits remote commands and follows them to a final status
#[derive(Debug, Clone)]
pub struct RemoteDispatcher {
    pipeline: Arc<ApiPipeline>,
    defaults: WaitOptions,
    /// Position the vehicle finder reports relative to
    observer: Arc<RwLock<Option<GpsPosition>>>,
}

impl RemoteDispatcher {
    /// Create a new dispatcher
    pub fn new(pipeline: Arc<ApiPipeline>, defaults: WaitOptions) -> Self {
        Self {
            pipeline,
            defaults,
            observer: Arc::new(RwLock::new(None)),
        }
    }

    /// Wait options used by [`execute`](Self::execute) when none are given
    pub fn default_wait_options(&self) -> WaitOptions {
        self.defaults
    }

    /// Observer position sent with vehicle finder position requests.
    ///
    /// Without one the vehicle finder still runs but reports no position.
    pub fn set_observer_position(&self, position: Option<GpsPosition>) {
        *self.observer.write() = position;
    }

    pub fn observer_position(&self) -> Option<GpsPosition> {
        *self.observer.read()
    }

    /// Submit a command.
    ///
    /// The command is checked against the vehicle's capabilities before any
    /// request is sent. A charge start or stop the vehicle's last state rules
    /// out ends as `IGNORED` without a request. A response without an event
    /// id means the backend executed the command synchronously.
    #[instrument(skip(self, vehicle, cancel), fields(vin = %vehicle.vin, command = %command))]
    pub async fn submit(
        &self,
        vehicle: &Vehicle,
        command: &RemoteCommand,
        cancel: &CancellationToken,
    ) -> Result<CommandEvent> {
        vehicle.capabilities.check(command, &vehicle.vin)?;

        let submitted_at = Utc::now();
        let event = |event_id: Option<String>, status: CommandStatus| CommandEvent {
            event_id,
            vin: vehicle.vin.clone(),
            brand: vehicle.brand,
            command: command.clone(),
            submitted_at,
            status,
            poll_count: 0,
            details: None,
            position: None,
        };

        if let Some(reason) = ignore_reason(command, vehicle) {
            warn!(reason, "Remote command ignored");
            return Ok(event(None, CommandStatus::Ignored));
        }

        let mut request = ApiRequest::post(command.endpoint(&vehicle.vin)).brand(vehicle.brand);
        for (name, value) in command.query() {
            request = request.query(name, value);
        }
        if let Some(body) = command.payload(vehicle)? {
            request = request.json(body);
        }

        let response: Value = self.pipeline.post_json(request, cancel).await?;
        let event_id = response
            .get("eventId")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let status = match &event_id {
            Some(id) => {
                info!(event_id = %id, "Remote command submitted");
                CommandStatus::Initiated
            }
            None => {
                info!("Remote command executed without event");
                CommandStatus::Executed
            }
        };
        Ok(event(event_id, status))
    }

    /// Fetch the current status of an event submitted for a `brand` vehicle
    pub async fn poll(
        &self,
        event_id: &str,
        brand: Brand,
        cancel: &CancellationToken,
    ) -> Result<CommandStatus> {
        Ok(self.poll_details(event_id, brand, cancel).await?.0)
    }

    async fn poll_details(
        &self,
        event_id: &str,
        brand: Brand,
        cancel: &CancellationToken,
    ) -> Result<(CommandStatus, Value)> {
        let request = ApiRequest::post(EVENT_STATUS_PATH)
            .query("eventId", event_id)
            .brand(brand);
        let response: Value = self.pipeline.post_json(request, cancel).await?;
        let status = response
            .get("eventStatus")
            .and_then(Value::as_str)
            .map(CommandStatus::parse)
            .unwrap_or_else(|| CommandStatus::Unrecognized("UNKNOWN".into()));
        Ok((status, response))
    }

    /// Poll until the event reaches `EXECUTED`, `ERROR` or `IGNORED`.
    ///
    /// `ERROR` is returned as a status, not as an error. Without a final
    /// status before `options.timeout` the result is `CommandTimeout`; the
    /// command may still complete server-side. The timeout also bounds a
    /// status request that is still retrying.
    pub async fn wait(
        &self,
        event_id: &str,
        brand: Brand,
        options: &WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<CommandStatus> {
        let mut polls = 0;
        let (status, _) = self
            .track(event_id, brand, options, cancel, &mut polls)
            .await?;
        Ok(status)
    }

    /// Follow a submitted event, updating its status, poll count and details
    pub async fn wait_event(
        &self,
        event: &mut CommandEvent,
        options: &WaitOptions,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let Some(event_id) = event.event_id.clone() else {
            return Ok(());
        };
        let mut polls = event.poll_count;
        let result = self
            .track(&event_id, event.brand, options, cancel, &mut polls)
            .await;
        event.poll_count = polls;
        let (status, details) = result?;
        event.status = status;
        event.details = Some(details);
        Ok(())
    }

    #[instrument(skip(self, options, cancel, polls))]
    async fn track(
        &self,
        event_id: &str,
        brand: Brand,
        options: &WaitOptions,
        cancel: &CancellationToken,
        polls: &mut u32,
    ) -> Result<(CommandStatus, Value)> {
        let started = Instant::now();
        let deadline = started + options.timeout;
        let mut last_status = CommandStatus::Initiated;
        let timed_out = |last_status: CommandStatus| ClientError::CommandTimeout {
            event_id: event_id.to_string(),
            waited: started.elapsed(),
            last_status,
        };

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let polled = match timeout(remaining, self.poll_details(event_id, brand, cancel)).await
            {
                Ok(polled) => polled,
                Err(_) => return Err(timed_out(last_status)),
            };
            *polls += 1;

            match polled {
                Ok((status, details)) => {
                    match &status {
                        CommandStatus::Unrecognized(raw) => {
                            warn!(event_id, status = %raw, poll = *polls, "Unrecognized command status")
                        }
                        _ => debug!(event_id, %status, poll = *polls, "Command status"),
                    }
                    if status.is_terminal() {
                        return Ok((status, details));
                    }
                    last_status = status;
                }
                // The deadline decides when to give up on a flaky status endpoint
                Err(err @ ClientError::Transient { .. }) => {
                    warn!(event_id, error = %err, poll = *polls, "Status poll failed")
                }
                Err(err) => return Err(err),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out(last_status));
            }

            let delay = options.poll_interval.after(*polls).min(deadline - now);
            sleep_or_cancel(delay, cancel).await?;
        }
    }

    /// Position the vehicle finder reported for `event_id`.
    ///
    /// Needs an observer position; `None` without one or when the backend
    /// has no position for the event.
    pub async fn event_position(
        &self,
        event_id: &str,
        brand: Brand,
        cancel: &CancellationToken,
    ) -> Result<Option<VehiclePosition>> {
        let Some(observer) = self.observer_position() else {
            warn!(
                event_id,
                "Unknown position: set an observer position to retrieve vehicle coordinates"
            );
            return Ok(None);
        };
        let request = ApiRequest::post(EVENT_POSITION_PATH)
            .query("eventId", event_id)
            .header("latitude", observer.latitude.to_string())
            .header("longitude", observer.longitude.to_string())
            .brand(brand);
        let response: Value = self.pipeline.post_json(request, cancel).await?;
        match VehiclePosition::from_event_response(&response, Utc::now()) {
            Ok(position) => Ok(Some(position)),
            Err(err) => {
                error!(event_id, error = %err, "Vehicle finder returned no position");
                Ok(None)
            }
        }
    }

    /// Submit a command and wait for its final status.
    ///
    /// `ERROR` becomes `CommandFailed`. A finished vehicle finder also
    /// fetches the vehicle's position.
    pub async fn execute(
        &self,
        vehicle: &Vehicle,
        command: &RemoteCommand,
        options: Option<&WaitOptions>,
        cancel: &CancellationToken,
    ) -> Result<CommandEvent> {
        let options = options.copied().unwrap_or(self.defaults);
        let mut event = self.submit(vehicle, command, cancel).await?;
        if !event.is_terminal() {
            self.wait_event(&mut event, &options, cancel).await?;
        }
        if event.status == CommandStatus::Error {
            return Err(ClientError::CommandFailed {
                event_id: event.event_id.clone().unwrap_or_default(),
                details: event
                    .details
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| "no details".into()),
            });
        }

        if let (RemoteCommand::VehicleFinder, CommandStatus::Executed, Some(event_id)) =
            (command, &event.status, &event.event_id)
        {
            event.position = match self.event_position(event_id, event.brand, cancel).await {
                Ok(position) => position,
                Err(err) if err.is_account_wide() => return Err(err),
                Err(err) => {
                    warn!(event_id, error = %err, "Unable to fetch vehicle position");
                    None
                }
            };
        }
        Ok(event)
    }
}

/// Why a charging command cannot have an effect given the vehicle's last
/// state. Vehicles without a fetched state are not checked.
fn ignore_reason(command: &RemoteCommand, vehicle: &Vehicle) -> Option<&'static str> {
    if !vehicle.has_state() {
        return None;
    }
    let charging = vehicle.state.get("electricChargingState");
    let connected = charging
        .and_then(|c| c.get("isChargerConnected"))
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let status = charging
        .and_then(|c| c.get("chargingStatus"))
        .and_then(Value::as_str);

    match command {
        RemoteCommand::ChargeStart if !connected => {
            Some("Charger not connected, cannot start charging")
        }
        RemoteCommand::ChargeStop if !connected => Some("Charger not connected, cannot stop charging"),
        RemoteCommand::ChargeStop if status != Some("CHARGING") => {
            Some("Vehicle not charging, cannot stop charging")
        }
        _ => None,
    }
}
