//! Remote command types, capability checks and execution status

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};

use super::position::{PointOfInterest, VehiclePosition};
use super::profile::ChargingProfileUpdate;
use crate::error::{ClientError, Result};
use crate::vehicle::{Brand, Vehicle};

const REMOTE_COMMAND_PATH: &str = "/eadrax-vrccs/v3/presentation/remote-commands";
const CHARGING_COMMAND_PATH: &str = "/eadrax-crccs/v1/vehicles";
const SEND_POI_PATH: &str = "/eadrax-dcs/v1/send-to-car/send-to-car";

/// Path used to poll the execution status of a submitted command
pub const EVENT_STATUS_PATH: &str = "/eadrax-vrccs/v3/presentation/remote-commands/eventStatus";

/// Path used to fetch the position found by the vehicle finder
pub const EVENT_POSITION_PATH: &str =
    "/eadrax-vrccs/v3/presentation/remote-commands/eventPosition";

/// New charging limits. At least one field must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingSettings {
    /// Target state of charge in percent
    pub target_soc: Option<u8>,
    /// AC current limit in ampere
    pub ac_limit: Option<u16>,
}

impl ChargingSettings {
    /// Check the values that can be checked without knowing the vehicle
    pub fn validate(&self) -> Result<()> {
        if self.target_soc.is_none() && self.ac_limit.is_none() {
            return Err(ClientError::InvalidCommand(
                "charging settings need a target SoC or an AC limit".into(),
            ));
        }
        if let Some(soc) = self.target_soc {
            if !(20..=100).contains(&soc) || soc % 5 != 0 {
                return Err(ClientError::InvalidCommand(format!(
                    "target SoC must be between 20 and 100 and a multiple of 5, got {}",
                    soc
                )));
            }
        }
        Ok(())
    }
}

/// Commands a vehicle can be asked to carry out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteCommand {
    LightFlash,
    VehicleFinder,
    DoorLock,
    DoorUnlock,
    Horn,
    ClimateStart,
    ClimateStop,
    ChargeStart,
    ChargeStop,
    ChargingSettings(ChargingSettings),
    ChargingProfile(ChargingProfileUpdate),
    SendPoi(PointOfInterest),
}

impl RemoteCommand {
    /// Command names accepted by [`FromStr`]
    pub const NAMES: [&'static str; 12] = [
        "light-flash",
        "vehicle-finder",
        "door-lock",
        "door-unlock",
        "horn",
        "climate-start",
        "climate-stop",
        "charge-start",
        "charge-stop",
        "charging-settings",
        "charging-profile",
        "send-poi",
    ];

    /// Name as accepted by [`FromStr`]
    pub fn name(&self) -> &'static str {
        match self {
            Self::LightFlash => "light-flash",
            Self::VehicleFinder => "vehicle-finder",
            Self::DoorLock => "door-lock",
            Self::DoorUnlock => "door-unlock",
            Self::Horn => "horn",
            Self::ClimateStart => "climate-start",
            Self::ClimateStop => "climate-stop",
            Self::ChargeStart => "charge-start",
            Self::ChargeStop => "charge-stop",
            Self::ChargingSettings(_) => "charging-settings",
            Self::ChargingProfile(_) => "charging-profile",
            Self::SendPoi(_) => "send-poi",
        }
    }

    /// Service identifier used by the backend
    pub fn service_id(&self) -> &'static str {
        match self {
            Self::LightFlash => "light-flash",
            Self::VehicleFinder => "vehicle-finder",
            Self::DoorLock => "door-lock",
            Self::DoorUnlock => "door-unlock",
            Self::Horn => "horn-blow",
            Self::ClimateStart | Self::ClimateStop => "climate-now",
            Self::ChargeStart => "start-charging",
            Self::ChargeStop => "stop-charging",
            Self::ChargingSettings(_) => "CHARGING_SETTINGS",
            Self::ChargingProfile(_) => "CHARGING_PROFILE",
            Self::SendPoi(_) => "SEND_POI",
        }
    }

    /// API path the command is posted to
    pub fn endpoint(&self, vin: &str) -> String {
        match self {
            Self::ChargeStart | Self::ChargeStop => {
                format!("{}/{}/{}", CHARGING_COMMAND_PATH, vin, self.service_id())
            }
            Self::ChargingSettings(_) => {
                format!("{}/{}/charging-settings", CHARGING_COMMAND_PATH, vin)
            }
            Self::ChargingProfile(_) => {
                format!("{}/{}/charging-profile", CHARGING_COMMAND_PATH, vin)
            }
            Self::SendPoi(_) => SEND_POI_PATH.to_string(),
            _ => format!("{}/{}/{}", REMOTE_COMMAND_PATH, vin, self.service_id()),
        }
    }

    /// Query parameters sent with the command
    pub fn query(&self) -> Vec<(&'static str, &'static str)> {
        match self {
            Self::ClimateStart => vec![("action", "START")],
            Self::ClimateStop => vec![("action", "STOP")],
            _ => Vec::new(),
        }
    }

    /// JSON body sent with the command.
    ///
    /// A charging profile update is applied to the profile in the vehicle's
    /// last state, so it fails for a vehicle that reports none.
    pub fn payload(&self, vehicle: &Vehicle) -> Result<Option<Value>> {
        let body = match self {
            Self::ChargingSettings(settings) => {
                let mut body = serde_json::Map::new();
                if let Some(soc) = settings.target_soc {
                    body.insert("chargingTarget".into(), json!(soc));
                }
                if let Some(limit) = settings.ac_limit {
                    body.insert("acLimitValue".into(), json!(limit));
                }
                Value::Object(body)
            }
            Self::ChargingProfile(update) => {
                let profile = vehicle
                    .state
                    .get("chargingProfile")
                    .filter(|p| p.is_object())
                    .ok_or_else(|| ClientError::UnsupportedCommand {
                        command: self.name().to_string(),
                        vin: vehicle.vin.clone(),
                    })?;
                let service_pack = vehicle
                    .charging_settings
                    .as_ref()
                    .and_then(|s| s.get("servicePack"))
                    .and_then(Value::as_str);
                update.payload(profile, service_pack)
            }
            Self::SendPoi(poi) => json!({
                "vin": vehicle.vin,
                "location": poi.to_location(),
            }),
            _ => return Ok(None),
        };
        Ok(Some(body))
    }

    /// Validate parameters that do not depend on the vehicle
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::ChargingSettings(settings) => settings.validate(),
            Self::ChargingProfile(update) => update.validate(),
            Self::SendPoi(poi) => poi.validate(),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RemoteCommand {
    type Err = ClientError;

    /// Parse a command name. `charging-settings`, `charging-profile` and
    /// `send-poi` are returned without values and fail validation until they
    /// are filled in.
    fn from_str(s: &str) -> Result<Self> {
        let command = match s.trim().to_ascii_lowercase().as_str() {
            "light-flash" | "flash" => Self::LightFlash,
            "vehicle-finder" | "find" => Self::VehicleFinder,
            "door-lock" | "lock" => Self::DoorLock,
            "door-unlock" | "unlock" => Self::DoorUnlock,
            "horn" | "horn-blow" => Self::Horn,
            "climate-start" => Self::ClimateStart,
            "climate-stop" => Self::ClimateStop,
            "charge-start" => Self::ChargeStart,
            "charge-stop" => Self::ChargeStop,
            "charging-settings" => Self::ChargingSettings(ChargingSettings::default()),
            "charging-profile" => Self::ChargingProfile(ChargingProfileUpdate::default()),
            "send-poi" | "poi" => Self::SendPoi(PointOfInterest::new(f64::NAN, f64::NAN)),
            other => {
                return Err(ClientError::InvalidCommand(format!(
                    "unknown command '{}', expected one of: {}",
                    other,
                    Self::NAMES.join(", ")
                )))
            }
        };
        Ok(command)
    }
}

/// Remote commands a vehicle advertises
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub lights: bool,
    pub horn: bool,
    pub lock: bool,
    pub unlock: bool,
    pub climate_start: bool,
    pub climate_stop: bool,
    pub vehicle_finder: bool,
    /// Destinations can be sent to the navigation system
    #[serde(default)]
    pub send_poi: bool,
    pub charge_start: bool,
    pub charge_stop: bool,
    pub target_soc: bool,
    pub ac_limit: bool,
    /// Settings can be changed through the charging API
    pub charging_settings: bool,
    /// Charging profile (departure timers) is available
    pub charging_plan: bool,
    /// AC limits the vehicle accepts, from the charging settings detail
    #[serde(default)]
    pub ac_limits: Vec<u16>,
}

impl Capabilities {
    /// Build from the `capabilities` and `state` objects of a state response
    /// and the optional charging settings response.
    pub fn from_vehicle_data(
        capabilities: &Value,
        state: &Value,
        charging_settings: Option<&Value>,
    ) -> Self {
        let flag = |key: &str| capabilities.get(key).and_then(Value::as_bool).unwrap_or(false);
        let charging_control: Vec<&str> = capabilities
            .pointer("/remoteChargingCommands/chargingControl")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();
        let ac_limits = charging_settings
            .and_then(|c| c.pointer("/chargingSettingsDetail/acLimit/values"))
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_u64)
                    .filter_map(|v| u16::try_from(v).ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            lights: flag("lights"),
            horn: flag("horn"),
            lock: flag("lock"),
            unlock: flag("unlock"),
            climate_start: flag("climateNow"),
            climate_stop: state.get("climateControlState").is_some(),
            vehicle_finder: flag("vehicleFinder"),
            send_poi: flag("sendPoi"),
            charge_start: charging_control.contains(&"START"),
            charge_stop: charging_control.contains(&"STOP"),
            target_soc: flag("isChargingTargetSocEnabled"),
            ac_limit: flag("isChargingPowerLimitEnabled"),
            charging_settings: flag("isChargingSettingsEnabled"),
            charging_plan: flag("isChargingPlanSupported"),
            ac_limits,
        }
    }

    /// True if the vehicle advertises the command
    pub fn supports(&self, command: &RemoteCommand) -> bool {
        match command {
            RemoteCommand::LightFlash => self.lights,
            RemoteCommand::VehicleFinder => self.vehicle_finder,
            RemoteCommand::DoorLock => self.lock,
            RemoteCommand::DoorUnlock => self.unlock,
            RemoteCommand::Horn => self.horn,
            RemoteCommand::ClimateStart => self.climate_start,
            RemoteCommand::ClimateStop => self.climate_stop,
            RemoteCommand::ChargeStart => self.charge_start,
            RemoteCommand::ChargeStop => self.charge_stop,
            RemoteCommand::ChargingSettings(settings) => {
                (settings.target_soc.is_none() || self.target_soc)
                    && (settings.ac_limit.is_none() || self.ac_limit)
            }
            RemoteCommand::ChargingProfile(_) => self.charging_plan,
            RemoteCommand::SendPoi(_) => self.send_poi,
        }
    }

    /// Names of all advertised commands
    pub fn supported_names(&self) -> Vec<&'static str> {
        let all = [
            RemoteCommand::LightFlash,
            RemoteCommand::VehicleFinder,
            RemoteCommand::DoorLock,
            RemoteCommand::DoorUnlock,
            RemoteCommand::Horn,
            RemoteCommand::ClimateStart,
            RemoteCommand::ClimateStop,
            RemoteCommand::ChargeStart,
            RemoteCommand::ChargeStop,
        ];
        let mut names: Vec<_> = all
            .iter()
            .filter(|c| self.supports(c))
            .map(RemoteCommand::name)
            .collect();
        if self.target_soc || self.ac_limit {
            names.push("charging-settings");
        }
        if self.charging_plan {
            names.push("charging-profile");
        }
        if self.send_poi {
            names.push("send-poi");
        }
        names
    }

    /// Full pre-submit check of a command against this vehicle
    pub fn check(&self, command: &RemoteCommand, vin: &str) -> Result<()> {
        command.validate()?;
        if !self.supports(command) {
            return Err(ClientError::UnsupportedCommand {
                command: command.name().to_string(),
                vin: vin.to_string(),
            });
        }
        if let RemoteCommand::ChargingSettings(ChargingSettings {
            ac_limit: Some(limit),
            ..
        }) = command
        {
            if !self.ac_limits.contains(limit) {
                return Err(ClientError::InvalidCommand(format!(
                    "AC limit {} is not one of the vehicle's limits {:?}",
                    limit, self.ac_limits
                )));
            }
        }
        Ok(())
    }
}

/// Execution state of a submitted command as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CommandStatus {
    Initiated,
    Pending,
    Delivered,
    Executed,
    Error,
    /// The command was not carried out because the vehicle's state does not
    /// allow it, e.g. stopping a charge that is not running
    Ignored,
    /// Any status string this client does not know; handled like `Pending`
    Unrecognized(String),
}

impl CommandStatus {
    /// Case-insensitive parse; never fails
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "INITIATED" => Self::Initiated,
            "PENDING" => Self::Pending,
            "DELIVERED" => Self::Delivered,
            "EXECUTED" => Self::Executed,
            "ERROR" => Self::Error,
            "IGNORED" => Self::Ignored,
            _ => Self::Unrecognized(s.to_string()),
        }
    }

    /// `Executed`, `Error` and `Ignored` end the command's life cycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Error | Self::Ignored)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Initiated => "INITIATED",
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Executed => "EXECUTED",
            Self::Error => "ERROR",
            Self::Ignored => "IGNORED",
            Self::Unrecognized(s) => s,
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CommandStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CommandStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A submitted command and what is known about it
#[derive(Debug, Clone, Serialize)]
pub struct CommandEvent {
    /// Backend reference; `None` when the command completed synchronously
    pub event_id: Option<String>,
    pub vin: String,
    /// Brand the vehicle is registered under; status polls are sent for it
    pub brand: Brand,
    pub command: RemoteCommand,
    pub submitted_at: DateTime<Utc>,
    pub status: CommandStatus,
    pub poll_count: u32,
    /// Last status payload returned by the backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Vehicle position reported after a vehicle finder command
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<VehiclePosition>,
}

impl CommandEvent {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
