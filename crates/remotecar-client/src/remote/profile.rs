//! Charging profile updates
//!
//! The backend only accepts a complete profile, so an update is applied on
//! top of the profile reported in the vehicle state.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ClientError, Result};

/// Slot time used when the profile has none
const EMPTY_SLOT: &str = "0001-01-01T00:00:00.000";

/// When a plugged-in vehicle charges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingMode {
    /// Charge as soon as the charger is connected
    Immediate,
    /// Charge in the preferred charging window
    Delayed,
}

impl ChargingMode {
    fn profile_type(&self) -> &'static str {
        match self {
            Self::Immediate => "CHARGING_IMMEDIATELY",
            Self::Delayed => "TIME_SLOT",
        }
    }

    fn preference(&self) -> &'static str {
        match self {
            Self::Immediate => "NO_PRESELECTION",
            Self::Delayed => "CHARGING_WINDOW",
        }
    }
}

impl fmt::Display for ChargingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Immediate => "immediate",
            Self::Delayed => "delayed",
        })
    }
}

impl FromStr for ChargingMode {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "immediate" | "immediate_charging" => Ok(Self::Immediate),
            "delayed" | "delayed_charging" => Ok(Self::Delayed),
            other => Err(ClientError::InvalidCommand(format!(
                "unknown charging mode '{}', expected immediate or delayed",
                other
            ))),
        }
    }
}

/// Changes to the charging profile. At least one field must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargingProfileUpdate {
    pub charging_mode: Option<ChargingMode>,
    /// Precondition the cabin before departure
    pub precondition_climate: Option<bool>,
}

impl ChargingProfileUpdate {
    pub fn validate(&self) -> Result<()> {
        if self.charging_mode.is_none() && self.precondition_climate.is_none() {
            return Err(ClientError::InvalidCommand(
                "charging profile update needs a charging mode or a climate setting".into(),
            ));
        }
        Ok(())
    }

    /// Request body: `profile` (the state's `chargingProfile`) in the shape
    /// the backend expects, with this update applied.
    pub fn payload(&self, profile: &Value, service_pack: Option<&str>) -> Value {
        let text = |key: &str| profile.get(key).and_then(Value::as_str).unwrap_or("UNKNOWN");

        let timers: Vec<Value> = profile
            .get("departureTimes")
            .and_then(Value::as_array)
            .map(|timers| {
                timers
                    .iter()
                    .map(|timer| {
                        json!({
                            "daysOfTheWeek": timer.get("timerWeekDays").cloned().unwrap_or_else(|| json!([])),
                            "id": timer.get("id"),
                            "time": slot(timer.get("timeStamp")),
                            "timerAction": timer.get("action"),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let mode_type = match text("chargingMode") {
            "IMMEDIATE_CHARGING" => "CHARGING_IMMEDIATELY",
            "DELAYED_CHARGING" => "TIME_SLOT",
            other => other,
        };
        let timer_type = match text("chargingControlType") {
            "WEEKLY_PLANNER" => "WEEKLY_DEPARTURE_TIMER",
            "TWO_TIMES_TIMER" => "TWO_DEPARTURE_TIMER",
            other => other,
        };

        let mut body = json!({
            "chargingMode": {
                "chargingPreference": text("chargingPreference"),
                "endTimeSlot": slot(profile.pointer("/reductionOfChargeCurrent/end")),
                "startTimeSlot": slot(profile.pointer("/reductionOfChargeCurrent/start")),
                "type": mode_type,
                "timerChange": "NO_CHANGE",
            },
            "departureTimer": {
                "type": timer_type,
                "weeklyTimers": timers,
            },
            "isPreconditionForDepartureActive": profile
                .get("climatisationOn")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            "servicePack": service_pack,
        });

        if let Some(mode) = self.charging_mode {
            body["chargingMode"]["type"] = json!(mode.profile_type());
            body["chargingMode"]["chargingPreference"] = json!(mode.preference());
        }
        if let Some(precondition) = self.precondition_climate {
            body["isPreconditionForDepartureActive"] = json!(precondition);
        }
        body
    }
}

/// `{"hour": h, "minute": m}` as the fixed-date time the backend uses
fn slot(time: Option<&Value>) -> String {
    let part = |key: &str| time.and_then(|t| t.get(key)).and_then(Value::as_u64);
    match (part("hour"), part("minute")) {
        (Some(hour), Some(minute)) => format!("0001-01-01T{:02}:{:02}:00.000", hour, minute),
        _ => EMPTY_SLOT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Value {
        json!({
            "chargingMode": "IMMEDIATE_CHARGING",
            "chargingPreference": "NO_PRESELECTION",
            "chargingControlType": "WEEKLY_PLANNER",
            "climatisationOn": false,
            "reductionOfChargeCurrent": {
                "start": {"hour": 18, "minute": 1},
                "end": {"hour": 1, "minute": 30}
            },
            "departureTimes": [
                {"id": 1, "action": "DEACTIVATE", "timerWeekDays": ["MONDAY"], "timeStamp": {"hour": 7, "minute": 35}},
                {"id": 2, "action": "DEACTIVATE", "timerWeekDays": []}
            ]
        })
    }

    #[test]
    fn test_payload_keeps_current_profile() {
        let update = ChargingProfileUpdate {
            charging_mode: None,
            precondition_climate: Some(true),
        };
        let body = update.payload(&profile(), Some("WAVE_01"));

        assert_eq!(
            body["chargingMode"],
            json!({
                "chargingPreference": "NO_PRESELECTION",
                "endTimeSlot": "0001-01-01T01:30:00.000",
                "startTimeSlot": "0001-01-01T18:01:00.000",
                "type": "CHARGING_IMMEDIATELY",
                "timerChange": "NO_CHANGE"
            })
        );
        assert_eq!(body["departureTimer"]["type"], json!("WEEKLY_DEPARTURE_TIMER"));
        assert_eq!(
            body["departureTimer"]["weeklyTimers"][0],
            json!({"daysOfTheWeek": ["MONDAY"], "id": 1, "time": "0001-01-01T07:35:00.000", "timerAction": "DEACTIVATE"})
        );
        assert_eq!(body["departureTimer"]["weeklyTimers"][1]["time"], json!(EMPTY_SLOT));
        assert_eq!(body["isPreconditionForDepartureActive"], json!(true));
        assert_eq!(body["servicePack"], json!("WAVE_01"));
    }

    #[test]
    fn test_payload_changes_mode() {
        let update = ChargingProfileUpdate {
            charging_mode: Some(ChargingMode::Delayed),
            precondition_climate: None,
        };
        let body = update.payload(&profile(), None);
        assert_eq!(body["chargingMode"]["type"], json!("TIME_SLOT"));
        assert_eq!(body["chargingMode"]["chargingPreference"], json!("CHARGING_WINDOW"));
        assert_eq!(body["isPreconditionForDepartureActive"], json!(false));
        assert_eq!(body["servicePack"], Value::Null);
    }

    #[test]
    fn test_empty_profile() {
        let body = ChargingProfileUpdate::default().payload(&json!({}), None);
        assert_eq!(body["chargingMode"]["startTimeSlot"], json!(EMPTY_SLOT));
        assert_eq!(body["departureTimer"]["weeklyTimers"], json!([]));
        assert!(ChargingProfileUpdate::default().validate().is_err());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("immediate".parse::<ChargingMode>().unwrap(), ChargingMode::Immediate);
        assert_eq!("DELAYED_CHARGING".parse::<ChargingMode>().unwrap(), ChargingMode::Delayed);
        assert!("sometimes".parse::<ChargingMode>().is_err());
    }
}
