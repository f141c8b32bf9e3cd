//! Vehicles as returned by the API

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClientError, Result};
use crate::remote::{Capabilities, VehiclePosition};

/// Brand a vehicle is registered under. Each brand has its own vehicle list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Brand {
    Bmw,
    Mini,
}

impl Brand {
    pub fn all() -> [Brand; 2] {
        [Brand::Bmw, Brand::Mini]
    }

    /// Lower-case name used in `x-user-agent`
    pub fn as_str(&self) -> &'static str {
        match self {
            Brand::Bmw => "bmw",
            Brand::Mini => "mini",
        }
    }
}

impl fmt::Display for Brand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Brand {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bmw" | "bmw_i" | "bmwi" => Ok(Brand::Bmw),
            "mini" => Ok(Brand::Mini),
            other => Err(ClientError::Parse(format!("unknown brand '{}'", other))),
        }
    }
}

/// One vehicle of the account with its last fetched state.
///
/// Only the identifying fields are mapped; everything else is kept as raw
/// JSON.
#[derive(Debug, Clone, Serialize)]
pub struct Vehicle {
    pub vin: String,
    pub brand: Brand,
    pub model: Option<String>,
    /// `attributes` of the vehicle list entry
    pub attributes: Value,
    /// `state` of the state response
    pub state: Value,
    /// `capabilities` of the state response, unparsed
    pub capabilities_raw: Value,
    /// Charging settings response, when the vehicle supports them
    pub charging_settings: Option<Value>,
    pub capabilities: Capabilities,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Last position reported by the vehicle finder
    pub finder_position: Option<VehiclePosition>,
}

impl Vehicle {
    /// Build from an entry of the vehicle list of `brand`
    pub fn from_list_entry(entry: &Value, brand: Brand) -> Result<Self> {
        let vin = entry
            .get("vin")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ClientError::Parse("vehicle list entry without vin".into()))?;
        let attributes = entry.get("attributes").cloned().unwrap_or(Value::Null);
        let model = attributes
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string);
        let brand = attributes
            .get("brand")
            .and_then(Value::as_str)
            .and_then(|b| b.parse().ok())
            .unwrap_or(brand);

        Ok(Self {
            vin: vin.to_string(),
            brand,
            model,
            attributes,
            state: Value::Null,
            capabilities_raw: Value::Null,
            charging_settings: None,
            capabilities: Capabilities::default(),
            fetched_at: None,
            finder_position: None,
        })
    }

    /// Apply a state response (`{"state": .., "capabilities": ..}`)
    pub fn apply_state(&mut self, response: Value, fetched_at: DateTime<Utc>) {
        if let Value::Object(mut map) = response {
            if let Some(state) = map.remove("state") {
                self.state = state;
            }
            if let Some(capabilities) = map.remove("capabilities") {
                self.capabilities_raw = capabilities;
            }
        }
        self.fetched_at = Some(fetched_at);
        self.update_capabilities();
    }

    pub fn apply_charging_settings(&mut self, settings: Value) {
        self.charging_settings = Some(settings);
        self.update_capabilities();
    }

    fn update_capabilities(&mut self) {
        self.capabilities = Capabilities::from_vehicle_data(
            &self.capabilities_raw,
            &self.state,
            self.charging_settings.as_ref(),
        );
    }

    /// Charging settings are fetched separately for vehicles that have them
    pub fn has_charging_settings(&self) -> bool {
        self.capabilities.charging_plan || self.capabilities.charging_settings
    }

    /// True once a state response was applied
    pub fn has_state(&self) -> bool {
        self.fetched_at.is_some()
    }
}
