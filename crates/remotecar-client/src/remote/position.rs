//! Coordinates, points of interest and vehicle positions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{ClientError, Result};

/// Title of a point of interest sent without a name
pub const DEFAULT_POI_NAME: &str = "Sent with remotecar";

/// Latitude and longitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GpsPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl GpsPosition {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let position = Self {
            latitude,
            longitude,
        };
        position.validate()?;
        Ok(position)
    }

    pub fn validate(&self) -> Result<()> {
        match self.range_error() {
            Some(message) => Err(ClientError::InvalidCommand(message)),
            None => Ok(()),
        }
    }

    /// Description of the first coordinate out of range (NaN included)
    pub(crate) fn range_error(&self) -> Option<String> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Some(format!(
                "latitude must be between -90 and 90, got {}",
                self.latitude
            ));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Some(format!(
                "longitude must be between -180 and 180, got {}",
                self.longitude
            ));
        }
        None
    }
}

/// A destination sent to the vehicle's navigation system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointOfInterest {
    pub position: GpsPosition,
    /// Title shown in the vehicle; [`DEFAULT_POI_NAME`] when unset
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub street: Option<String>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

impl PointOfInterest {
    /// Coordinates only, no name or address
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            position: GpsPosition {
                latitude,
                longitude,
            },
            name: None,
            street: None,
            postal_code: None,
            city: None,
            country: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.position.validate()?;
        if matches!(&self.name, Some(name) if name.trim().is_empty()) {
            return Err(ClientError::InvalidCommand(
                "point of interest name must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(DEFAULT_POI_NAME)
    }

    /// Street, postal code and city joined, or `Coordinates only`
    pub fn formatted_address(&self) -> String {
        let parts: Vec<&str> = [&self.street, &self.postal_code, &self.city]
            .into_iter()
            .filter_map(|part| part.as_deref())
            .filter(|part| !part.is_empty())
            .collect();
        if parts.is_empty() {
            "Coordinates only".to_string()
        } else {
            parts.join(", ")
        }
    }

    /// `location` object of the send-to-car request
    pub fn to_location(&self) -> Value {
        let position = json!({
            "lat": self.position.latitude,
            "lng": self.position.longitude,
        });
        json!({
            "position": position,
            "address": {
                "street": self.street,
                "postalCode": self.postal_code,
                "city": self.city,
                "country": self.country,
            },
            "formattedAddress": self.formatted_address(),
            "entrances": [{"name": null, "position": position}],
            "placeType": "ADDRESS",
            "category": {
                "losCategory": "Address",
                "mguVehicleCategoryId": null,
                "name": "Address",
            },
            "title": self.title(),
            "providerPoiId": "",
        })
    }
}

/// Where the vehicle finder located the vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehiclePosition {
    pub latitude: f64,
    pub longitude: f64,
    pub heading: Option<f64>,
    pub fetched_at: DateTime<Utc>,
}

impl VehiclePosition {
    /// Parse an event position response.
    ///
    /// A response carrying `errorDetails` is returned as a parse error with
    /// the backend's title and description.
    pub fn from_event_response(response: &Value, fetched_at: DateTime<Utc>) -> Result<Self> {
        if let Some(details) = response.get("errorDetails") {
            let text = |key: &str| details.get(key).and_then(Value::as_str).unwrap_or_default();
            return Err(ClientError::Parse(format!(
                "{}: {}",
                text("title"),
                text("description")
            )));
        }
        let position = response
            .pointer("/positionData/position")
            .ok_or_else(|| ClientError::Parse("event position response without position".into()))?;
        let coordinate = |key: &str| {
            position
                .get(key)
                .and_then(Value::as_f64)
                .ok_or_else(|| ClientError::Parse(format!("vehicle position without {}", key)))
        };
        Ok(Self {
            latitude: coordinate("latitude")?,
            longitude: coordinate("longitude")?,
            heading: position.get("heading").and_then(Value::as_f64),
            fetched_at,
        })
    }
}
