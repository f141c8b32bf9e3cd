//! Redaction of personal data in recorded API responses

use std::collections::{HashMap, VecDeque};
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{json, Value};

use crate::transport::HttpResponse;
use crate::vehicle::Brand;

/// Number of responses kept by a [`ResponseRecorder`]
pub const RECORDED_RESPONSES: usize = 10;

/// Keys whose values are replaced regardless of content
fn replacement_for(key: &str) -> Option<Value> {
    let value = match key {
        "lat" | "latitude" => json!(12.3456),
        "lon" | "longitude" => json!(34.5678),
        "heading" => json!(123),
        "licensePlate" => json!("some_license_plate"),
        "name" => json!("some_name"),
        "city" => json!("some_city"),
        "street" => json!("some_street"),
        "streetNumber" => json!("999"),
        "postalCode" => json!("some_postal_code"),
        "phone" => json!("some_phone"),
        "formatted" => json!("some_formatted_address"),
        "subtitle" => json!("some_road \u{2022} duration \u{2022} -- EUR"),
        _ => return None,
    };
    Some(value)
}

fn vin_pattern() -> Option<&'static Regex> {
    static VIN: OnceLock<Option<Regex>> = OnceLock::new();
    VIN.get_or_init(|| Regex::new(r"WB[a-zA-Z0-9]{15}").ok())
        .as_ref()
}

/// Replaces VINs with stable placeholders.
///
/// The same VIN always maps to the same placeholder within one anonymizer,
/// so relations between recorded responses survive.
#[derive(Debug, Default)]
pub struct Anonymizer {
    vins: HashMap<String, String>,
}

impl Anonymizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every VIN in `text`
    pub fn anonymize_text(&mut self, text: &str) -> String {
        let Some(re) = vin_pattern() else {
            return text.to_string();
        };
        re.replace_all(text, |caps: &Captures| self.placeholder(&caps[0]))
            .into_owned()
    }

    fn placeholder(&mut self, vin: &str) -> String {
        let next = self.vins.len() + 1;
        self.vins
            .entry(vin.to_string())
            .or_insert_with(|| format!("{}0FINGERPRINT{:02}", &vin[..3], next))
            .clone()
    }

    /// Redact personal fields and VINs in a JSON document
    pub fn anonymize_json(&mut self, value: Value) -> Value {
        match value {
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.anonymize_json(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(key, value)| {
                        let value = match replacement_for(&key) {
                            Some(replacement) => replacement,
                            None => self.anonymize_json(value),
                        };
                        (key, value)
                    })
                    .collect(),
            ),
            Value::String(s) => Value::String(self.anonymize_text(&s)),
            other => other,
        }
    }
}

/// Redact personal fields and VINs with a fresh placeholder table
pub fn anonymize_json(value: Value) -> Value {
    Anonymizer::new().anonymize_json(value)
}

/// A redacted copy of one API response
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnonymizedResponse {
    /// Suggested file name, e.g. `bmw-eadrax-vcs_v4_vehicles.json`
    pub filename: String,
    pub content: Value,
}

/// Bounded ring of the most recent anonymized responses
#[derive(Debug)]
pub struct ResponseRecorder {
    capacity: usize,
    inner: Mutex<RecorderState>,
}

#[derive(Debug, Default)]
struct RecorderState {
    anonymizer: Anonymizer,
    responses: VecDeque<AnonymizedResponse>,
}

impl Default for ResponseRecorder {
    fn default() -> Self {
        Self::new(RECORDED_RESPONSES)
    }
}

impl ResponseRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(RecorderState::default()),
        }
    }

    /// Store a redacted copy of a response, dropping the oldest when full
    pub fn record(&self, brand: Brand, path: &str, vin: Option<&str>, response: &HttpResponse) {
        let mut state = self.inner.lock();

        let mut parts: Vec<&str> = path.trim_matches('/').split('/').collect();
        if let Some(vin) = vin {
            parts.push(vin);
        }
        let stem = state.anonymizer.anonymize_text(&parts.join("_"));

        let (content, extension) = match serde_json::from_slice::<Value>(&response.body) {
            Ok(json) => (state.anonymizer.anonymize_json(json), "json"),
            Err(_) => (Value::String(state.anonymizer.anonymize_text(&response.text())), "txt"),
        };

        if state.responses.len() == self.capacity {
            state.responses.pop_front();
        }
        state.responses.push_back(AnonymizedResponse {
            filename: format!("{}-{}.{}", brand.as_str(), stem, extension),
            content,
        });
    }

    /// Recorded responses, oldest first
    pub fn responses(&self) -> Vec<AnonymizedResponse> {
        self.inner.lock().responses.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.inner.lock().responses.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_anonymize_json() {
        let input = json!({
            "vin": "WBA12345678901234",
            "location": {
                "coordinates": {"latitude": 48.1, "longitude": 11.5},
                "address": {"formatted": "Somewhere 1, Munich"},
                "heading": 270
            },
            "vehicles": [{"vin": "WBA12345678901234"}, {"vin": "WBY98765432109876"}],
            "licensePlate": "M-AB 123",
            "mileage": 1234
        });

        assert_eq!(
            anonymize_json(input),
            json!({
                "vin": "WBA0FINGERPRINT01",
                "location": {
                    "coordinates": {"latitude": 12.3456, "longitude": 34.5678},
                    "address": {"formatted": "some_formatted_address"},
                    "heading": 123
                },
                "vehicles": [{"vin": "WBA0FINGERPRINT01"}, {"vin": "WBY0FINGERPRINT02"}],
                "licensePlate": "some_license_plate",
                "mileage": 1234
            })
        );
    }

    #[test]
    fn test_placeholders_keep_vin_length() {
        let mut anonymizer = Anonymizer::new();
        let text = anonymizer.anonymize_text("vehicle WBA12345678901234 reported");
        assert_eq!(text, "vehicle WBA0FINGERPRINT01 reported");
        assert_eq!("WBA0FINGERPRINT01".len(), 17);
    }

    #[test]
    fn test_recorder_is_bounded() {
        let recorder = ResponseRecorder::default();
        for i in 0..12 {
            let response = HttpResponse::json_body(200, &json!({"n": i}));
            recorder.record(Brand::Bmw, "/eadrax-vcs/v4/vehicles", None, &response);
        }

        let responses = recorder.responses();
        assert_eq!(responses.len(), RECORDED_RESPONSES);
        assert_eq!(responses[0].content, json!({"n": 2}));
        assert_eq!(responses[0].filename, "bmw-eadrax-vcs_v4_vehicles.json");
    }

    #[test]
    fn test_recorder_anonymizes_vin_in_filename() {
        let recorder = ResponseRecorder::default();
        let response = HttpResponse::new(200, "plain text");
        recorder.record(
            Brand::Mini,
            "/eadrax-vcs/v4/vehicles/state",
            Some("WMW12345678901234"),
            &response,
        );
        recorder.record(
            Brand::Bmw,
            "/eadrax-vcs/v4/vehicles/state",
            Some("WBA12345678901234"),
            &response,
        );

        let responses = recorder.responses();
        // Only VINs of the WB prefix are recognised
        assert_eq!(
            responses[0].filename,
            "mini-eadrax-vcs_v4_vehicles_state_WMW12345678901234.txt"
        );
        assert_eq!(
            responses[1].filename,
            "bmw-eadrax-vcs_v4_vehicles_state_WBA0FINGERPRINT01.txt"
        );
        assert_eq!(responses[1].content, json!("plain text"));
    }
}
