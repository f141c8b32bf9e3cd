//! Client configuration with YAML support

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};
use crate::pipeline::RetryPolicy;
use crate::region::RegionEndpoints;
use crate::remote::{GpsPosition, PollInterval, WaitOptions};

/// Account client configuration
///
/// Can be loaded from YAML, JSON, or constructed programmatically.
/// Every section has defaults, so an empty document is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Retry and backoff for rate limits and server errors
    #[serde(default)]
    pub retry: RetryConfig,

    /// Session refresh settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Remote command polling defaults
    #[serde(default)]
    pub polling: PollingConfig,

    /// Keep anonymized copies of the last API responses
    #[serde(default)]
    pub log_responses: bool,

    /// Replaces the built-in endpoint set of the account's region
    #[serde(default)]
    pub endpoints: Option<RegionEndpoints>,

    /// Where the user is; the vehicle finder reports positions only when set
    #[serde(default)]
    pub observer_position: Option<GpsPosition>,
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// General request timeout in milliseconds (default: 30s)
    #[serde(default = "default_request_timeout")]
    pub request_ms: u64,

    /// Connect timeout in milliseconds (default: 10s)
    #[serde(default = "default_connect_timeout")]
    pub connect_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            request_ms: default_request_timeout(),
            connect_ms: default_connect_timeout(),
        }
    }
}

impl TimeoutsConfig {
    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }
}

fn default_request_timeout() -> u64 {
    30_000 // 30 seconds
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds, doubled per retry (default: 1s)
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound for a computed backoff delay (default: 30s)
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Wait as long as the server's `Retry-After` asks (default: true)
    #[serde(default = "default_true")]
    pub honor_retry_after: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            honor_retry_after: true,
        }
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

/// Session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Refresh when the access token expires within this many seconds (default: 300)
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            refresh_margin_secs: default_refresh_margin(),
        }
    }
}

impl SessionConfig {
    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}

fn default_refresh_margin() -> u64 {
    300 // 5 minutes
}

/// Polling configuration for remote command status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Poll interval in milliseconds (default: 3s)
    #[serde(default = "default_poll_interval")]
    pub interval_ms: u64,

    /// Give up waiting after this many milliseconds (default: 240s)
    #[serde(default = "default_poll_timeout")]
    pub timeout_ms: u64,

    /// When set, the interval doubles after every poll up to this bound
    #[serde(default)]
    pub max_interval_ms: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval(),
            timeout_ms: default_poll_timeout(),
            max_interval_ms: None,
        }
    }
}

fn default_poll_interval() -> u64 {
    3_000
}

fn default_poll_timeout() -> u64 {
    240_000 // 4 minutes
}

impl PollingConfig {
    /// Wait options described by this section
    pub fn wait_options(&self) -> WaitOptions {
        let initial = Duration::from_millis(self.interval_ms);
        let poll_interval = match self.max_interval_ms {
            Some(max) => PollInterval::Exponential {
                initial,
                max: Duration::from_millis(max),
            },
            None => PollInterval::Fixed(initial),
        };
        WaitOptions {
            timeout: Duration::from_millis(self.timeout_ms),
            poll_interval,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self =
            serde_yaml::from_str(yaml).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Reject values that would make polling or backoff degenerate
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            return Err(ClientError::Config(
                "polling.interval_ms must be greater than zero".into(),
            ));
        }
        if let Some(max) = self.polling.max_interval_ms {
            if max < self.polling.interval_ms {
                return Err(ClientError::Config(
                    "polling.max_interval_ms must not be below polling.interval_ms".into(),
                ));
            }
        }
        if let Some(message) = self.observer_position.as_ref().and_then(GpsPosition::range_error) {
            return Err(ClientError::Config(format!("observer_position: {}", message)));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ClientError::Config(
                "retry.max_delay_ms must not be below retry.base_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// Backoff policy described by the retry section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retry.max_retries,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            honor_retry_after: self.retry.honor_retry_after,
        }
    }

    /// Point the account at a different endpoint set (e.g. a local mock backend)
    pub fn with_endpoints(mut self, endpoints: RegionEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_log_responses(mut self, enabled: bool) -> Self {
        self.log_responses = enabled;
        self
    }

    pub fn with_observer_position(mut self, position: GpsPosition) -> Self {
        self.observer_position = Some(position);
        self
    }
}
