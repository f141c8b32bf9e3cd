//! Error types for remotecar client operations

use std::time::Duration;

use thiserror::Error;

use crate::region::Region;
use crate::remote::CommandStatus;

/// Result type alias for remotecar client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur during client operations
///
/// The type is `Clone` so that the outcome of one shared session refresh can
/// be handed to every caller that waited on it.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Username or password were rejected
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// A fresh captcha token is needed before a password login can succeed
    #[error("Captcha token required for login in region '{region}'")]
    CaptchaRequired { region: Region },

    /// Session could not be established or refreshed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Retry budget exhausted on rate limiting, server errors or network failures
    #[error("Transient API error after {attempts} attempt(s){}: {message}", fmt_status(.status))]
    Transient {
        status: Option<u16>,
        attempts: u32,
        message: String,
    },

    /// Server returned a non-retryable error response
    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    /// Call volume quota exhausted (HTTP 403 mentioning "quota")
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Remote command did not reach a terminal state in time.
    ///
    /// The command may still complete server-side; treat the outcome as unknown.
    #[error("No final status for event '{event_id}' after {waited:?} (last status: {last_status})")]
    CommandTimeout {
        event_id: String,
        waited: Duration,
        last_status: CommandStatus,
    },

    /// Remote command reached the ERROR state
    #[error("Remote command '{event_id}' failed: {details}")]
    CommandFailed { event_id: String, details: String },

    /// Vehicle does not advertise the requested command
    #[error("Vehicle {vin} does not support remote command '{command}'")]
    UnsupportedCommand { command: String, vin: String },

    /// Command parameters failed validation
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Operation was abandoned through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// HTTP transport failed before a response was received
    #[error("Transport error: {message}")]
    Transport { message: String, timeout: bool },

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Token store failure
    #[error("Token storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unknown region name
    #[error("Unknown region '{name}'. Valid regions are: {valid}")]
    UnknownRegion { name: String, valid: String },

    /// No vehicle with the given VIN on this account
    #[error("Vehicle not found: {0}")]
    VehicleNotFound(String),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl ClientError {
    /// Create an API error from status code and body
    pub fn api(status: u16, body: impl Into<String>) -> Self {
        Self::Api {
            status,
            body: body.into(),
        }
    }

    /// Create a parse error from any displayable error
    pub fn parse(err: impl std::fmt::Display) -> Self {
        Self::Parse(err.to_string())
    }

    /// Create a storage error from any displayable error
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    /// True for errors that must be fixed by the caller (credentials, captcha)
    /// or that mean the session is unusable.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredentials(_) | Self::CaptchaRequired { .. } | Self::Auth(_)
        )
    }

    /// True for errors that abort a whole multi-vehicle fetch rather than one vehicle.
    pub fn is_account_wide(&self) -> bool {
        self.is_auth_failure() || matches!(self, Self::QuotaExceeded(_) | Self::Cancelled)
    }

    /// True for conditions the pipeline recovers from by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}
