//! Authenticated session state

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::region::Region;

/// Default safety margin before expiry at which a session is refreshed
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Longest token lifetime accepted from a server, in seconds
const MAX_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// The credential set that authorizes API calls.
///
/// Serializes to the opaque record kept by a [`TokenStore`](crate::TokenStore).
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub region: Region,
    /// Global customer id, required by some regions for refresh
    #[serde(default)]
    pub gcid: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl Session {
    /// Build a session that expires `expires_in` seconds after `issued_at`.
    ///
    /// `expires_in` is clamped to `0..=365 days`, so any server value is safe.
    pub fn issued(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in: i64,
        issued_at: DateTime<Utc>,
        region: Region,
    ) -> Self {
        let lifetime = TimeDelta::try_seconds(expires_in.clamp(0, MAX_LIFETIME_SECS))
            .unwrap_or_default();
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expires_at: issued_at.checked_add_signed(lifetime).unwrap_or(issued_at),
            region,
            gcid: None,
            session_id: Some(uuid::Uuid::new_v4().to_string()),
            last_used: None,
        }
    }

    pub fn with_gcid(mut self, gcid: Option<String>) -> Self {
        self.gcid = gcid;
        self
    }

    /// True when the session expires before `now + margin`
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        match now.checked_add_signed(margin) {
            Some(limit) => self.expires_at <= limit,
            None => true,
        }
    }

    /// True when the access token can still be used for at least `margin`
    pub fn is_valid(&self, margin: Duration) -> bool {
        !self.access_token.is_empty() && !self.expires_within(margin, Utc::now())
    }

    /// Mark the access token as expired while keeping the refresh token
    pub fn expire(&mut self) {
        self.expires_at = DateTime::<Utc>::UNIX_EPOCH;
    }

    /// Value of the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

fn redact(secret: &str) -> String {
    if secret.len() <= 8 {
        "***".to_string()
    } else {
        format!("{}***", secret.chars().take(4).collect::<String>())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("expires_at", &self.expires_at)
            .field("region", &self.region)
            .field("gcid", &self.gcid)
            .field("last_used", &self.last_used)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_expiring_in(secs: i64) -> Session {
        Session::issued("access-token-value", "refresh-token-value", secs, Utc::now(), Region::RestOfWorld)
    }

    #[test]
    fn test_validity_respects_margin() {
        let session = session_expiring_in(3600);
        assert!(session.is_valid(DEFAULT_REFRESH_MARGIN));

        // Four minutes left is inside the default five minute margin
        let session = session_expiring_in(240);
        assert!(!session.is_valid(DEFAULT_REFRESH_MARGIN));
        assert!(session.is_valid(Duration::from_secs(60)));
    }

    #[test]
    fn test_server_lifetime_is_clamped() {
        let now = Utc::now();
        let long = Session::issued("a", "r", i64::MAX, now, Region::RestOfWorld);
        assert_eq!(long.expires_at, now + TimeDelta::days(365));

        let negative = Session::issued("a", "r", i64::MIN, now, Region::RestOfWorld);
        assert_eq!(negative.expires_at, now);
        assert!(!negative.is_valid(Duration::ZERO));

        let late = Session::issued("a", "r", 3600, DateTime::<Utc>::MAX_UTC, Region::RestOfWorld);
        assert_eq!(late.expires_at, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_expire_keeps_refresh_token() {
        let mut session = session_expiring_in(3600);
        session.expire();
        assert!(!session.is_valid(Duration::ZERO));
        assert_eq!(session.refresh_token, "refresh-token-value");
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let session = session_expiring_in(3600);
        let debug = format!("{:?}", session);
        assert!(!debug.contains("access-token-value"));
        assert!(!debug.contains("refresh-token-value"));
        assert!(debug.contains("acce***"));
    }

    #[test]
    fn test_serde_roundtrip() {
        let session = session_expiring_in(3600).with_gcid(Some("gcid-1".into()));
        let json = serde_json::to_string(&session).unwrap();
        let restored: Session = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, session);
    }
}
