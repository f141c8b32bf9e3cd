//! Login handshakes and session ownership
//!
//! - [`Authenticator`] turns a [`Grant`] into a [`Session`]
//! - [`OAuthAuthenticator`] implements the vendor handshakes per region
//! - [`SessionManager`] owns an account's session and refreshes it under
//!   single-flight

mod manager;
mod oauth;
pub mod pkce;

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::region::Region;
use crate::session::Session;

pub use manager::SessionManager;
pub use oauth::OAuthAuthenticator;

/// Username and password of an account
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// What an authentication attempt is based on
#[derive(Clone)]
pub enum Grant {
    /// Fresh login. Some regions demand a captcha token when no refresh
    /// token is available.
    Password {
        credentials: Credentials,
        captcha_token: Option<String>,
    },
    /// Refresh of an earlier session. Never needs a captcha.
    RefreshToken {
        refresh_token: String,
        gcid: Option<String>,
    },
}

impl Grant {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Grant::Password { .. } => "password",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }
}

impl fmt::Debug for Grant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Grant::Password {
                credentials,
                captcha_token,
            } => f
                .debug_struct("Password")
                .field("credentials", credentials)
                .field("captcha_token", &captcha_token.as_ref().map(|_| "***"))
                .finish(),
            Grant::RefreshToken { gcid, .. } => f
                .debug_struct("RefreshToken")
                .field("refresh_token", &"***")
                .field("gcid", gcid)
                .finish(),
        }
    }
}

/// Executes a login handshake
///
/// Errors: `InvalidCredentials` when the backend rejects username or password,
/// `CaptchaRequired` when a captcha token is missing or was rejected, `Auth`
/// when a refresh token is no longer accepted.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, grant: &Grant, region: Region) -> Result<Session>;
}

#[async_trait]
impl<T: Authenticator + ?Sized> Authenticator for std::sync::Arc<T> {
    async fn authenticate(&self, grant: &Grant, region: Region) -> Result<Session> {
        (**self).authenticate(grant, region).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_hides_secrets() {
        let grant = Grant::Password {
            credentials: Credentials::new("user@example.com", "hunter2"),
            captcha_token: Some("captcha-secret".into()),
        };
        let debug = format!("{:?}", grant);
        assert!(debug.contains("user@example.com"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("captcha-secret"));

        let grant = Grant::RefreshToken {
            refresh_token: "refresh-secret".into(),
            gcid: None,
        };
        assert!(!format!("{:?}", grant).contains("refresh-secret"));
        assert_eq!(grant.kind(), "refresh_token");
    }
}
