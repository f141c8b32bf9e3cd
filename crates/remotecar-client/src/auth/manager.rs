//! Session ownership and single-flight refresh

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::{Authenticator, Credentials, Grant};
use crate::error::{ClientError, Result};
use crate::region::Region;
use crate::session::Session;
use crate::store::TokenStore;

/// State of the refresh critical section
#[derive(Default)]
struct Flight {
    /// Number of completed flights
    epoch: u64,
    /// Outcome of the latest flight
    outcome: Option<Result<Session>>,
}

/// Everything an authentication flight needs, shared with the flight task
struct Inner {
    account: String,
    region: Region,
    authenticator: Arc<dyn Authenticator>,
    store: Arc<dyn TokenStore>,
    credentials: Option<Credentials>,
    margin: Duration,
    session: RwLock<Option<Session>>,
    captcha_token: Mutex<Option<String>>,
    /// Mirror of `Flight::epoch`, readable without the lock
    epoch: AtomicU64,
}

/// Owns the session of one account.
///
/// Any number of tasks may ask for a bearer token concurrently. When the
/// session is missing or expires within the safety margin exactly one
/// authentication runs; the callers wait and reuse its result, success or
/// failure. The authentication runs as its own task holding the flight lock,
/// so a caller that gives up does not abort it.
pub struct SessionManager {
    inner: Arc<Inner>,
    flight: Arc<tokio::sync::Mutex<Flight>>,
}

impl SessionManager {
    /// Create a new session manager
    ///
    /// `account` keys the session in the token store.
    pub fn new(
        account: impl Into<String>,
        region: Region,
        authenticator: Arc<dyn Authenticator>,
        store: Arc<dyn TokenStore>,
        credentials: Option<Credentials>,
        margin: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                account: account.into(),
                region,
                authenticator,
                store,
                credentials,
                margin,
                session: RwLock::new(None),
                captcha_token: Mutex::new(None),
                epoch: AtomicU64::new(0),
            }),
            flight: Arc::new(tokio::sync::Mutex::new(Flight::default())),
        }
    }

    pub fn region(&self) -> Region {
        self.inner.region
    }

    pub fn account(&self) -> &str {
        &self.inner.account
    }

    /// Load a previously saved session from the token store.
    ///
    /// Returns true when a session was found. A session stored for another
    /// region is ignored.
    pub async fn restore(&self) -> Result<bool> {
        let inner = &self.inner;
        match inner.store.load(&inner.account).await? {
            Some(session) if session.region == inner.region => {
                debug!(store = inner.store.name(), "Restored session");
                *inner.session.write() = Some(session);
                Ok(true)
            }
            Some(session) => {
                warn!(
                    stored = %session.region,
                    expected = %inner.region,
                    "Ignoring stored session of another region"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Copy of the current session
    pub fn session(&self) -> Option<Session> {
        self.inner.session.read().clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .session
            .read()
            .as_ref()
            .map(|s| s.refresh_token.clone())
            .filter(|t| !t.is_empty())
    }

    pub fn gcid(&self) -> Option<String> {
        self.inner.session.read().as_ref().and_then(|s| s.gcid.clone())
    }

    /// Use an externally obtained refresh token for the next authentication
    pub fn set_refresh_token(&self, refresh_token: impl Into<String>, gcid: Option<String>) {
        let refresh_token = refresh_token.into();
        let mut guard = self.inner.session.write();
        match guard.as_mut() {
            Some(session) => {
                session.refresh_token = refresh_token;
                if gcid.is_some() {
                    session.gcid = gcid;
                }
                session.expire();
            }
            None => {
                let mut session = Session::issued(
                    "",
                    refresh_token,
                    0,
                    DateTime::<Utc>::UNIX_EPOCH,
                    self.inner.region,
                )
                .with_gcid(gcid);
                session.expire();
                *guard = Some(session);
            }
        }
    }

    /// Captcha token for the next password login. Consumed on use.
    pub fn set_captcha_token(&self, token: Option<String>) {
        *self.inner.captcha_token.lock() = token;
    }

    /// Drop the session, including its refresh token
    pub fn invalidate(&self) {
        self.inner.invalidate();
    }

    /// Expire the session if it still carries `access_token`.
    ///
    /// Used on 401: when several requests are rejected with the same token
    /// only the first expires it, so only one refresh follows.
    pub fn invalidate_if_current(&self, access_token: &str) {
        let mut guard = self.inner.session.write();
        if let Some(session) = guard.as_mut() {
            if session.access_token == access_token {
                debug!("Expiring rejected access token");
                session.expire();
            }
        }
    }

    /// Record that the session was used
    pub fn touch(&self) {
        if let Some(session) = self.inner.session.write().as_mut() {
            session.last_used = Some(Utc::now());
        }
    }

    /// Access token valid for at least the safety margin, refreshing first
    /// when needed.
    pub async fn bearer_token(&self, cancel: &CancellationToken) -> Result<String> {
        Ok(self.valid_session(cancel).await?.access_token)
    }

    /// Session valid for at least the safety margin
    pub async fn valid_session(&self, cancel: &CancellationToken) -> Result<Session> {
        if let Some(session) = self.inner.current_valid() {
            return Ok(session);
        }
        let observed = self.inner.epoch.load(Ordering::SeqCst);
        self.refresh(observed, cancel).await
    }

    /// Authenticate under single-flight.
    ///
    /// `observed` is the flight epoch the caller saw when it found the
    /// session unusable. If a flight completed since then, its outcome is
    /// reused instead of starting another one. Cancelling `cancel` only
    /// stops this caller from waiting.
    #[instrument(skip(self, cancel), fields(account = %self.inner.account))]
    async fn refresh(&self, observed: u64, cancel: &CancellationToken) -> Result<Session> {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }
        let flight = tokio::select! {
            guard = self.flight.clone().lock_owned() => guard,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        };

        if let Some(session) = self.inner.current_valid() {
            return Ok(session);
        }
        if flight.epoch != observed {
            if let Some(Err(err)) = &flight.outcome {
                debug!("Reusing failure of concurrent authentication");
                return Err(err.clone());
            }
        }

        let task = tokio::spawn(Inner::fly(self.inner.clone(), flight));
        tokio::select! {
            joined = task => joined.map_err(|e| {
                ClientError::Auth(format!("authentication task failed: {}", e))
            })?,
            _ = cancel.cancelled() => {
                debug!("Stopped waiting, authentication continues");
                Err(ClientError::Cancelled)
            }
        }
    }
}

impl Inner {
    fn current_valid(&self) -> Option<Session> {
        self.session
            .read()
            .as_ref()
            .filter(|s| s.is_valid(self.margin))
            .cloned()
    }

    fn invalidate(&self) {
        *self.session.write() = None;
    }

    /// One flight: authenticate while holding the flight lock, then publish
    /// the outcome for the callers queued behind it.
    async fn fly(self: Arc<Self>, mut flight: OwnedMutexGuard<Flight>) -> Result<Session> {
        let outcome = self.authenticate().await;
        flight.epoch += 1;
        flight.outcome = Some(outcome.clone());
        self.epoch.store(flight.epoch, Ordering::SeqCst);
        outcome
    }

    /// Run the authenticator once: refresh token first, password login as
    /// fallback.
    async fn authenticate(&self) -> Result<Session> {
        let refresh = self
            .session
            .read()
            .as_ref()
            .filter(|s| !s.refresh_token.is_empty())
            .map(|s| (s.refresh_token.clone(), s.gcid.clone()));

        if let Some((refresh_token, gcid)) = refresh {
            let grant = Grant::RefreshToken {
                refresh_token,
                gcid: gcid.clone(),
            };
            match self.authenticator.authenticate(&grant, self.region).await {
                Ok(session) => {
                    let session = if session.gcid.is_none() {
                        session.with_gcid(gcid)
                    } else {
                        session
                    };
                    return Ok(self.install(session).await);
                }
                Err(err) if self.credentials.is_some() && falls_back_to_password(&err) => {
                    warn!(
                        error = %err,
                        "Unable to get access token using refresh token, falling back to username/password"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let credentials = self.credentials.clone().ok_or_else(|| {
            ClientError::Auth("no valid refresh token and no credentials to log in with".into())
        })?;
        let captcha_token = self.captcha_token.lock().take();
        let grant = Grant::Password {
            credentials,
            captcha_token,
        };
        match self.authenticator.authenticate(&grant, self.region).await {
            Ok(session) => {
                info!("Logged in");
                Ok(self.install(session).await)
            }
            Err(err @ ClientError::CaptchaRequired { .. }) => {
                self.invalidate();
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    /// Replace the session and persist it
    async fn install(&self, session: Session) -> Session {
        *self.session.write() = Some(session.clone());
        if let Err(e) = self.store.save(&self.account, &session).await {
            warn!(store = self.store.name(), error = %e, "Failed to persist session");
        }
        session
    }
}

/// Refresh failures that may still be fixed by logging in again
fn falls_back_to_password(err: &ClientError) -> bool {
    !matches!(
        err,
        ClientError::Transient { .. }
            | ClientError::QuotaExceeded(_)
            | ClientError::Transport { .. }
            | ClientError::Cancelled
    )
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("account", &self.inner.account)
            .field("region", &self.inner.region)
            .field("session", &*self.inner.session.read())
            .field("store", &self.inner.store.name())
            .finish()
    }
}
