//! Test utilities for remotecar-client
//!
//! [`MockTransport`] and [`StaticAuthenticator`] replace the network in unit
//! tests. [`TestServer`] runs an axum router on a local port so that the
//! real [`ReqwestTransport`](crate::transport::ReqwestTransport) can be
//! exercised end to end.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::auth::{Authenticator, Grant};
use crate::error::{ClientError, Result};
use crate::region::{CaptchaProvider, Region, RegionEndpoints};
use crate::session::Session;
use crate::transport::{HttpRequest, HttpResponse, Transport};

type Handler = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// In-memory [`Transport`] routing requests by method and path.
///
/// Unrouted requests answer 404. Every request is recorded.
#[derive(Default)]
pub struct MockTransport {
    routes: Mutex<HashMap<(String, String), Handler>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Base URL to configure endpoints with; never actually dialled
    pub const BASE_URL: &'static str = "http://127.0.0.1:1";

    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with `handler`, replacing an earlier route
    pub fn on<F>(&self, method: &str, path: &str, handler: F)
    where
        F: Fn(&HttpRequest) -> HttpResponse + Send + Sync + 'static,
    {
        self.routes.lock().insert(
            (method.to_ascii_uppercase(), path.to_string()),
            Arc::new(handler),
        );
    }

    /// Number of requests received for `method path`
    pub fn calls(&self, method: &str, path: &str) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.method.as_str().eq_ignore_ascii_case(method) && r.url.path() == path)
            .count()
    }

    /// All requests received so far, oldest first
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        let key = (request.method.as_str().to_string(), request.url.path().to_string());
        let handler = self.routes.lock().get(&key).cloned();
        self.requests.lock().push(request.clone());

        Ok(match handler {
            Some(handler) => handler(&request),
            None => HttpResponse::new(404, format!("no route for {} {}", key.0, key.1)),
        })
    }
}

/// A token endpoint response as sent by the login service
pub fn token_response(access_token: &str, expires_in: i64) -> Value {
    json!({
        "access_token": access_token,
        "refresh_token": format!("refresh-{}", access_token),
        "expires_in": expires_in,
        "gcid": "gcid-1",
        "token_type": "Bearer",
    })
}

/// [`Authenticator`] issuing numbered tokens without any network.
///
/// Call `n` (1-based) yields `access-n`/`refresh-n`, valid for one hour.
/// Password grants without a captcha token fail with `CaptchaRequired`.
/// Failed calls are counted too.
#[derive(Default)]
pub struct StaticAuthenticator {
    calls: AtomicU32,
    grants: Mutex<Vec<Grant>>,
    delay: Option<Duration>,
    failure: Option<ClientError>,
    reject_refresh: bool,
}

impl StaticAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, to keep concurrent callers waiting
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with `error`
    pub fn failing_with(mut self, error: ClientError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Fail refresh grants as a revoked refresh token would
    pub fn rejecting_refresh(mut self) -> Self {
        self.reject_refresh = true;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Grants received so far, oldest first
    pub fn grants(&self) -> Vec<Grant> {
        self.grants.lock().clone()
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, grant: &Grant, region: Region) -> Result<Session> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.grants.lock().push(grant.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }

        match grant {
            Grant::RefreshToken { .. } if self.reject_refresh => {
                Err(ClientError::Auth("refresh token rejected".into()))
            }
            Grant::Password {
                captcha_token: None,
                ..
            } => Err(ClientError::CaptchaRequired { region }),
            _ => Ok(Session::issued(
                format!("access-{}", n),
                format!("refresh-{}", n),
                3600,
                Utc::now(),
                region,
            )),
        }
    }
}

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve an axum router on a free local port
    ///
    /// # Example
    ///
    /// ```ignore
    /// use remotecar_client::testing::TestServer;
    ///
    /// let server = TestServer::start(mock_backend()).await?;
    /// let config = ClientConfig::default().with_endpoints(server.endpoints());
    /// ```
    pub async fn start<S>(router: axum::Router<S>) -> Result<Self>
    where
        S: Clone + Send + Sync + 'static,
        axum::Router<S>: Into<axum::Router>,
    {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await.map_err(io_error)?;
        let addr = listener.local_addr().map_err(io_error)?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let router: axum::Router = router.into();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Endpoint set with API and login both served by this server.
    ///
    /// First logins do not require a captcha.
    pub fn endpoints(&self) -> RegionEndpoints {
        RegionEndpoints {
            captcha_required_on_first_login: false,
            ..RegionEndpoints::local(&self.base_url(), CaptchaProvider::ReCaptcha)
        }
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

fn io_error(err: std::io::Error) -> ClientError {
    ClientError::Transport {
        message: err.to_string(),
        timeout: false,
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Credentials;
    use url::Url;

    #[tokio::test]
    async fn test_mock_transport_routes_and_records() {
        let transport = MockTransport::new();
        transport.on("get", "/ping", |_| HttpResponse::new(200, "pong"));
        let url = Url::parse(MockTransport::BASE_URL).unwrap();

        let ok = transport.send(HttpRequest::get(url.join("/ping").unwrap())).await.unwrap();
        let missing = transport.send(HttpRequest::post(url.join("/ping").unwrap())).await.unwrap();

        assert_eq!(ok.text(), "pong");
        assert_eq!(missing.status, 404);
        assert_eq!(transport.calls("GET", "/ping"), 1);
        assert_eq!(transport.calls("POST", "/ping"), 1);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_static_authenticator_numbers_sessions() {
        let auth = StaticAuthenticator::new();
        let refresh = Grant::RefreshToken {
            refresh_token: "r".into(),
            gcid: None,
        };
        let no_captcha = Grant::Password {
            credentials: Credentials::new("user", "pw"),
            captcha_token: None,
        };

        let first = auth.authenticate(&refresh, Region::NorthAmerica).await.unwrap();
        let err = auth.authenticate(&no_captcha, Region::NorthAmerica).await.unwrap_err();
        let third = auth.authenticate(&refresh, Region::NorthAmerica).await.unwrap();

        assert_eq!(first.access_token, "access-1");
        assert_eq!(first.region, Region::NorthAmerica);
        assert!(matches!(err, ClientError::CaptchaRequired { .. }));
        assert_eq!(third.refresh_token, "refresh-3");
        assert_eq!(auth.calls(), 3);
    }

    #[tokio::test]
    async fn test_wait_for() {
        assert!(wait_for(|| async { true }, Duration::from_millis(50)).await);
        assert!(!wait_for(|| async { false }, Duration::from_millis(50)).await);
    }
}
