//! Integration tests for remotecar-client
//!
//! These tests spin up an axum mock of the vendor backend and drive an
//! account through the real reqwest transport: OAuth login with redirects,
//! vehicle state, remote commands and the retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use remotecar_client::testing::{wait_for, TestServer};
use remotecar_client::{
    Account, ClientConfig, ClientError, CommandStatus, Credentials, FileTokenStore, Login,
    PollingConfig, Region, RemoteCommand, RetryConfig, TokenStore, WaitOptions,
};

const VIN: &str = "WBA00000000000001";
const EVENT_ID: &str = "event-1";

// =============================================================================
// Mock Backend
// =============================================================================

#[derive(Default)]
struct Backend {
    /// `grant_type` of every token request
    grants: Mutex<Vec<String>>,
    issued: AtomicU32,
    state_calls: AtomicU32,
    /// Answer the next state request with 401
    reject_next_state: AtomicBool,
    /// Answer this many state requests with 429 first
    rate_limited: AtomicU32,
    status_polls: AtomicU32,
}

impl Backend {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("Bearer access-"))
    }
}

type Shared = Arc<Backend>;

fn router(backend: Shared) -> Router {
    Router::new()
        .route("/eadrax-ucs/v1/presentation/oauth/config", get(oauth_config))
        .route("/gcdm/oauth/authenticate", post(authenticate))
        .route("/gcdm/oauth/token", post(token))
        .route("/eadrax-vcs/v4/vehicles", get(vehicles))
        .route("/eadrax-vcs/v4/vehicles/state", get(vehicle_state))
        .route(
            "/eadrax-vrccs/v3/presentation/remote-commands/{vin}/{service}",
            post(remote_command),
        )
        .route(
            "/eadrax-vrccs/v3/presentation/remote-commands/eventStatus",
            post(event_status),
        )
        .with_state(backend)
}

async fn oauth_config(headers: HeaderMap) -> Json<serde_json::Value> {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("127.0.0.1");
    Json(json!({
        "clientId": "client-id",
        "clientSecret": "client-secret",
        "returnUrl": "com.example.app://oauth",
        "scopes": ["openid", "profile"],
        "tokenEndpoint": format!("http://{}/gcdm/oauth/token", host),
    }))
}

async fn authenticate(Form(form): Form<HashMap<String, String>>) -> Response {
    if form.contains_key("username") {
        if form.get("password").map(String::as_str) != Some("secret") {
            return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
        }
        return Json(json!({
            "redirect_to": "redirect_uri=com.example.app://oauth?authorization=auth-1&state=x"
        }))
        .into_response();
    }
    if form.get("authorization").map(String::as_str) != Some("auth-1") {
        return (StatusCode::BAD_REQUEST, "unknown authorization").into_response();
    }
    (
        StatusCode::FOUND,
        [(header::LOCATION, "com.example.app://oauth?code=code-1&state=x")],
    )
        .into_response()
}

async fn token(
    State(backend): State<Shared>,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !basic.starts_with("Basic ") {
        return (StatusCode::UNAUTHORIZED, "client authentication missing").into_response();
    }

    let grant = form.get("grant_type").cloned().unwrap_or_default();
    backend.grants.lock().push(grant.clone());
    match grant.as_str() {
        "authorization_code" if form.get("code").map(String::as_str) == Some("code-1") => {}
        "refresh_token" if form.get("refresh_token").is_some_and(|t| t.starts_with("refresh-")) => {}
        _ => return (StatusCode::BAD_REQUEST, "invalid_grant").into_response(),
    }

    let n = backend.issued.fetch_add(1, Ordering::SeqCst) + 1;
    Json(json!({
        "access_token": format!("access-{}", n),
        "refresh_token": format!("refresh-{}", n),
        "expires_in": 3600,
        "gcid": "gcid-1",
        "token_type": "Bearer",
    }))
    .into_response()
}

async fn vehicles(State(backend): State<Shared>, headers: HeaderMap) -> Response {
    if !backend.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let agent = headers
        .get("x-user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if agent.contains(";mini;") {
        return Json(json!([])).into_response();
    }
    Json(json!([{
        "vin": VIN,
        "attributes": {"model": "i4 eDrive40", "licensePlate": "M-AB 123"}
    }]))
    .into_response()
}

async fn vehicle_state(
    State(backend): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !backend.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    backend.state_calls.fetch_add(1, Ordering::SeqCst);

    if backend.reject_next_state.swap(false, Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, "token expired").into_response();
    }
    let limited = backend
        .rate_limited
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if limited {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, "0")],
            "Rate limit is exceeded",
        )
            .into_response();
    }

    assert!(query.contains_key("appDateTime"));
    let vin = headers
        .get("bmw-vin")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    Json(json!({
        "state": {"vin": vin, "currentMileage": 1234},
        "capabilities": {"lock": true, "unlock": true, "lights": true}
    }))
    .into_response()
}

async fn remote_command(
    State(backend): State<Shared>,
    headers: HeaderMap,
    Path((vin, service)): Path<(String, String)>,
) -> Response {
    if !backend.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if vin != VIN || service != "door-lock" {
        return (StatusCode::NOT_FOUND, "unknown service").into_response();
    }
    Json(json!({"eventId": EVENT_ID, "creationTime": "2024-01-01T00:00:00Z"})).into_response()
}

async fn event_status(
    State(backend): State<Shared>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if !backend.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if query.get("eventId").map(String::as_str) != Some(EVENT_ID) {
        return (StatusCode::NOT_FOUND, "unknown event").into_response();
    }
    let n = backend.status_polls.fetch_add(1, Ordering::SeqCst);
    let status = if n < 2 { "PENDING" } else { "EXECUTED" };
    Json(json!({"eventStatus": status})).into_response()
}

// =============================================================================
// Helpers
// =============================================================================

async fn start() -> (TestServer, Shared) {
    let backend = Shared::default();
    let server = TestServer::start(router(backend.clone())).await.unwrap();
    (server, backend)
}

fn config(server: &TestServer) -> ClientConfig {
    ClientConfig::default()
        .with_endpoints(server.endpoints())
        .with_retry(RetryConfig {
            base_delay_ms: 10,
            max_delay_ms: 100,
            ..RetryConfig::default()
        })
        .with_polling(PollingConfig {
            interval_ms: 10,
            timeout_ms: 5_000,
            max_interval_ms: None,
        })
}

async fn account(server: &TestServer, password: &str) -> Account {
    Account::builder(Credentials::new("user@example.com", password), Region::RestOfWorld)
        .config(config(server))
        .build()
        .await
        .unwrap()
}

// =============================================================================
// Login Tests
// =============================================================================

#[tokio::test]
async fn test_password_login_follows_oauth_flow() {
    let (server, backend) = start().await;
    let account = account(&server, "secret").await;

    let session = account.login(&CancellationToken::new()).await.unwrap();

    assert_eq!(session.access_token, "access-1");
    assert_eq!(session.refresh_token, "refresh-1");
    assert_eq!(account.gcid().as_deref(), Some("gcid-1"));
    assert_eq!(*backend.grants.lock(), vec!["authorization_code".to_string()]);
}

#[tokio::test]
async fn test_wrong_password_is_invalid_credentials() {
    let (server, _backend) = start().await;
    let account = account(&server, "wrong").await;

    let err = account.login(&CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidCredentials(_)));
}

#[tokio::test]
async fn test_refresh_token_login() {
    let (server, backend) = start().await;
    let account = Account::builder(
        Login::RefreshToken {
            refresh_token: "refresh-external".into(),
            gcid: Some("gcid-external".into()),
        },
        Region::RestOfWorld,
    )
    .config(config(&server))
    .build()
    .await
    .unwrap();

    account.login(&CancellationToken::new()).await.unwrap();
    assert_eq!(*backend.grants.lock(), vec!["refresh_token".to_string()]);
    assert_eq!(account.refresh_token().as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_session_is_restored_from_file_store() {
    let (server, backend) = start().await;
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileTokenStore::new(dir.path().join("tokens.json")));

    let first = Account::builder(Credentials::new("user@example.com", "secret"), Region::RestOfWorld)
        .config(config(&server))
        .token_store(store.clone())
        .build()
        .await
        .unwrap();
    first.login(&CancellationToken::new()).await.unwrap();
    assert!(store.load("user@example.com").await.unwrap().is_some());

    let second = Account::builder(Credentials::new("user@example.com", "secret"), Region::RestOfWorld)
        .config(config(&server))
        .token_store(store)
        .build()
        .await
        .unwrap();
    let session = second.login(&CancellationToken::new()).await.unwrap();

    assert_eq!(session.access_token, "access-1");
    assert_eq!(backend.grants.lock().len(), 1);
}

// =============================================================================
// Vehicle Tests
// =============================================================================

#[tokio::test]
async fn test_get_vehicles_end_to_end() {
    let (server, _backend) = start().await;
    let account = account(&server, "secret").await;

    let vehicles = account
        .get_vehicles(false, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(vehicles.len(), 1);
    assert_eq!(vehicles[0].vin, VIN);
    assert_eq!(vehicles[0].model.as_deref(), Some("i4 eDrive40"));
    assert_eq!(vehicles[0].state["currentMileage"], json!(1234));
    assert!(vehicles[0].capabilities.lock);
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_once() {
    let (server, backend) = start().await;
    let account = account(&server, "secret").await;
    let cancel = CancellationToken::new();
    account.login(&cancel).await.unwrap();

    backend.reject_next_state.store(true, Ordering::SeqCst);
    account.get_vehicles(false, &cancel).await.unwrap();

    assert_eq!(
        *backend.grants.lock(),
        vec!["authorization_code".to_string(), "refresh_token".to_string()]
    );
    assert_eq!(backend.state_calls.load(Ordering::SeqCst), 2);
    assert_eq!(account.refresh_token().as_deref(), Some("refresh-2"));
}

#[tokio::test]
async fn test_rate_limited_state_is_retried() {
    let (server, backend) = start().await;
    let account = account(&server, "secret").await;
    backend.rate_limited.store(2, Ordering::SeqCst);

    let vehicles = account
        .get_vehicles(false, &CancellationToken::new())
        .await
        .unwrap();

    assert!(vehicles[0].has_state());
    assert_eq!(backend.state_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_rate_limit_is_transient() {
    let (server, backend) = start().await;
    let account = account(&server, "secret").await;
    backend.rate_limited.store(100, Ordering::SeqCst);

    let err = account
        .get_vehicles(false, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        ClientError::Transient {
            status, attempts, ..
        } => {
            assert_eq!(status, Some(429));
            assert_eq!(attempts, 4);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

// =============================================================================
// Remote Command Tests
// =============================================================================

#[tokio::test]
async fn test_remote_command_is_followed_to_final_status() {
    let (server, backend) = start().await;
    let account = account(&server, "secret").await;

    let event = account
        .execute(VIN, &RemoteCommand::DoorLock, None, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(event.event_id.as_deref(), Some(EVENT_ID));
    assert_eq!(event.status, CommandStatus::Executed);
    assert_eq!(event.poll_count, 3);
    assert_eq!(backend.status_polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_cancelled_wait_stops_polling() {
    let (server, backend) = start().await;
    let account = account(&server, "secret").await;
    let cancel = CancellationToken::new();
    let vehicle = account.vehicle(VIN, &cancel).await.unwrap();

    let event = account
        .remote()
        .submit(&vehicle, &RemoteCommand::DoorLock, &cancel)
        .await
        .unwrap();

    // Cancel once the first poll has reached the backend
    let waiter = cancel.clone();
    let watched = backend.clone();
    tokio::spawn(async move {
        wait_for(
            || {
                let backend = watched.clone();
                async move { backend.status_polls.load(Ordering::SeqCst) >= 1 }
            },
            Duration::from_secs(5),
        )
        .await;
        waiter.cancel();
    });
    let options = WaitOptions::new(Duration::from_secs(60), Duration::from_secs(10));
    let err = account
        .remote()
        .wait(event.event_id.as_deref().unwrap(), event.brand, &options, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, ClientError::Cancelled));
    assert_eq!(backend.status_polls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsupported_command_is_not_sent() {
    let (server, _backend) = start().await;
    let account = account(&server, "secret").await;

    let err = account
        .execute(VIN, &RemoteCommand::Horn, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedCommand { .. }));
}
