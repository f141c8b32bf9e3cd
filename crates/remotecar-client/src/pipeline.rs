//! HTTP request pipeline
//!
//! Wraps every API call with the session bearer token, the region and brand
//! headers, re-authentication on 401 and backoff on rate limits, server
//! errors and network failures.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::anonymize::ResponseRecorder;
use crate::auth::SessionManager;
use crate::error::{ClientError, Result};
use crate::region::{Region, RegionEndpoints};
use crate::transport::{HttpRequest, HttpResponse, Method, Transport};
use crate::vehicle::Brand;

/// Android build reported in `x-user-agent`
const ANDROID_BUILD: &str = "AP2A.240605.024";

/// Value of the `user-agent` header
pub const USER_AGENT: &str = "Dart/3.3 (dart:io)";

/// Backoff schedule for rate limits, server errors and network failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Wait exactly as long as `Retry-After` asks
    pub honor_retry_after: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            honor_retry_after: true,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// Exponential `base * 2^attempt` capped at `max_delay`. A server hint
    /// wins when honoured; `None` means the server asked for more than
    /// `max_delay` and retrying is pointless.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Option<Duration> {
        match retry_after {
            Some(hint) if self.honor_retry_after => (hint <= self.max_delay).then_some(hint),
            _ => {
                let factor = 2u32.saturating_pow(attempt);
                Some(
                    self.base_delay
                        .checked_mul(factor)
                        .unwrap_or(self.max_delay)
                        .min(self.max_delay),
                )
            }
        }
    }
}

/// Why a response or failure is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryReason {
    RateLimited,
    Quota,
    ServerError,
    Network,
}

fn classify(response: &HttpResponse) -> Option<RetryReason> {
    match response.status {
        429 => Some(RetryReason::RateLimited),
        403 if response.text().to_ascii_lowercase().contains("quota") => Some(RetryReason::Quota),
        500..=599 => Some(RetryReason::ServerError),
        _ => None,
    }
}

/// Delay hinted by a rate limit body such as "Try again in 2 seconds."
fn body_retry_hint(body: &str) -> Option<Duration> {
    static HINT: OnceLock<Option<Regex>> = OnceLock::new();
    let re = HINT
        .get_or_init(|| Regex::new(r"(?i)try again in (\d+) seconds?").ok())
        .as_ref()?;
    let secs = re.captures(body)?.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Sleep unless cancelled first
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
    }
}

/// Send a request, retrying rate limits, quota rejections, server errors and
/// network failures according to `policy`.
///
/// Every other response (including 401) is returned to the caller.
pub(crate) async fn send_with_retry(
    transport: &dyn Transport,
    policy: &RetryPolicy,
    request: &HttpRequest,
    cancel: &CancellationToken,
) -> Result<HttpResponse> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let sent = tokio::select! {
            r = transport.send(request.clone()) => r,
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        };

        let (reason, status, message, retry_after) = match sent {
            Ok(response) => match classify(&response) {
                None => return Ok(response),
                Some(reason) => {
                    let body = response.text();
                    let hint = response.retry_after().or_else(|| body_retry_hint(&body));
                    (reason, Some(response.status), body, hint)
                }
            },
            Err(err) if err.is_retryable() => (RetryReason::Network, None, err.to_string(), None),
            Err(err) => return Err(err),
        };

        let delay = if attempt < policy.max_retries {
            policy.delay_for(attempt, retry_after)
        } else {
            None
        };

        let Some(delay) = delay else {
            let attempts = attempt + 1;
            warn!(
                url = %request.url.path(),
                attempts,
                ?status,
                "Giving up after retryable failures"
            );
            return Err(match reason {
                RetryReason::Quota => ClientError::QuotaExceeded(message),
                _ => ClientError::Transient {
                    status,
                    attempts,
                    message,
                },
            });
        };

        warn!(
            url = %request.url.path(),
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            ?status,
            ?reason,
            "Retrying request"
        );
        sleep_or_cancel(delay, cancel).await?;
        attempt += 1;
    }
}

/// `x-user-agent` header value
pub fn x_user_agent(brand: Brand, endpoints: &RegionEndpoints, region: Region) -> String {
    format!(
        "android({});{};{};{}",
        ANDROID_BUILD,
        brand.as_str(),
        endpoints.app_version,
        region.code()
    )
}

/// One call through the pipeline
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the region's API base
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub brand: Brand,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            brand: Brand::Bmw,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn brand(mut self, brand: Brand) -> Self {
        self.brand = brand;
        self
    }
}

/// Authenticated request pipeline of one account
pub struct ApiPipeline {
    transport: Arc<dyn Transport>,
    sessions: Arc<SessionManager>,
    endpoints: Arc<RegionEndpoints>,
    region: Region,
    policy: RetryPolicy,
    recorder: Option<Arc<ResponseRecorder>>,
}

impl ApiPipeline {
    /// Create a new pipeline
    pub fn new(
        transport: Arc<dyn Transport>,
        sessions: Arc<SessionManager>,
        endpoints: Arc<RegionEndpoints>,
        region: Region,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            sessions,
            endpoints,
            region,
            policy,
            recorder: None,
        }
    }

    /// Keep anonymized copies of successful responses
    pub fn with_recorder(mut self, recorder: Arc<ResponseRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Execute a request.
    ///
    /// A 401 invalidates the session, re-authenticates once and repeats the
    /// call once; a second 401 is an `Auth` error. Other non-2xx statuses
    /// surface as `Api` errors.
    #[instrument(skip(self, request, cancel), fields(method = %request.method, path = %request.path))]
    pub async fn request(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<HttpResponse> {
        let mut url = Url::parse(&self.endpoints.api_base)?.join(&request.path)?;
        if !request.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&request.query);
        }

        let mut reauthenticated = false;
        loop {
            let token = self.sessions.bearer_token(cancel).await?;
            let http = self.build(&request, url.clone(), &token);

            let response =
                send_with_retry(self.transport.as_ref(), &self.policy, &http, cancel).await?;

            if response.status == 401 {
                if reauthenticated {
                    return Err(ClientError::Auth(format!(
                        "request to {} rejected after re-authentication",
                        request.path
                    )));
                }
                warn!("Access token rejected, re-authenticating");
                self.sessions.invalidate_if_current(&token);
                reauthenticated = true;
                continue;
            }

            self.sessions.touch();
            debug!(status = response.status, "Response received");

            if !response.is_success() {
                return Err(ClientError::api(response.status, response.text()));
            }

            if let Some(recorder) = &self.recorder {
                let vin = request
                    .headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("bmw-vin"))
                    .map(|(_, value)| value.as_str());
                recorder.record(request.brand, &request.path, vin, &response);
            }
            return Ok(response);
        }
    }

    /// GET a path and deserialize the JSON response
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T> {
        self.request(request, cancel).await?.json()
    }

    /// POST and deserialize the JSON response. An empty body reads as `null`.
    pub async fn post_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let response = self.request(request, cancel).await?;
        if response.body.iter().all(u8::is_ascii_whitespace) {
            return serde_json::from_value(Value::Null).map_err(ClientError::parse);
        }
        response.json()
    }

    fn build(&self, request: &ApiRequest, url: Url, token: &str) -> HttpRequest {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let mut http = HttpRequest::new(request.method.clone(), url)
            .header("accept", "application/json")
            .header("accept-language", "en")
            .header("user-agent", USER_AGENT)
            .header(
                "x-user-agent",
                x_user_agent(request.brand, &self.endpoints, self.region),
            )
            .header("x-identity-provider", "gcdm")
            .header("x-correlation-id", correlation_id.as_str())
            .header("bmw-correlation-id", correlation_id.as_str())
            .header("bmw-units-preferences", "d=KM;v=L;p=B;ec=KWH100KM;fc=L100KM;em=GKM;")
            .header("24-hour-format", "true")
            .header("authorization", format!("Bearer {}", token));
        for (name, value) in &request.headers {
            http.set_header(name, value.as_str());
        }
        if let Some(body) = &request.body {
            http = http.json(body.clone());
        }
        http
    }
}

impl std::fmt::Debug for ApiPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiPipeline")
            .field("region", &self.region)
            .field("api_base", &self.endpoints.api_base)
            .field("policy", &self.policy)
            .finish()
    }
}
