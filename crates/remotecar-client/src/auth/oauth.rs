//! Vendor login handshakes
//!
//! North America and rest of world use an OAuth authorization code flow with
//! PKCE. China uses an RSA-encrypted password login. Both regions support a
//! refresh token grant.

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::Utc;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};
use url::Url;

use super::pkce::Pkce;
use super::{Authenticator, Credentials, Grant};
use crate::error::{ClientError, Result};
use crate::pipeline::{send_with_retry, x_user_agent, RetryPolicy, USER_AGENT};
use crate::region::{Region, RegionEndpoints};
use crate::session::Session;
use crate::transport::{HttpRequest, HttpResponse, Transport};
use crate::vehicle::Brand;

const OAUTH_CONFIG_PATH: &str = "/eadrax-ucs/v1/presentation/oauth/config";
const CHINA_PUBLIC_KEY_PATH: &str = "/eadrax-coas/v1/cop/publickey";
const CHINA_LOGIN_PATH: &str = "/eadrax-coas/v2/login/pwd";
const CHINA_TOKEN_PATH: &str = "/eadrax-coas/v2/oauth/token";

/// Token lifetime assumed when the backend does not state one
const FALLBACK_EXPIRES_IN: i64 = 3600;

/// OAuth settings published by the API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OAuthSettings {
    client_id: String,
    #[serde(default)]
    client_secret: String,
    return_url: String,
    #[serde(default)]
    scopes: Vec<String>,
    token_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    gcid: Option<String>,
}

/// Which handshake step a response belongs to, for error mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Setup,
    Credentials,
    Refresh,
}

/// [`Authenticator`] speaking the vendor's login protocol
pub struct OAuthAuthenticator {
    transport: Arc<dyn Transport>,
    endpoints: Arc<RegionEndpoints>,
    policy: RetryPolicy,
}

impl OAuthAuthenticator {
    /// Create a new authenticator for an endpoint set
    pub fn new(
        transport: Arc<dyn Transport>,
        endpoints: Arc<RegionEndpoints>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            transport,
            endpoints,
            policy,
        }
    }

    async fn send(&self, request: HttpRequest, step: Step, region: Region) -> Result<HttpResponse> {
        let cancel = CancellationToken::new();
        let response =
            send_with_retry(self.transport.as_ref(), &self.policy, &request, &cancel).await?;
        check(response, step, region)
    }

    fn api_url(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&self.endpoints.api_base)?.join(path)?)
    }

    /// Login service URL. Relative endpoints resolve against `auth_base`,
    /// absolute ones are used as published.
    fn auth_url(&self, endpoint: &str) -> Result<Url> {
        Ok(Url::parse(&self.endpoints.auth_base)?.join(endpoint)?)
    }

    fn base_request(&self, request: HttpRequest, region: Region) -> HttpRequest {
        request
            .header("accept", "application/json")
            .header("user-agent", USER_AGENT)
            .header(
                "x-user-agent",
                x_user_agent(Brand::Bmw, &self.endpoints, region),
            )
            .header("x-identity-provider", "gcdm")
    }

    // =========================================================================
    // North America & rest of world
    // =========================================================================

    async fn oauth_settings(&self, region: Region) -> Result<OAuthSettings> {
        let mut request = self.base_request(HttpRequest::get(self.api_url(OAUTH_CONFIG_PATH)?), region);
        if let Some(key) = &self.endpoints.ocp_apim_key {
            request.set_header("ocp-apim-subscription-key", key.as_str());
        }
        let mut settings: OAuthSettings = self.send(request, Step::Setup, region).await?.json()?;
        if let Some(id) = &self.endpoints.client_id {
            settings.client_id = id.clone();
        }
        if let Some(secret) = &self.endpoints.client_secret {
            settings.client_secret = secret.clone();
        }
        Ok(settings)
    }

    fn basic_auth(settings: &OAuthSettings) -> String {
        let raw = format!("{}:{}", settings.client_id, settings.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }

    async fn login_oauth(
        &self,
        credentials: &Credentials,
        captcha_token: Option<&str>,
        region: Region,
    ) -> Result<Session> {
        let settings = self.oauth_settings(region).await?;
        let pkce = Pkce::generate();
        let authenticate_url = self.auth_url(&settings.token_endpoint.replace("/token", "/authenticate"))?;
        let token_url = self.auth_url(&settings.token_endpoint)?;

        let base_values = vec![
            ("client_id", settings.client_id.clone()),
            ("response_type", "code".to_string()),
            ("redirect_uri", settings.return_url.clone()),
            ("state", pkce.state.clone()),
            ("nonce", "login_nonce".to_string()),
            ("scope", settings.scopes.join(" ")),
            ("code_challenge", pkce.challenge.clone()),
            ("code_challenge_method", super::pkce::PKCE_METHOD.to_string()),
        ];

        // Username and password are exchanged for an authorization
        let mut fields = base_values.clone();
        fields.push(("grant_type", "authorization_code".to_string()));
        fields.push(("username", credentials.username.clone()));
        fields.push(("password", credentials.password.clone()));
        let mut request =
            self.base_request(HttpRequest::post(authenticate_url.clone()), region).form(fields);
        if let (Some(header), Some(token)) = (self.endpoints.captcha_provider.header_name(), captcha_token) {
            request.set_header(header, token);
        }
        let body: Value = self.send(request, Step::Credentials, region).await?.json()?;
        let redirect_to = body
            .get("redirect_to")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Auth("login response has no redirect_to".into()))?;
        let authorization = query_param(redirect_to, "authorization")
            .ok_or_else(|| ClientError::Auth("redirect_to carries no authorization".into()))?;

        // The authorization is exchanged for a code, delivered as a redirect
        let mut fields = base_values;
        fields.push(("authorization", authorization));
        let request = self.base_request(HttpRequest::post(authenticate_url), region).form(fields);
        let response = self.send(request, Step::Credentials, region).await?;
        let code = response
            .header("location")
            .and_then(|location| query_param(location, "code"))
            .ok_or_else(|| ClientError::Auth("authorization was not answered with a code".into()))?;

        // The code is exchanged for tokens
        let issued_at = Utc::now();
        let request = self
            .base_request(HttpRequest::post(token_url), region)
            .header("authorization", Self::basic_auth(&settings))
            .form([
                ("code", code),
                ("code_verifier", pkce.verifier),
                ("redirect_uri", settings.return_url.clone()),
                ("grant_type", "authorization_code".to_string()),
            ]);
        let tokens: TokenResponse = self.send(request, Step::Setup, region).await?.json()?;
        Ok(session_from(tokens, None, None, issued_at, region))
    }

    async fn refresh_oauth(
        &self,
        refresh_token: &str,
        gcid: Option<&str>,
        region: Region,
    ) -> Result<Session> {
        let settings = self.oauth_settings(region).await?;
        let issued_at = Utc::now();
        let request = self
            .base_request(HttpRequest::post(self.auth_url(&settings.token_endpoint)?), region)
            .header("authorization", Self::basic_auth(&settings))
            .form([
                ("scope", settings.scopes.join(" ")),
                ("redirect_uri", settings.return_url.clone()),
                ("grant_type", "refresh_token".to_string()),
                ("refresh_token", refresh_token.to_string()),
            ]);
        let tokens: TokenResponse = self.send(request, Step::Refresh, region).await?.json()?;
        Ok(session_from(tokens, Some(refresh_token), gcid, issued_at, region))
    }

    // =========================================================================
    // China
    // =========================================================================

    async fn login_china(
        &self,
        credentials: &Credentials,
        captcha_token: Option<&str>,
        region: Region,
    ) -> Result<Session> {
        let request = self.base_request(HttpRequest::get(self.api_url(CHINA_PUBLIC_KEY_PATH)?), region);
        let body: Value = self.send(request, Step::Setup, region).await?.json()?;
        let pem = body
            .pointer("/data/value")
            .and_then(Value::as_str)
            .ok_or_else(|| ClientError::Auth("public key response has no data.value".into()))?;
        let encrypted = encrypt_password(pem, &credentials.password)?;

        let mut login = json!({
            "mobile": credentials.username,
            "password": encrypted,
        });
        if let Some(token) = captcha_token {
            login["verifyId"] = Value::String(token.to_string());
        }

        let issued_at = Utc::now();
        let request = self
            .base_request(HttpRequest::post(self.api_url(CHINA_LOGIN_PATH)?), region)
            .json(login);
        let body: Value = self.send(request, Step::Credentials, region).await?.json()?;
        let tokens = china_tokens(body)?;
        Ok(session_from(tokens, None, None, issued_at, region))
    }

    async fn refresh_china(
        &self,
        refresh_token: &str,
        gcid: Option<&str>,
        region: Region,
    ) -> Result<Session> {
        let mut request = self
            .base_request(HttpRequest::post(self.api_url(CHINA_TOKEN_PATH)?), region)
            .form([
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ]);
        if let Some(gcid) = gcid {
            request.set_header("gcid", gcid);
        }
        let issued_at = Utc::now();
        let body: Value = self.send(request, Step::Refresh, region).await?.json()?;
        let tokens = china_tokens(body)?;
        Ok(session_from(tokens, Some(refresh_token), gcid, issued_at, region))
    }
}

#[async_trait]
impl Authenticator for OAuthAuthenticator {
    #[instrument(skip(self, grant, region), fields(grant = grant.kind(), region = %region))]
    async fn authenticate(&self, grant: &Grant, region: Region) -> Result<Session> {
        match grant {
            Grant::Password {
                credentials,
                captcha_token,
            } => {
                if captcha_token.is_none() && self.endpoints.captcha_required_on_first_login {
                    return Err(ClientError::CaptchaRequired { region });
                }
                info!("Authenticating with username and password");
                match region {
                    Region::China => {
                        self.login_china(credentials, captcha_token.as_deref(), region)
                            .await
                    }
                    Region::NorthAmerica | Region::RestOfWorld => {
                        self.login_oauth(credentials, captcha_token.as_deref(), region)
                            .await
                    }
                }
            }
            Grant::RefreshToken {
                refresh_token,
                gcid,
            } => {
                info!("Authenticating with refresh token");
                match region {
                    Region::China => {
                        self.refresh_china(refresh_token, gcid.as_deref(), region)
                            .await
                    }
                    Region::NorthAmerica | Region::RestOfWorld => {
                        self.refresh_oauth(refresh_token, gcid.as_deref(), region)
                            .await
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for OAuthAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthAuthenticator")
            .field("auth_base", &self.endpoints.auth_base)
            .field("api_base", &self.endpoints.api_base)
            .finish()
    }
}

/// Map a non-success handshake response to an error
fn check(response: HttpResponse, step: Step, region: Region) -> Result<HttpResponse> {
    // The code step answers with a redirect
    if response.is_success() || (300..400).contains(&response.status) {
        return Ok(response);
    }

    let body = response.text();
    debug!(status = response.status, ?step, "Login step rejected");

    if body.to_ascii_lowercase().contains("captcha") {
        return Err(ClientError::CaptchaRequired { region });
    }
    match (step, response.status) {
        (Step::Credentials, 400 | 401 | 403) => Err(ClientError::InvalidCredentials(body)),
        (Step::Refresh, 400 | 401 | 403) => Err(ClientError::Auth(format!(
            "refresh token rejected (HTTP {}): {}",
            response.status, body
        ))),
        (_, status) => Err(ClientError::api(status, body)),
    }
}

/// Read a query parameter from an absolute URL or an app redirect URI
fn query_param(location: &str, name: &str) -> Option<String> {
    let query = location.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// Encrypt the password with the published RSA key (PKCS#1 v1.5, base64)
fn encrypt_password(pem: &str, password: &str) -> Result<String> {
    let pem = if pem.contains("-----BEGIN") {
        pem.to_string()
    } else {
        format!("-----BEGIN PUBLIC KEY-----\n{}\n-----END PUBLIC KEY-----\n", pem.trim())
    };
    let key = RsaPublicKey::from_public_key_pem(&pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(&pem))
        .map_err(|e| ClientError::Auth(format!("invalid login public key: {}", e)))?;
    let mut rng = rand::thread_rng();
    let encrypted = key
        .encrypt(&mut rng, Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| ClientError::Auth(format!("password encryption failed: {}", e)))?;
    Ok(STANDARD.encode(encrypted))
}

/// Tokens sit under `data` in China responses
fn china_tokens(body: Value) -> Result<TokenResponse> {
    let data = body
        .get("data")
        .cloned()
        .ok_or_else(|| ClientError::Auth("login response has no data".into()))?;
    let mut tokens: TokenResponse = serde_json::from_value(data)?;
    if tokens.expires_in.is_none() {
        tokens.expires_in = jwt_expiry(&tokens.access_token).map(|exp| exp.saturating_sub(Utc::now().timestamp()));
    }
    Ok(tokens)
}

/// `exp` claim of an unverified JWT
fn jwt_expiry(token: &str) -> Option<i64> {
    let payload = token.split('.').nth(1)?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    claims.get("exp")?.as_i64()
}

fn session_from(
    tokens: TokenResponse,
    previous_refresh: Option<&str>,
    previous_gcid: Option<&str>,
    issued_at: chrono::DateTime<Utc>,
    region: Region,
) -> Session {
    // Some refresh responses do not rotate the refresh token
    let refresh_token = tokens
        .refresh_token
        .or_else(|| previous_refresh.map(str::to_string))
        .unwrap_or_default();
    Session::issued(
        tokens.access_token,
        refresh_token,
        tokens.expires_in.unwrap_or(FALLBACK_EXPIRES_IN),
        issued_at,
        region,
    )
    .with_gcid(tokens.gcid.or_else(|| previous_gcid.map(str::to_string)))
}
