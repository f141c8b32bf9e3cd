//! Regions and their endpoint sets
//!
//! Every account lives in exactly one region. The region decides which hosts
//! are contacted, which login handshake is used and which captcha provider
//! protects the first password login.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Backend region of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    NorthAmerica,
    China,
    RestOfWorld,
}

impl Region {
    /// All known regions
    pub fn all() -> [Region; 3] {
        [Region::NorthAmerica, Region::China, Region::RestOfWorld]
    }

    /// Lower-case name as accepted by [`FromStr`]
    pub fn as_str(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "north_america",
            Region::China => "china",
            Region::RestOfWorld => "rest_of_world",
        }
    }

    /// Short region code sent in the `x-user-agent` header
    pub fn code(&self) -> &'static str {
        match self {
            Region::NorthAmerica => "na",
            Region::China => "cn",
            Region::RestOfWorld => "row",
        }
    }

    /// Built-in endpoint set for this region
    pub fn endpoints(&self) -> RegionEndpoints {
        match self {
            Region::NorthAmerica => RegionEndpoints {
                api_base: "https://cocoapi.bmwgroup.us".into(),
                auth_base: "https://login.bmwusa.com".into(),
                client_id: None,
                client_secret: None,
                ocp_apim_key: None,
                captcha_provider: CaptchaProvider::HCaptcha,
                captcha_required_on_first_login: true,
                app_version: DEFAULT_APP_VERSION.into(),
            },
            Region::RestOfWorld => RegionEndpoints {
                api_base: "https://cocoapi.bmwgroup.com".into(),
                auth_base: "https://customer.bmwgroup.com".into(),
                client_id: None,
                client_secret: None,
                ocp_apim_key: None,
                captcha_provider: CaptchaProvider::ReCaptcha,
                captcha_required_on_first_login: true,
                app_version: DEFAULT_APP_VERSION.into(),
            },
            Region::China => RegionEndpoints {
                api_base: "https://myprofile.bmw.com.cn".into(),
                auth_base: "https://myprofile.bmw.com.cn".into(),
                client_id: None,
                client_secret: None,
                ocp_apim_key: None,
                captcha_provider: CaptchaProvider::SliderCaptcha,
                captcha_required_on_first_login: true,
                app_version: DEFAULT_APP_VERSION.into(),
            },
        }
    }
}

const DEFAULT_APP_VERSION: &str = "4.9.2(36892)";

/// Comma separated list of valid region names
pub fn valid_regions() -> String {
    Region::all()
        .iter()
        .map(Region::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Region {
    type Err = ClientError;

    /// Case-insensitive lookup by name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Region::all()
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ClientError::UnknownRegion {
                name: s.to_string(),
                valid: valid_regions(),
            })
    }
}

/// Who issues the captcha tokens a region expects on password login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaProvider {
    /// hCaptcha, token sent as the `hcaptchatoken` header
    #[serde(rename = "hcaptcha")]
    HCaptcha,
    /// reCAPTCHA, token sent as the `recaptchatoken` header
    #[serde(rename = "recaptcha")]
    ReCaptcha,
    /// Slider captcha, verification id sent in the login body
    SliderCaptcha,
}

impl CaptchaProvider {
    /// Header carrying the captcha token, if the provider uses one
    pub fn header_name(&self) -> Option<&'static str> {
        match self {
            CaptchaProvider::HCaptcha => Some("hcaptchatoken"),
            CaptchaProvider::ReCaptcha => Some("recaptchatoken"),
            CaptchaProvider::SliderCaptcha => None,
        }
    }
}

/// Endpoint set of one region
///
/// Immutable once an account is built. Can be overridden from configuration,
/// which is how tests point an account at a local mock backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionEndpoints {
    /// Base URL of the vehicle API
    pub api_base: String,

    /// Base URL of the login service. Relative token endpoints published by
    /// the OAuth config resolve against it; China logs in on the API host.
    pub auth_base: String,

    /// OAuth client id, when not delivered by the OAuth config endpoint
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth client secret, when not delivered by the OAuth config endpoint
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Subscription key for the OAuth config endpoint
    #[serde(default)]
    pub ocp_apim_key: Option<String>,

    pub captcha_provider: CaptchaProvider,

    /// Password logins without a prior refresh token need a captcha token
    #[serde(default = "default_true")]
    pub captcha_required_on_first_login: bool,

    /// App version reported in `x-user-agent`
    #[serde(default = "default_app_version")]
    pub app_version: String,
}

fn default_true() -> bool {
    true
}

fn default_app_version() -> String {
    DEFAULT_APP_VERSION.to_string()
}

impl RegionEndpoints {
    /// Endpoint set pointing both API and login at one base URL
    pub fn local(base_url: &str, captcha_provider: CaptchaProvider) -> Self {
        Self {
            api_base: base_url.trim_end_matches('/').to_string(),
            auth_base: base_url.trim_end_matches('/').to_string(),
            client_id: None,
            client_secret: None,
            ocp_apim_key: None,
            captcha_provider,
            captcha_required_on_first_login: true,
            app_version: default_app_version(),
        }
    }
}
