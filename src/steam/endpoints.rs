//! Provider origins, endpoint paths and request settings

use std::time::Duration;

/// Desktop browser user agent sent on every request. The provider rejects
/// trade calls that do not look like they come from its own web client.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub const RSA_KEY_PATH: &str = "/IAuthenticationService/GetPasswordRSAPublicKey/v1/";
pub const BEGIN_AUTH_PATH: &str = "/IAuthenticationService/BeginAuthSessionViaCredentials/v1/";
pub const GUARD_CODE_PATH: &str = "/IAuthenticationService/UpdateAuthSessionWithSteamGuardCode/v1/";
pub const POLL_AUTH_PATH: &str = "/IAuthenticationService/PollAuthSessionStatus/v1/";
pub const QUERY_TIME_PATH: &str = "/ITwoFactorService/QueryTime/v1/";
pub const GET_TRADE_OFFER_PATH: &str = "/IEconService/GetTradeOffer/v1/";
pub const NEW_TRADE_OFFER_PATH: &str = "/tradeoffer/new/send";

/// Base URLs of the provider's cooperating subdomains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEndpoints {
    /// Web API (auth, time, trade offer status)
    pub api: String,
    /// Community site: primary origin, trade offers, session cookies
    pub community: String,
    pub store: String,
    pub help: String,
    pub login: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            api: "https://api.steampowered.com".to_string(),
            community: "https://steamcommunity.com".to_string(),
            store: "https://store.steampowered.com".to_string(),
            help: "https://help.steampowered.com".to_string(),
            login: "https://login.steampowered.com".to_string(),
        }
    }
}

impl ProviderEndpoints {
    /// Every origin pointed at one base URL (local mocks, staging proxies)
    pub fn single_origin(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            api: base.clone(),
            community: base.clone(),
            store: base.clone(),
            help: base.clone(),
            login: base,
        }
    }

    pub fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.api.trim_end_matches('/'), path)
    }

    pub fn community_url(&self, path: &str) -> String {
        format!("{}{}", self.community.trim_end_matches('/'), path)
    }

    /// Origins that share the community login session
    pub fn secondary_origins(&self) -> [&str; 3] {
        [self.store.as_str(), self.help.as_str(), self.login.as_str()]
    }
}

/// Per-bot session settings
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub endpoints: ProviderEndpoints,
    /// Timeout applied to every provider request
    pub request_timeout: Duration,
    /// Token poll budget after the guard code is accepted
    pub poll_attempts: u32,
    /// Fixed delay between token polls
    pub poll_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            endpoints: ProviderEndpoints::default(),
            request_timeout: Duration::from_secs(30),
            poll_attempts: 2,
            poll_delay: Duration::from_secs(3),
        }
    }
}
