//! Bot login and session state
//!
//! `SessionManager` owns one bot's HTTP client and cookie jar and drives the
//! provider login handshake:
//!
//! 1. Fetch a fresh RSA public key for the account (never cached)
//! 2. Submit the PKCS#1 v1.5 encrypted password to begin an auth session
//! 3. Submit a guard code computed against the provider clock
//! 4. Poll for the access/refresh token pair
//! 5. Install the login cookie and copy the session cookies to the
//!    secondary origins
//!
//! A successful login yields an `AuthenticatedSession`, which is what the
//! trade-offer client is built on.

use super::endpoints::{
    SessionSettings, BEGIN_AUTH_PATH, GUARD_CODE_PATH, POLL_AUTH_PATH, QUERY_TIME_PATH,
    RSA_KEY_PATH, USER_AGENT,
};
use super::errors::{AuthError, CodeGenerationError};
use super::guard::{generate_guard_code, ServerClock};
use crate::services::retry::{poll_with_fixed_delay, PollConfig};
use crate::types::BotCredentials;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER};
use reqwest::{Client, Url};
use rsa::{BigUint, Pkcs1v15Encrypt, RsaPublicKey};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Session identifier cookie shared by every origin
pub const SESSION_ID_COOKIE: &str = "sessionid";
/// Secure login cookie carrying the access token
pub const LOGIN_SECURE_COOKIE: &str = "steamLoginSecure";

/// Cookies every fresh jar starts with
const SEED_COOKIES: [&str; 2] = ["Steam_Language=english; Path=/", "timezoneOffset=0,0; Path=/"];

/// Access/refresh token pair returned by the token poll
#[derive(Clone, Default)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

impl fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    response: T,
}

#[derive(Debug, Default, Deserialize)]
struct HandshakeParameters {
    #[serde(default)]
    publickey_mod: String,
    #[serde(default)]
    publickey_exp: String,
    #[serde(default, deserialize_with = "string_or_number")]
    timestamp: String,
}

/// Challenge handed out when the encrypted credentials are accepted
#[derive(Debug, Default, Deserialize)]
struct AuthChallenge {
    #[serde(default, deserialize_with = "string_or_number")]
    client_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    request_id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    steamid: String,
}

#[derive(Debug, Default, Deserialize)]
struct PollStatus {
    #[serde(default)]
    access_token: String,
    #[serde(default)]
    refresh_token: String,
}

/// The provider sends 64-bit ids sometimes quoted, sometimes bare
pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Provider clock backed by the two-factor time endpoint
#[derive(Clone)]
pub struct ProviderClock {
    client: Client,
    url: String,
}

impl ProviderClock {
    pub fn new(client: Client, settings: &SessionSettings) -> Self {
        Self {
            client,
            url: settings.endpoints.api_url(QUERY_TIME_PATH),
        }
    }
}

#[async_trait]
impl ServerClock for ProviderClock {
    async fn server_time(&self) -> Result<i64, CodeGenerationError> {
        let response = self
            .client
            .post(&self.url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| CodeGenerationError::TimeSource(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CodeGenerationError::TimeSource(format!("HTTP {}", status)));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| CodeGenerationError::TimeSource(e.to_string()))?;
        parse_server_time(&body)
    }
}

/// Extract `response.server_time`, which may be a number or a numeric string
pub(crate) fn parse_server_time(body: &serde_json::Value) -> Result<i64, CodeGenerationError> {
    let raw = body
        .get("response")
        .and_then(|r| r.get("server_time"))
        .ok_or_else(|| CodeGenerationError::TimeSource("server_time missing".into()))?;

    let server_time = match raw {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
    .ok_or_else(|| CodeGenerationError::TimeSource(format!("unexpected server_time {}", raw)))?;

    if server_time <= 0 {
        return Err(CodeGenerationError::TimeSource(format!(
            "invalid server_time {}",
            server_time
        )));
    }
    Ok(server_time)
}

/// Value of the secure login cookie for a bot
pub fn login_cookie_value(steam_id: &str, access_token: &str) -> String {
    format!("{}%7C%7C{}", steam_id, access_token)
}

/// Cookie strings installed on each secondary origin. Only the session id and
/// the secure login cookie travel; both are re-scoped with `Path=/` and `Secure`.
pub fn propagated_cookies(session_id: &str, login_secure: &str) -> [String; 2] {
    [
        format!("{}={}; Path=/; Secure", SESSION_ID_COOKIE, session_id),
        format!("{}={}; Path=/; Secure", LOGIN_SECURE_COOKIE, login_secure),
    ]
}

/// Read one cookie value out of the jar for a URL
fn cookie_value(jar: &Jar, url: &Url, name: &str) -> Option<String> {
    let header = jar.cookies(url)?;
    let header = header.to_str().ok()?;
    header.split(';').map(str::trim).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}

fn parse_origin(raw: &str) -> Result<Url, AuthError> {
    Url::parse(raw).map_err(|e| AuthError::InvalidSettings(format!("bad origin {}: {}", raw, e)))
}

/// Unauthenticated bot transport
#[derive(Clone)]
pub struct SessionManager {
    credentials: BotCredentials,
    settings: SessionSettings,
    client: Client,
    jar: Arc<Jar>,
    community: Url,
    secondary: Vec<Url>,
}

impl SessionManager {
    /// Build the bot's client: own cookie jar, request timeout, browser user
    /// agent and a default `Origin`/`Referer` pair on the community origin.
    pub fn new(credentials: BotCredentials, settings: SessionSettings) -> Result<Self, AuthError> {
        if credentials.account_name.trim().is_empty() {
            return Err(AuthError::InvalidSettings("account name is empty".into()));
        }

        let community = parse_origin(&settings.endpoints.community)?;
        let secondary = settings
            .endpoints
            .secondary_origins()
            .iter()
            .map(|origin| parse_origin(origin))
            .collect::<Result<Vec<_>, _>>()?;

        let jar = Arc::new(Jar::default());
        for cookie in SEED_COOKIES {
            jar.add_cookie_str(cookie, &community);
        }

        let origin = settings.endpoints.community.trim_end_matches('/');
        let mut headers = HeaderMap::new();
        headers.insert(
            ORIGIN,
            HeaderValue::from_str(origin).map_err(|e| AuthError::InvalidSettings(e.to_string()))?,
        );
        headers.insert(
            REFERER,
            HeaderValue::from_str(&format!("{}/", origin))
                .map_err(|e| AuthError::InvalidSettings(e.to_string()))?,
        );

        let client = Client::builder()
            .cookie_provider(jar.clone())
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            credentials,
            settings,
            client,
            jar,
            community,
            secondary,
        })
    }

    pub fn bot_id(&self) -> &str {
        &self.credentials.bot_id
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Provider clock sharing this bot's client
    pub fn clock(&self) -> ProviderClock {
        ProviderClock::new(self.client.clone(), &self.settings)
    }

    /// Run the full login handshake
    pub async fn login(&self) -> Result<AuthenticatedSession, AuthError> {
        let bot_id = self.bot_id();
        info!("[Session] {} logging in as {}", bot_id, self.credentials.account_name);

        let session_id = self.ensure_session_id().await?;

        let handshake = self.fetch_handshake().await?;
        let encrypted_password = encrypt_password(&handshake, &self.credentials.password)?;

        let challenge = self.begin_auth(&encrypted_password, &handshake.timestamp).await?;
        debug!(
            "[Session] {} challenge {} (request {})",
            bot_id, challenge.client_id, challenge.request_id
        );

        let steam_id = if challenge.steamid.is_empty() {
            self.credentials.bot_id.clone()
        } else {
            challenge.steamid.clone()
        };

        self.submit_guard_code(&challenge, &steam_id).await?;
        let tokens = self.poll_tokens(&challenge).await?;

        let login_secure = login_cookie_value(&steam_id, &tokens.access_token);
        self.jar.add_cookie_str(
            &format!("{}={}; Path=/; Secure; HttpOnly", LOGIN_SECURE_COOKIE, login_secure),
            &self.community,
        );
        for origin in &self.secondary {
            for cookie in propagated_cookies(&session_id, &login_secure) {
                self.jar.add_cookie_str(&cookie, origin);
            }
        }

        info!("[Session] {} authenticated", bot_id);

        Ok(AuthenticatedSession {
            transport: self.clone(),
            session_id,
            steam_id,
            tokens,
        })
    }

    /// Session id cookie of the community origin, obtained from the provider
    /// when possible and generated locally otherwise
    async fn ensure_session_id(&self) -> Result<String, AuthError> {
        if let Some(id) = cookie_value(&self.jar, &self.community, SESSION_ID_COOKIE) {
            return Ok(id);
        }

        let response = self
            .client
            .get(self.settings.endpoints.community_url("/"))
            .send()
            .await?;
        debug!(
            "[Session] {} community root answered HTTP {}",
            self.bot_id(),
            response.status()
        );

        if let Some(id) = cookie_value(&self.jar, &self.community, SESSION_ID_COOKIE) {
            return Ok(id);
        }

        let id = hex::encode(rand::random::<[u8; 12]>());
        self.jar
            .add_cookie_str(&format!("{}={}; Path=/", SESSION_ID_COOKIE, id), &self.community);
        debug!("[Session] {} generated local session id", self.bot_id());
        Ok(id)
    }

    async fn fetch_handshake(&self) -> Result<HandshakeParameters, AuthError> {
        let response = self
            .client
            .get(self.settings.endpoints.api_url(RSA_KEY_PATH))
            .query(&[("account_name", self.credentials.account_name.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Handshake(format!("public key request answered HTTP {}", status)));
        }

        let body: Envelope<HandshakeParameters> = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(format!("public key: {}", e)))?;

        let params = body.response;
        if params.publickey_mod.is_empty() || params.publickey_exp.is_empty() {
            return Err(AuthError::Handshake("public key missing from response".into()));
        }
        Ok(params)
    }

    async fn begin_auth(
        &self,
        encrypted_password: &str,
        encryption_timestamp: &str,
    ) -> Result<AuthChallenge, AuthError> {
        let response = self
            .client
            .post(self.settings.endpoints.api_url(BEGIN_AUTH_PATH))
            .form(&[
                ("account_name", self.credentials.account_name.as_str()),
                ("encrypted_password", encrypted_password),
                ("encryption_timestamp", encryption_timestamp),
                ("persistence", "1"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::CredentialsRejected(format!("HTTP {}", status)));
        }

        let body: Envelope<AuthChallenge> = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(format!("auth session: {}", e)))?;

        if body.response.client_id.is_empty() {
            return Err(AuthError::CredentialsRejected("no challenge id returned".into()));
        }
        Ok(body.response)
    }

    async fn submit_guard_code(&self, challenge: &AuthChallenge, steam_id: &str) -> Result<(), AuthError> {
        let code = generate_guard_code(&self.credentials.shared_secret, &self.clock()).await?;
        debug!("[Session] {} submitting guard code {}", self.bot_id(), code);

        let response = self
            .client
            .post(self.settings.endpoints.api_url(GUARD_CODE_PATH))
            .form(&[
                ("client_id", challenge.client_id.as_str()),
                ("steamid", steam_id),
                ("code", code.as_str()),
                ("code_type", "3"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("[Session] {} guard code rejected (HTTP {})", self.bot_id(), status);
            return Err(AuthError::GuardCodeRejected(status));
        }
        Ok(())
    }

    async fn poll_tokens(&self, challenge: &AuthChallenge) -> Result<SessionTokens, AuthError> {
        let config = PollConfig {
            max_attempts: self.settings.poll_attempts,
            delay: self.settings.poll_delay,
        };

        let tokens = poll_with_fixed_delay(&config, "token poll", |_| self.poll_once(challenge)).await?;
        tokens.ok_or(AuthError::PollTimeout {
            attempts: config.max_attempts.max(1),
        })
    }

    async fn poll_once(&self, challenge: &AuthChallenge) -> Result<Option<SessionTokens>, AuthError> {
        let response = self
            .client
            .post(self.settings.endpoints.api_url(POLL_AUTH_PATH))
            .form(&[
                ("client_id", challenge.client_id.as_str()),
                ("request_id", challenge.request_id.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            debug!("[Session] {} token poll answered HTTP {}", self.bot_id(), status);
            return Ok(None);
        }

        let body: Envelope<PollStatus> = response
            .json()
            .await
            .map_err(|e| AuthError::MalformedResponse(format!("token poll: {}", e)))?;

        if body.response.access_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(SessionTokens {
            access_token: body.response.access_token,
            refresh_token: body.response.refresh_token,
        }))
    }
}

/// PKCS#1 v1.5 encrypt the password under the provider key, base64 encoded
fn encrypt_password(params: &HandshakeParameters, password: &str) -> Result<String, AuthError> {
    let modulus = BigUint::parse_bytes(params.publickey_mod.as_bytes(), 16)
        .ok_or_else(|| AuthError::Handshake("public key modulus is not hex".into()))?;
    let exponent = BigUint::parse_bytes(params.publickey_exp.as_bytes(), 16)
        .ok_or_else(|| AuthError::Handshake("public key exponent is not hex".into()))?;

    let key = RsaPublicKey::new(modulus, exponent).map_err(|e| AuthError::Handshake(e.to_string()))?;
    let encrypted = key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| AuthError::Handshake(e.to_string()))?;
    Ok(STANDARD.encode(encrypted))
}

/// Logged-in bot transport
#[derive(Clone)]
pub struct AuthenticatedSession {
    transport: SessionManager,
    session_id: String,
    steam_id: String,
    tokens: SessionTokens,
}

impl AuthenticatedSession {
    pub fn bot_id(&self) -> &str {
        self.transport.bot_id()
    }

    /// Provider account id the login resolved to
    pub fn steam_id(&self) -> &str {
        &self.steam_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn access_token(&self) -> &str {
        &self.tokens.access_token
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    pub fn credentials(&self) -> &BotCredentials {
        &self.transport.credentials
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.transport.settings
    }

    pub fn client(&self) -> &Client {
        &self.transport.client
    }

    /// Cookie header the jar would send to `url`
    pub fn cookie_header(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let header = self.transport.jar.cookies(&url)?;
        header.to_str().ok().map(str::to_string)
    }

    /// Log in again on the same client and jar. On failure the old tokens stay.
    pub async fn relogin(&mut self) -> Result<(), AuthError> {
        let fresh = self.transport.login().await?;
        *self = fresh;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_parts(
        transport: SessionManager,
        session_id: &str,
        steam_id: &str,
        tokens: SessionTokens,
    ) -> Self {
        Self {
            transport,
            session_id: session_id.to_string(),
            steam_id: steam_id.to_string(),
            tokens,
        }
    }

    /// Drop the tokens and go back to the unauthenticated state
    pub fn expire(self) -> SessionManager {
        info!("[Session] {} session expired", self.bot_id());
        self.transport
    }
}

impl fmt::Debug for AuthenticatedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatedSession")
            .field("bot_id", &self.bot_id())
            .field("steam_id", &self.steam_id)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::endpoints::ProviderEndpoints;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPrivateKey;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHARED_SECRET: &str = "JBSWY3DPEHPK3PXP";

    fn credentials() -> BotCredentials {
        BotCredentials {
            bot_id: "76561198000000042".into(),
            account_name: "cstrade_bot_1".into(),
            password: "correct horse battery".into(),
            shared_secret: SHARED_SECRET.into(),
            identity_secret: "ZGVmZ2hpamtsbW5vcHFyc3R1dnc=".into(),
            device_id: "android:test".into(),
        }
    }

    fn settings(server: &MockServer) -> SessionSettings {
        SessionSettings {
            endpoints: ProviderEndpoints::single_origin(&server.uri()),
            request_timeout: Duration::from_secs(5),
            poll_attempts: 2,
            poll_delay: Duration::from_millis(5),
        }
    }

    /// Mount the key, time and session-cookie endpoints; returns the private key
    async fn mount_handshake(server: &MockServer) -> RsaPrivateKey {
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();

        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("set-cookie", "sessionid=0badc0ffee0badc0ffee0bad; Path=/"),
            )
            .mount(server)
            .await;

        Mock::given(method("GET"))
            .and(path(RSA_KEY_PATH))
            .and(query_param("account_name", "cstrade_bot_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {
                    "publickey_mod": key.n().to_str_radix(16),
                    "publickey_exp": key.e().to_str_radix(16),
                    "timestamp": "4811520000000"
                }
            })))
            .mount(server)
            .await;

        Mock::given(method("POST"))
            .and(path(QUERY_TIME_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": { "server_time": "1686900000" }
            })))
            .mount(server)
            .await;

        key
    }

    async fn mount_begin_auth(server: &MockServer, client_id: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path(BEGIN_AUTH_PATH))
            .and(header("origin", server.uri().as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {
                    "client_id": client_id,
                    "request_id": "cmVxdWVzdA==",
                    "steamid": "76561198000000042"
                }
            })))
            .mount(server)
            .await;
    }

    fn form_field(body: &[u8], name: &str) -> Option<String> {
        let url = Url::parse(&format!("http://form.local/?{}", String::from_utf8_lossy(body))).ok()?;
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test]
    async fn test_login_happy_path() {
        let server = MockServer::start().await;
        let key = mount_handshake(&server).await;
        mount_begin_auth(&server, json!("7431998231000711")).await;

        Mock::given(method("POST"))
            .and(path(GUARD_CODE_PATH))
            .and(body_string_contains("code=M73JC"))
            .and(body_string_contains("code_type=3"))
            .and(body_string_contains("client_id=7431998231000711"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path(POLL_AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": { "access_token": "eyJ.access", "refresh_token": "eyJ.refresh" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let manager = SessionManager::new(credentials(), settings(&server)).unwrap();
        let session = manager.login().await.unwrap();

        assert_eq!(session.session_id(), "0badc0ffee0badc0ffee0bad");
        assert_eq!(session.access_token(), "eyJ.access");
        assert_eq!(session.tokens().refresh_token, "eyJ.refresh");
        assert_eq!(session.steam_id(), "76561198000000042");

        // The password travels encrypted under the provider key
        let requests = server.received_requests().await.unwrap();
        let begin = requests
            .iter()
            .find(|r| r.url.path() == BEGIN_AUTH_PATH)
            .expect("begin auth request");
        let encrypted = form_field(&begin.body, "encrypted_password").unwrap();
        let decrypted = key
            .decrypt(Pkcs1v15Encrypt, &STANDARD.decode(encrypted).unwrap())
            .unwrap();
        assert_eq!(decrypted, b"correct horse battery");
        assert_eq!(form_field(&begin.body, "encryption_timestamp").unwrap(), "4811520000000");
        assert_eq!(form_field(&begin.body, "persistence").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_login_cookies_reach_every_secondary_origin() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        mount_begin_auth(&server, json!("7431998231000711")).await;

        Mock::given(method("POST"))
            .and(path(GUARD_CODE_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(POLL_AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": { "access_token": "eyJ.access", "refresh_token": "eyJ.refresh" }
            })))
            .mount(&server)
            .await;

        // Store, help and login live on their own hosts; only the jar ever sees them
        let mut settings = settings(&server);
        settings.endpoints.store = "https://store.example.test".into();
        settings.endpoints.help = "https://help.example.test".into();
        settings.endpoints.login = "https://login.example.test".into();

        let session = SessionManager::new(credentials(), settings).unwrap().login().await.unwrap();

        let login_secure = login_cookie_value("76561198000000042", "eyJ.access");
        for origin in [
            "https://store.example.test/",
            "https://help.example.test/",
            "https://login.example.test/",
        ] {
            let header = session.cookie_header(origin).unwrap();
            let mut cookies: Vec<&str> = header.split(';').map(str::trim).collect();
            cookies.sort_unstable();

            assert_eq!(
                cookies,
                vec![
                    "sessionid=0badc0ffee0badc0ffee0bad".to_string(),
                    format!("steamLoginSecure={}", login_secure),
                ],
                "cookies sent to {}",
                origin
            );
            assert!(!header.contains("Steam_Language"));
        }

        // Nothing leaks onto an unrelated host
        assert!(session.cookie_header("https://unrelated.example.test/").is_none());
    }

    #[tokio::test]
    async fn test_missing_challenge_is_credentials_rejected() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;

        Mock::given(method("POST"))
            .and(path(BEGIN_AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(GUARD_CODE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let manager = SessionManager::new(credentials(), settings(&server)).unwrap();
        let err = manager.login().await.unwrap_err();
        assert_eq!(err.reason(), "credentials_rejected");
    }

    #[tokio::test]
    async fn test_guard_code_rejected() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        mount_begin_auth(&server, json!(7431998231000711u64)).await;

        Mock::given(method("POST"))
            .and(path(GUARD_CODE_PATH))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(POLL_AUTH_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let manager = SessionManager::new(credentials(), settings(&server)).unwrap();
        match manager.login().await.unwrap_err() {
            AuthError::GuardCodeRejected(status) => assert_eq!(status.as_u16(), 400),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_timeout_after_budget() {
        let server = MockServer::start().await;
        mount_handshake(&server).await;
        mount_begin_auth(&server, json!("1")).await;

        Mock::given(method("POST"))
            .and(path(GUARD_CODE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(POLL_AUTH_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
            .expect(2)
            .mount(&server)
            .await;

        let manager = SessionManager::new(credentials(), settings(&server)).unwrap();
        let err = manager.login().await.unwrap_err();
        assert!(matches!(err, AuthError::PollTimeout { attempts: 2 }));
        assert_eq!(err.reason(), "poll_timeout");
    }

    #[tokio::test]
    async fn test_clock_failure_is_code_generation_error() {
        let server = MockServer::start().await;
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        Mock::given(method("GET"))
            .and(path(RSA_KEY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {
                    "publickey_mod": key.n().to_str_radix(16),
                    "publickey_exp": key.e().to_str_radix(16),
                    "timestamp": "1"
                }
            })))
            .mount(&server)
            .await;
        mount_begin_auth(&server, json!("1")).await;
        Mock::given(method("POST"))
            .and(path(QUERY_TIME_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let manager = SessionManager::new(credentials(), settings(&server)).unwrap();
        let err = manager.login().await.unwrap_err();
        assert_eq!(err.reason(), "code_generation");
    }

    #[tokio::test]
    async fn test_session_id_generated_when_provider_sets_none() {
        let server = MockServer::start().await;
        let manager = SessionManager::new(credentials(), settings(&server)).unwrap();

        let first = manager.ensure_session_id().await.unwrap();
        assert_eq!(first.len(), 24);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));

        // Reused once installed
        assert_eq!(manager.ensure_session_id().await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_handshake_without_key_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(RSA_KEY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": {} })))
            .mount(&server)
            .await;

        let manager = SessionManager::new(credentials(), settings(&server)).unwrap();
        let err = manager.login().await.unwrap_err();
        assert_eq!(err.reason(), "handshake_failed");
    }

    #[test]
    fn test_propagated_cookies() {
        let login = login_cookie_value("76561198000000042", "tok");
        assert_eq!(login, "76561198000000042%7C%7Ctok");

        let [session, secure] = propagated_cookies("abc", &login);
        assert_eq!(session, "sessionid=abc; Path=/; Secure");
        assert_eq!(secure, "steamLoginSecure=76561198000000042%7C%7Ctok; Path=/; Secure");
    }

    #[test]
    fn test_parse_server_time() {
        assert_eq!(parse_server_time(&json!({"response": {"server_time": "1686900000"}})).unwrap(), 1_686_900_000);
        assert_eq!(parse_server_time(&json!({"response": {"server_time": 1686900000}})).unwrap(), 1_686_900_000);
        assert!(parse_server_time(&json!({"response": {"server_time": 0}})).is_err());
        assert!(parse_server_time(&json!({"response": {}})).is_err());
        assert!(parse_server_time(&json!({"response": {"server_time": "soon"}})).is_err());
    }

    #[test]
    fn test_empty_account_name_is_invalid() {
        let mut creds = credentials();
        creds.account_name = "  ".into();
        let err = SessionManager::new(creds, SessionSettings::default()).err().unwrap();
        assert_eq!(err.reason(), "invalid_settings");
    }

    #[test]
    fn test_tokens_are_redacted() {
        let tokens = SessionTokens {
            access_token: "secret-access".into(),
            refresh_token: "secret-refresh".into(),
        };
        assert!(!format!("{:?}", tokens).contains("secret"));
    }
}
