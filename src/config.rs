//! Configuration management for the marketplace bots

use crate::steam::{ProviderEndpoints, SessionSettings};
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to SQLite database
    pub database_path: String,

    /// API listen address
    pub bind_addr: String,

    /// Passphrase sealing bot secrets (required by anything that loads bots)
    pub vault_passphrase: Option<String>,

    /// Provider origins
    pub endpoints: ProviderEndpoints,

    /// Per-request timeout in seconds
    pub http_timeout_seconds: u64,

    /// Token poll budget after the guard code step
    pub auth_poll_attempts: u32,

    /// Fixed delay between token polls
    pub auth_poll_delay_ms: u64,

    /// How long a reserved offer stays bound to its bot
    pub reservation_minutes: i64,

    /// Sweeper period
    pub sweep_interval_seconds: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "cstrade.db".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            vault_passphrase: None,
            endpoints: ProviderEndpoints::default(),
            http_timeout_seconds: 30,
            auth_poll_attempts: 2,
            auth_poll_delay_ms: 3000,
            reservation_minutes: 15,
            sweep_interval_seconds: 60,
        }
    }
}

/// Parse `name` if set and non-empty, else `default`
fn parsed<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name).ok().filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("{} must be a number, got {:?}", name, raw)),
        None => Ok(default),
    }
}

fn origin(name: &str, default: String) -> String {
    env::var(name).ok().filter(|s| !s.is_empty()).unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let endpoints = ProviderEndpoints {
            api: origin("STEAM_API_URL", defaults.endpoints.api),
            community: origin("STEAM_COMMUNITY_URL", defaults.endpoints.community),
            store: origin("STEAM_STORE_URL", defaults.endpoints.store),
            help: origin("STEAM_HELP_URL", defaults.endpoints.help),
            login: origin("STEAM_LOGIN_URL", defaults.endpoints.login),
        };

        let config = Self {
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            bind_addr: env::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            vault_passphrase: env::var("BOT_VAULT_PASSPHRASE").ok().filter(|s| !s.is_empty()),
            endpoints,
            http_timeout_seconds: parsed("HTTP_TIMEOUT_SECONDS", defaults.http_timeout_seconds)?,
            auth_poll_attempts: parsed("AUTH_POLL_ATTEMPTS", defaults.auth_poll_attempts)?,
            auth_poll_delay_ms: parsed("AUTH_POLL_DELAY_MS", defaults.auth_poll_delay_ms)?,
            reservation_minutes: parsed("RESERVATION_MINUTES", defaults.reservation_minutes)?,
            sweep_interval_seconds: parsed("SWEEP_INTERVAL_SECONDS", defaults.sweep_interval_seconds)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth_poll_attempts == 0 {
            anyhow::bail!("AUTH_POLL_ATTEMPTS must be at least 1");
        }
        if self.reservation_minutes <= 0 {
            anyhow::bail!("RESERVATION_MINUTES must be positive");
        }
        if self.sweep_interval_seconds == 0 {
            anyhow::bail!("SWEEP_INTERVAL_SECONDS must be positive");
        }
        if self.http_timeout_seconds == 0 {
            anyhow::bail!("HTTP_TIMEOUT_SECONDS must be positive");
        }
        Ok(())
    }

    /// Vault passphrase, or an error naming the variable to set
    pub fn passphrase(&self) -> Result<&str> {
        self.vault_passphrase
            .as_deref()
            .context("BOT_VAULT_PASSPHRASE is required to load bot credentials")
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            endpoints: self.endpoints.clone(),
            request_timeout: Duration::from_secs(self.http_timeout_seconds),
            poll_attempts: self.auth_poll_attempts,
            poll_delay: Duration::from_millis(self.auth_poll_delay_ms),
        }
    }

    pub fn reservation_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reservation_minutes)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}
