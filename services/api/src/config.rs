//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;
use xengage_core::{AutomationTimeouts, PlatformUrls};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// Without a database the linked accounts live in memory only.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub platform_base_url: String,
    pub browser_headless: bool,
    pub chrome_executable: Option<PathBuf>,
    pub timeouts: AutomationTimeouts,
    pub dispatch_interval: Duration,
    pub schedule_retention: chrono::Duration,
    pub auth_request_ttl: chrono::Duration,
    pub cors_origin: String,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:3000".parse::<SocketAddr>())?;
        let database_url = lookup("DATABASE_URL").filter(|v| !v.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Browser Automation ---
        let platform_base_url =
            lookup("PLATFORM_BASE_URL").unwrap_or_else(|| "https://twitter.com".to_string());
        if !platform_base_url.starts_with("http://") && !platform_base_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "PLATFORM_BASE_URL".to_string(),
                format!("'{}' is not an http(s) URL", platform_base_url),
            ));
        }
        let browser_headless = parse_or(&lookup, "BROWSER_HEADLESS", Ok::<_, ConfigError>(true))?;
        let chrome_executable = lookup("CHROME_EXECUTABLE").map(PathBuf::from);

        let defaults = AutomationTimeouts::default();
        let timeouts = AutomationTimeouts {
            element: secs_or(&lookup, "ELEMENT_TIMEOUT_SECS", defaults.element)?,
            login: secs_or(&lookup, "LOGIN_TIMEOUT_SECS", defaults.login)?,
            restore: secs_or(&lookup, "RESTORE_TIMEOUT_SECS", defaults.restore)?,
            upload: secs_or(&lookup, "UPLOAD_TIMEOUT_SECS", defaults.upload)?,
            confirm: secs_or(&lookup, "CONFIRM_TIMEOUT_SECS", defaults.confirm)?,
            ..defaults
        };

        // --- Scheduling and Auth Requests ---
        let dispatch_interval = secs_or(&lookup, "DISPATCH_INTERVAL_SECS", Duration::from_secs(30))?;
        if dispatch_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "DISPATCH_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let schedule_retention =
            chrono::Duration::hours(parse_or(&lookup, "SCHEDULE_RETENTION_HOURS", Ok::<i64, ConfigError>(24))?);
        let auth_request_ttl =
            chrono::Duration::minutes(parse_or(&lookup, "AUTH_REQUEST_TTL_MINUTES", Ok::<i64, ConfigError>(15))?);

        let cors_origin =
            lookup("CORS_ORIGIN").unwrap_or_else(|| "http://localhost:3000".to_string());

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            platform_base_url,
            browser_headless,
            chrome_executable,
            timeouts,
            dispatch_interval,
            schedule_retention,
            auth_request_ttl,
            cors_origin,
        })
    }

    pub fn platform_urls(&self) -> PlatformUrls {
        PlatformUrls::new(self.platform_base_url.clone())
    }
}

/// Parses `key` if set, otherwise falls back to `default`.
fn parse_or<F, T, E>(lookup: &F, key: &str, default: Result<T, E>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
    E: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => default.map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}

fn secs_or<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_or(lookup, key, Ok::<u64, ConfigError>(default.as_secs())).map(Duration::from_secs)
}
