//! services/api/src/error.rs
//!
//! Defines the error type for service startup: configuration, database
//! connection and migrations, and binding the listener. Request-level failures
//! never reach this type; handlers map them to status codes themselves.

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Connecting to Postgres or applying migrations failed.
    #[error("Account database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Startup failed: {0}")]
    Internal(String),
}
