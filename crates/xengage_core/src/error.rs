//! crates/xengage_core/src/error.rs
//!
//! The failure taxonomy shared by the executor, the authentication state
//! machine, the registries and the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::PortError;

/// How a caller is expected to react to a failure.
///
/// A failed session restore never shows up here: restore reports a plain
/// `false` and the executor falls back to a full login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Must be shown to the end user, who can act on it.
    UserActionable,
    /// Timeouts and extraction problems; safe to retry the whole action.
    Transient,
    /// Rejected before any browser work was attempted.
    Configuration,
}

/// Every way an action or a login attempt can fail.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AutomationError {
    #[error("The platform requires additional verification. Please log in through the website first.")]
    VerificationRequired,

    #[error("Invalid username or password{}", detail_suffix(.detail))]
    InvalidCredentials { detail: Option<String> },

    #[error("Two-factor authentication required")]
    TwoFactorRequired,

    #[error("Two-factor code was rejected")]
    TwoFactorInvalid,

    #[error("Login failed{}", detail_suffix(.detail))]
    LoginTimeout { detail: Option<String> },

    #[error("Stored session is no longer valid and no password is available")]
    SessionExpired,

    #[error("Step '{step}' failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Thread stopped after {posted} of {total} posts: {reason}")]
    ThreadIncomplete {
        posted: usize,
        total: usize,
        reason: String,
    },

    #[error("No credentials provided and no default account set")]
    MissingCredentials,

    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

fn detail_suffix(detail: &Option<String>) -> String {
    match detail {
        Some(text) if !text.is_empty() => format!(": {}", text),
        _ => String::new(),
    }
}

impl AutomationError {
    pub fn step(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::StepFailed {
            step: step.into(),
            reason: reason.into(),
        }
    }

    /// Stable, machine-readable code for callers to branch on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::VerificationRequired => "verification-required",
            Self::InvalidCredentials { .. } => "invalid-credentials",
            Self::TwoFactorRequired => "two-factor-required",
            Self::TwoFactorInvalid => "two-factor-invalid",
            Self::LoginTimeout { .. } => "login-timeout",
            Self::SessionExpired => "session-expired",
            Self::StepFailed { .. } => "step-failed",
            Self::ThreadIncomplete { .. } => "thread-incomplete",
            Self::MissingCredentials => "missing-credentials",
            Self::Unexpected(_) => "unexpected-error",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::VerificationRequired
            | Self::InvalidCredentials { .. }
            | Self::TwoFactorRequired
            | Self::TwoFactorInvalid
            | Self::SessionExpired => ErrorClass::UserActionable,
            Self::LoginTimeout { .. }
            | Self::StepFailed { .. }
            | Self::ThreadIncomplete { .. }
            | Self::Unexpected(_) => ErrorClass::Transient,
            Self::MissingCredentials => ErrorClass::Configuration,
        }
    }

    pub fn report(&self) -> FailureReport {
        FailureReport::from(self)
    }
}

impl From<PortError> for AutomationError {
    fn from(err: PortError) -> Self {
        Self::Unexpected(err.to_string())
    }
}

/// Attaches the name of the scripted step to a lower-level port failure.
pub trait StepContext<T> {
    fn step(self, name: &str) -> Result<T, AutomationError>;
}

impl<T> StepContext<T> for Result<T, PortError> {
    fn step(self, name: &str) -> Result<T, AutomationError> {
        self.map_err(|e| AutomationError::step(name, e.to_string()))
    }
}

/// The serialisable form of a failure, attached to auth requests and scheduled items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub code: String,
    pub message: String,
}

impl From<&AutomationError> for FailureReport {
    fn from(err: &AutomationError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Reasons the scheduling queue refuses an item.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueueError {
    #[error("Schedule time {requested} is not after the current time {now}; execute immediately instead")]
    NotInFuture {
        requested: DateTime<Utc>,
        now: DateTime<Utc>,
    },
    #[error("A thread needs at least one post")]
    EmptyThread,
}

/// Caller-facing rejections raised before any browser work starts.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Automation(#[from] AutomationError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}
