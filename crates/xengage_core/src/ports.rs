//! crates/xengage_core/src/ports.rs
//!
//! Defines the service contracts (traits) the engine depends on.
//! These traits form the boundary of the hexagonal architecture: the browser,
//! the account store and the clock are all supplied from outside, so the core
//! can be exercised against scripted doubles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{AccountSettings, SessionCookie};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (browser, database).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Browser Ports
//=========================================================================================

/// One page inside one isolated execution context (its own cookies and storage).
///
/// Every wait takes an explicit bound. `wait_for` reports a missed bound as
/// `Ok(false)`; it is up to the caller to decide what that means for its step.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> PortResult<()>;

    /// Waits until `selector` matches an element, or `timeout` elapses.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> PortResult<bool>;

    /// Focuses the element and types `text` into it.
    async fn fill(&self, selector: &str, text: &str) -> PortResult<()>;

    async fn click(&self, selector: &str) -> PortResult<()>;

    /// Sets a file on a file input element.
    async fn upload(&self, selector: &str, path: &str) -> PortResult<()>;

    /// Inner text of the first match, `None` if nothing matches.
    async fn text_of(&self, selector: &str) -> PortResult<Option<String>>;

    async fn attribute_of(&self, selector: &str, attribute: &str) -> PortResult<Option<String>>;

    /// Evaluates a script and returns its JSON-serialisable result.
    async fn evaluate_json(&self, script: &str) -> PortResult<serde_json::Value>;

    async fn cookies(&self) -> PortResult<Vec<SessionCookie>>;

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> PortResult<()>;

    async fn local_storage(&self) -> PortResult<BTreeMap<String, String>>;

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> PortResult<()>;

    /// Releases the page, its context and the browser process behind it.
    async fn close(&self) -> PortResult<()>;
}

/// Opens fresh execution contexts. Each call is owned by exactly one action.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn open(&self) -> PortResult<Box<dyn BrowserPage>>;
}

//=========================================================================================
// Account Store Port
//=========================================================================================

/// The external record of which platform accounts a user has linked.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_account(&self, user_id: Uuid, username: &str)
        -> PortResult<Option<AccountSettings>>;

    /// Inserts or replaces the account with the same username. The first
    /// linked account becomes the user's default.
    async fn link_account(&self, user_id: Uuid, account: AccountSettings) -> PortResult<bool>;

    async fn list_accounts(&self, user_id: Uuid) -> PortResult<Vec<AccountSettings>>;

    /// Removes the account; if it was the default, the next remaining one is promoted.
    async fn remove_account(&self, user_id: Uuid, username: &str) -> PortResult<bool>;

    async fn default_account(&self, user_id: Uuid) -> PortResult<Option<String>>;

    async fn set_default_account(&self, user_id: Uuid, username: &str) -> PortResult<bool>;
}

//=========================================================================================
// Clock Port
//=========================================================================================

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to. Used to drive TTL and schedule
/// decisions deterministically.
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
