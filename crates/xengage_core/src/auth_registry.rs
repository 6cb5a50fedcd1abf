//! crates/xengage_core/src/auth_registry.rs
//!
//! The Auth Request Registry: a poll-friendly wrapper around the
//! authentication state machine for the request / authenticate / poll flow.
//!
//! Expired requests are swept on every `status` call instead of by a
//! background task. That keeps the registry self-cleaning without a timer, at
//! the price of stale entries lingering until somebody polls.

use chrono::Duration;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::auth::{Authenticator, LoginSuccess};
use crate::domain::{AccountSettings, AuthRequest, AuthRequestStatus, Credentials};
use crate::error::AutomationError;
use crate::ports::{AccountStore, Clock};
use crate::session::SessionStore;

/// Requests older than this are removed regardless of their state.
pub const AUTH_REQUEST_TTL_MINUTES: i64 = 15;

pub struct AuthRequestRegistry {
    requests: Mutex<HashMap<String, AuthRequest>>,
    authenticator: Arc<dyn Authenticator>,
    accounts: Arc<dyn AccountStore>,
    sessions: Arc<SessionStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl AuthRequestRegistry {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        accounts: Arc<dyn AccountStore>,
        sessions: Arc<SessionStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            requests: Mutex::new(HashMap::new()),
            authenticator,
            accounts,
            sessions,
            clock,
            ttl: Duration::minutes(AUTH_REQUEST_TTL_MINUTES),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Allocates a new pending request for `user_id`.
    pub async fn start(&self, user_id: Uuid) -> String {
        let request_id = Uuid::new_v4().to_string();
        let request = AuthRequest {
            request_id: request_id.clone(),
            user_id,
            status: AuthRequestStatus::Pending,
            created_at: self.clock.now(),
            profile: None,
            error: None,
        };
        self.requests.lock().await.insert(request_id.clone(), request);
        info!("Created auth request {} for user {}", request_id, user_id);
        request_id
    }

    /// Sweeps expired requests, then returns the one asked for.
    pub async fn status(&self, request_id: &str) -> Option<AuthRequest> {
        let mut requests = self.requests.lock().await;
        let now = self.clock.now();
        let ttl = self.ttl;
        let before = requests.len();
        requests.retain(|_, request| now - request.created_at <= ttl);
        let swept = before - requests.len();
        if swept > 0 {
            info!("Swept {} expired auth requests", swept);
        }
        requests.get(request_id).cloned()
    }

    /// Runs the login for a pending request.
    ///
    /// Returns `true` only when the login completed and the account was
    /// linked. A request that is already processing or finished is left alone
    /// and `false` is returned.
    pub async fn submit(&self, request_id: &str, credentials: Credentials) -> bool {
        let user_id = {
            let mut requests = self.requests.lock().await;
            let now = self.clock.now();
            let Some(request) = requests.get_mut(request_id) else {
                warn!("Auth request {} not found", request_id);
                return false;
            };
            if now - request.created_at > self.ttl {
                warn!("Auth request {} has expired", request_id);
                return false;
            }
            if request.status != AuthRequestStatus::Pending {
                warn!(
                    "Auth request {} is already {}, ignoring submission",
                    request_id,
                    request.status.as_str()
                );
                return false;
            }
            request.status = AuthRequestStatus::Processing;
            request.user_id
        };

        let outcome = match self.authenticator.authenticate(&credentials).await {
            Ok(success) => self.link(user_id, success).await,
            Err(e) => Err(e),
        };

        let mut requests = self.requests.lock().await;
        let Some(request) = requests.get_mut(request_id) else {
            warn!("Auth request {} expired while processing", request_id);
            return outcome.is_ok();
        };
        match outcome {
            Ok(success) => {
                request.status = AuthRequestStatus::Completed;
                request.profile = Some(success.profile);
                info!("Auth request {} completed", request_id);
                true
            }
            Err(e) => {
                request.status = AuthRequestStatus::Failed;
                request.error = Some(e.report());
                info!("Auth request {} failed [{}]", request_id, e.code());
                false
            }
        }
    }

    /// Stores the new session and links the account to the user.
    async fn link(&self, user_id: Uuid, success: LoginSuccess) -> Result<LoginSuccess, AutomationError> {
        link_account(self.accounts.as_ref(), &self.sessions, user_id, &success).await?;
        Ok(success)
    }
}

/// Persists a successful login: the session store gets the session and the
/// account store gets the account with its session data.
pub(crate) async fn link_account(
    accounts: &dyn AccountStore,
    sessions: &SessionStore,
    user_id: Uuid,
    success: &LoginSuccess,
) -> Result<AccountSettings, AutomationError> {
    sessions.save(success.session.clone()).await;
    let account = AccountSettings::from_login(&success.profile, &success.session);
    match accounts.link_account(user_id, account.clone()).await {
        Ok(true) => Ok(account),
        Ok(false) => Err(AutomationError::Unexpected(
            "Failed to update user with the linked account".to_string(),
        )),
        Err(e) => {
            error!("Failed to link account {} for {}: {}", account.username, user_id, e);
            Err(AutomationError::Unexpected(format!(
                "Failed to link account: {}",
                e
            )))
        }
    }
}
