//! crates/xengage_core/src/engine.rs
//!
//! The caller-facing engine. It resolves who an action runs as (explicit
//! credentials or the user's default account), decides between immediate
//! execution and the scheduling queue, persists sessions produced by the
//! executor, and fronts the auth request registry and account management.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::auth_registry::{link_account, AuthRequestRegistry};
use crate::domain::{
    AccountSettings, ActionAuth, ActionOutput, ActionSpec, AuthRequest, Credentials, FetchedItem,
    PostedItem, ScheduledAction, ScheduledPayload, ScheduledResult, SegmentMedia, Session,
};
use crate::error::{AutomationError, EngineError};
use crate::executor::{ActionExecutor, ActionReport};
use crate::ports::{AccountStore, Clock};
use crate::scheduler::{ActionDispatch, ScheduleRequest, ScheduledListing, SchedulingQueue};
use crate::session::SessionStore;

//=========================================================================================
// Requests & Outcomes
//=========================================================================================

#[derive(Debug, Clone, Default)]
pub struct PostRequest {
    pub content: String,
    pub credentials: Option<Credentials>,
    pub media: Vec<String>,
    pub reply_to_id: Option<String>,
    pub thread_id: Option<String>,
    pub schedule_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ThreadRequest {
    pub segments: Vec<String>,
    pub credentials: Option<Credentials>,
    pub media: SegmentMedia,
    pub schedule_time: Option<DateTime<Utc>>,
}

/// Exactly one of these comes back from a post/reply/thread request.
#[derive(Debug, Clone, PartialEq)]
pub enum PostOutcome {
    Posted(PostedItem),
    Thread(Vec<PostedItem>),
    Scheduled {
        id: String,
        schedule_time: DateTime<Utc>,
    },
}

/// Result of submitting credentials to an auth request.
#[derive(Debug, Clone)]
pub struct AuthSubmission {
    pub accepted: bool,
    pub request: Option<AuthRequest>,
}

/// Who an action runs as, once credentials or the default account are resolved.
struct Resolved {
    account: String,
    credentials: Option<Credentials>,
}

//=========================================================================================
// Engine
//=========================================================================================

pub struct Engine {
    executor: Arc<dyn ActionExecutor>,
    authenticator: Arc<dyn Authenticator>,
    sessions: Arc<SessionStore>,
    accounts: Arc<dyn AccountStore>,
    queue: Arc<SchedulingQueue>,
    registry: AuthRequestRegistry,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        authenticator: Arc<dyn Authenticator>,
        sessions: Arc<SessionStore>,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = AuthRequestRegistry::new(
            authenticator.clone(),
            accounts.clone(),
            sessions.clone(),
            clock.clone(),
        );
        Self {
            executor,
            authenticator,
            sessions,
            accounts,
            queue: Arc::new(SchedulingQueue::new(clock.clone())),
            registry,
            clock,
        }
    }

    pub fn with_auth_request_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.registry = self.registry.with_ttl(ttl);
        self
    }

    /// The queue, for wiring up a `Dispatcher`.
    pub fn queue(&self) -> Arc<SchedulingQueue> {
        self.queue.clone()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    //=====================================================================================
    // Posting
    //=====================================================================================

    /// Posts (or replies, when `reply_to_id` is set) now, or queues it when the
    /// schedule time is in the future.
    pub async fn post(&self, user_id: Option<Uuid>, request: PostRequest) -> Result<PostOutcome, EngineError> {
        if request.content.trim().is_empty() {
            return Err(EngineError::InvalidRequest("content must not be empty".to_string()));
        }
        let resolved = self.resolve(user_id, request.credentials).await?;
        let payload = ScheduledPayload::Post {
            content: request.content,
            media: request.media,
            reply_to_id: request.reply_to_id,
            thread_id: request.thread_id,
        };
        self.submit(user_id, resolved, payload, request.schedule_time).await
    }

    pub async fn reply(
        &self,
        user_id: Option<Uuid>,
        target_id: &str,
        mut request: PostRequest,
    ) -> Result<PostOutcome, EngineError> {
        if target_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("reply target must not be empty".to_string()));
        }
        request.reply_to_id = Some(target_id.to_string());
        self.post(user_id, request).await
    }

    pub async fn post_thread(
        &self,
        user_id: Option<Uuid>,
        request: ThreadRequest,
    ) -> Result<PostOutcome, EngineError> {
        if request.segments.is_empty() || request.segments.iter().all(|s| s.trim().is_empty()) {
            return Err(EngineError::InvalidRequest("a thread needs at least one post".to_string()));
        }
        if let Some(index) = request.media.keys().find(|i| **i >= request.segments.len()) {
            return Err(EngineError::InvalidRequest(format!(
                "media attached to segment {} but the thread has {} posts",
                index,
                request.segments.len()
            )));
        }
        let resolved = self.resolve(user_id, request.credentials).await?;
        let payload = ScheduledPayload::Thread {
            segments: request.segments,
            media: request.media,
        };
        self.submit(user_id, resolved, payload, request.schedule_time).await
    }

    /// Routes to the queue for a strictly future time, otherwise runs now.
    async fn submit(
        &self,
        user_id: Option<Uuid>,
        resolved: Resolved,
        payload: ScheduledPayload,
        schedule_time: Option<DateTime<Utc>>,
    ) -> Result<PostOutcome, EngineError> {
        if let Some(at) = schedule_time.filter(|at| *at > self.clock.now()) {
            let id = self
                .queue
                .enqueue(ScheduleRequest {
                    user_id,
                    payload,
                    schedule_time: at,
                    account: resolved.account,
                    credentials: resolved.credentials,
                })
                .await?;
            return Ok(PostOutcome::Scheduled {
                id,
                schedule_time: at,
            });
        }

        let output = self
            .run(user_id, &resolved.account, resolved.credentials, payload.to_action())
            .await?;
        match output {
            ActionOutput::Posted(item) => Ok(PostOutcome::Posted(item)),
            ActionOutput::ThreadPosted(items) => Ok(PostOutcome::Thread(items)),
            other => Err(unexpected_output(&other).into()),
        }
    }

    /// Picks explicit credentials over the default account. Fails before any
    /// browser work when neither is available.
    async fn resolve(&self, user_id: Option<Uuid>, credentials: Option<Credentials>) -> Result<Resolved, EngineError> {
        if let Some(credentials) = credentials.filter(|c| !c.username.trim().is_empty()) {
            return Ok(Resolved {
                account: credentials
                    .session_token
                    .clone()
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| credentials.username.clone()),
                credentials: Some(credentials),
            });
        }
        let Some(user_id) = user_id else {
            return Err(AutomationError::MissingCredentials.into());
        };
        match self.accounts.default_account(user_id).await? {
            Some(account) => Ok(Resolved {
                account,
                credentials: None,
            }),
            None => Err(AutomationError::MissingCredentials.into()),
        }
    }

    /// The session to replay for `account`. Only an account linked to the
    /// caller is ever replayed: the in-process store first, then whatever the
    /// account store holds.
    async fn stored_session(&self, user_id: Option<Uuid>, account: &str) -> Option<Session> {
        let user_id = user_id?;
        let settings = match self.accounts.get_account(user_id, account).await {
            Ok(Some(settings)) => settings,
            Ok(None) => return None,
            Err(e) => {
                warn!("Could not read stored session for {}: {}", account, e);
                return None;
            }
        };
        if let Some(session) = self.sessions.get(account).await {
            return Some(session);
        }
        settings
            .session_data
            .filter(|data| !data.is_empty())
            .map(|data| Session {
                username: settings.username,
                data,
                captured_at: self.clock.now(),
            })
    }

    async fn run(
        &self,
        user_id: Option<Uuid>,
        account: &str,
        credentials: Option<Credentials>,
        spec: ActionSpec,
    ) -> Result<ActionOutput, AutomationError> {
        let auth = ActionAuth {
            username: account.to_string(),
            session: self.stored_session(user_id, account).await,
            credentials,
        };
        let report = self.executor.execute(auth, spec).await;
        self.absorb(user_id, account, &report).await;
        report.outcome
    }

    /// Persists what the executor learned about the session. The executor
    /// itself never writes anywhere.
    async fn absorb(&self, user_id: Option<Uuid>, account: &str, report: &ActionReport) {
        if report.session_rejected {
            self.sessions.invalidate(account).await;
            if report.fresh_session.is_none() {
                self.update_account_session(user_id, account, None).await;
            }
        }
        if let Some(session) = &report.fresh_session {
            self.sessions.save(session.clone()).await;
            self.update_account_session(user_id, &session.username, Some(session))
                .await;
        }
    }

    /// Writes the session into an already linked account; unknown accounts are left alone.
    async fn update_account_session(&self, user_id: Option<Uuid>, account: &str, session: Option<&Session>) {
        let Some(user_id) = user_id else { return };
        let existing = match self.accounts.get_account(user_id, account).await {
            Ok(Some(existing)) => existing,
            Ok(None) => return,
            Err(e) => {
                warn!("Could not load account {} to update its session: {}", account, e);
                return;
            }
        };
        let updated = AccountSettings {
            session_data: session.map(|s| s.data.clone()),
            ..existing
        };
        if let Err(e) = self.accounts.link_account(user_id, updated).await {
            warn!("Could not persist session for {}: {}", account, e);
        }
    }

    //=====================================================================================
    // Fetching
    //=====================================================================================

    pub async fn fetch_timeline(&self, username: &str, count: usize) -> Result<Vec<FetchedItem>, EngineError> {
        let username = username.trim().trim_start_matches('@');
        if username.is_empty() {
            return Err(EngineError::InvalidRequest("username must not be empty".to_string()));
        }
        let spec = ActionSpec::FetchTimeline {
            username: username.to_string(),
            count,
        };
        match self.executor.execute(ActionAuth::anonymous(), spec).await.outcome? {
            ActionOutput::Items(items) => Ok(items),
            other => Err(unexpected_output(&other).into()),
        }
    }

    pub async fn fetch_single(&self, id: &str) -> Result<Option<FetchedItem>, EngineError> {
        if id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("id must not be empty".to_string()));
        }
        let spec = ActionSpec::FetchSingle { id: id.to_string() };
        match self.executor.execute(ActionAuth::anonymous(), spec).await.outcome? {
            ActionOutput::Items(items) => Ok(items.into_iter().next()),
            other => Err(unexpected_output(&other).into()),
        }
    }

    //=====================================================================================
    // Scheduled Items
    //=====================================================================================

    pub async fn list_scheduled(&self) -> ScheduledListing {
        self.queue.list().await
    }

    pub async fn cancel_scheduled(&self, id: &str) -> bool {
        self.queue.cancel(id).await
    }

    //=====================================================================================
    // Authentication
    //=====================================================================================

    pub async fn start_auth(&self, user_id: Uuid) -> String {
        self.registry.start(user_id).await
    }

    pub async fn poll_auth(&self, request_id: &str) -> Option<AuthRequest> {
        self.registry.status(request_id).await
    }

    pub async fn submit_auth(&self, request_id: &str, credentials: Credentials) -> AuthSubmission {
        let accepted = self.registry.submit(request_id, credentials).await;
        AuthSubmission {
            accepted,
            request: self.registry.status(request_id).await,
        }
    }

    /// Logs in right away and links the resulting account to `user_id`.
    pub async fn login_and_link(
        &self,
        user_id: Uuid,
        credentials: Credentials,
    ) -> Result<AccountSettings, EngineError> {
        if !credentials.can_login() {
            return Err(AutomationError::MissingCredentials.into());
        }
        let success = self.authenticator.authenticate(&credentials).await?;
        let account = link_account(self.accounts.as_ref(), &self.sessions, user_id, &success).await?;
        info!("Linked account {} to user {}", account.username, user_id);
        Ok(account)
    }

    //=====================================================================================
    // Accounts
    //=====================================================================================

    pub async fn list_accounts(&self, user_id: Uuid) -> Result<Vec<AccountSettings>, EngineError> {
        Ok(self.accounts.list_accounts(user_id).await?)
    }

    pub async fn get_account(&self, user_id: Uuid, username: &str) -> Result<Option<AccountSettings>, EngineError> {
        Ok(self.accounts.get_account(user_id, username).await?)
    }

    pub async fn default_account(&self, user_id: Uuid) -> Result<Option<String>, EngineError> {
        Ok(self.accounts.default_account(user_id).await?)
    }

    pub async fn remove_account(&self, user_id: Uuid, username: &str) -> Result<bool, EngineError> {
        Ok(self.accounts.remove_account(user_id, username).await?)
    }

    pub async fn set_default_account(&self, user_id: Uuid, username: &str) -> Result<bool, EngineError> {
        Ok(self.accounts.set_default_account(user_id, username).await?)
    }
}

fn unexpected_output(output: &ActionOutput) -> AutomationError {
    AutomationError::Unexpected(format!("action produced an unexpected result: {:?}", output))
}

#[async_trait]
impl ActionDispatch for Engine {
    async fn dispatch(&self, item: &ScheduledAction) -> Result<ScheduledResult, AutomationError> {
        info!("Dispatching scheduled item {} as {}", item.id, item.account);
        let output = self
            .run(item.user_id, &item.account, item.credentials.clone(), item.payload.to_action())
            .await?;
        match output {
            ActionOutput::Posted(posted) => Ok(ScheduledResult::Posted(posted)),
            ActionOutput::ThreadPosted(items) => Ok(ScheduledResult::Thread(items)),
            other => Err(unexpected_output(&other)),
        }
    }
}
