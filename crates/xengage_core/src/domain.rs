//! crates/xengage_core/src/domain.rs
//!
//! Defines the core data structures for the engine.
//! Everything that crosses a persistence or API boundary derives serde; the
//! field names of `SessionData` match the stored `{cookies, localStorage}` shape.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use crate::error::FailureReport;

//=========================================================================================
// Credentials & Sessions
//=========================================================================================

/// Login material for one authentication attempt. Never persisted.
#[derive(Clone, Default, Deserialize)]
pub struct Credentials {
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, alias = "two_factor_token")]
    pub two_factor_code: Option<String>,
    /// Name of a stored session to replay; defaults to the username.
    #[serde(default)]
    pub session_token: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Self::default()
        }
    }

    pub fn with_two_factor(mut self, code: impl Into<String>) -> Self {
        self.two_factor_code = Some(code.into());
        self
    }

    /// Whether these credentials can drive a full login (a password is present).
    pub fn can_login(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("two_factor_code", &self.two_factor_code.as_ref().map(|_| "<redacted>"))
            .field("session_token", &self.session_token.is_some())
            .finish()
    }
}

/// A single browser cookie as captured from an execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Expiry as seconds since the unix epoch; `None` for session cookies.
    #[serde(default)]
    pub expires: Option<f64>,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".to_string()
}

impl SessionCookie {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires {
            Some(expires) if expires > 0.0 => {
                let secs = expires.trunc() as i64;
                match Utc.timestamp_opt(secs, 0).single() {
                    Some(at) => at <= now,
                    None => false,
                }
            }
            _ => false,
        }
    }
}

/// The opaque persisted session payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(default)]
    pub cookies: Vec<SessionCookie>,
    #[serde(default, rename = "localStorage", alias = "local_storage")]
    pub local_storage: BTreeMap<String, String>,
}

impl SessionData {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty() && self.local_storage.is_empty()
    }
}

/// Minimal state needed to resume an authenticated context.
/// Immutable once captured; a newer capture replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub data: SessionData,
    pub captured_at: DateTime<Utc>,
}

/// Profile details scraped after a successful login. Missing pieces are empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileData {
    pub username: String,
    pub display_name: String,
    pub profile_image_url: String,
}

/// A linked platform account as stored by the account collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSettings {
    pub username: String,
    pub display_name: Option<String>,
    pub profile_image_url: Option<String>,
    pub is_active: bool,
    pub auto_login: bool,
    pub session_data: Option<SessionData>,
}

impl AccountSettings {
    /// Builds the account record that results from a successful login.
    pub fn from_login(profile: &ProfileData, session: &Session) -> Self {
        let username = if profile.username.is_empty() {
            session.username.clone()
        } else {
            profile.username.clone()
        };
        Self {
            username,
            display_name: non_empty(&profile.display_name),
            profile_image_url: non_empty(&profile.profile_image_url),
            is_active: true,
            auto_login: true,
            session_data: Some(session.data.clone()),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

//=========================================================================================
// Auth Requests
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthRequestStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AuthRequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// An asynchronous, poll-able authentication attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuthRequest {
    pub request_id: String,
    pub user_id: Uuid,
    pub status: AuthRequestStatus,
    pub created_at: DateTime<Utc>,
    pub profile: Option<ProfileData>,
    pub error: Option<FailureReport>,
}

//=========================================================================================
// Actions
//=========================================================================================

/// Media attachments keyed by thread segment index.
pub type SegmentMedia = BTreeMap<usize, Vec<String>>;

/// One logical action the executor can perform.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionSpec {
    Login,
    Post {
        content: String,
        media: Vec<String>,
    },
    Reply {
        target_id: String,
        content: String,
        media: Vec<String>,
    },
    Thread {
        segments: Vec<String>,
        media: SegmentMedia,
    },
    FetchSingle {
        id: String,
    },
    FetchTimeline {
        username: String,
        count: usize,
    },
}

impl ActionSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Post { .. } => "post",
            Self::Reply { .. } => "reply",
            Self::Thread { .. } => "thread",
            Self::FetchSingle { .. } => "fetch-single",
            Self::FetchTimeline { .. } => "fetch-timeline",
        }
    }

    pub fn requires_session(&self) -> bool {
        matches!(
            self,
            Self::Login | Self::Post { .. } | Self::Reply { .. } | Self::Thread { .. }
        )
    }
}

/// How the executor should obtain an authenticated context.
#[derive(Debug, Clone, Default)]
pub struct ActionAuth {
    pub username: String,
    pub session: Option<Session>,
    pub credentials: Option<Credentials>,
}

impl ActionAuth {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_credentials(credentials: Credentials) -> Self {
        Self {
            username: credentials.username.clone(),
            session: None,
            credentials: Some(credentials),
        }
    }

    pub fn with_session(mut self, session: Option<Session>) -> Self {
        self.session = session;
        self
    }
}

/// A newly created platform item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedItem {
    pub id: String,
    pub url: String,
    /// Attachments that did not finish uploading within their own bound.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_media: Vec<String>,
}

/// A platform item read back from a timeline or a status page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedItem {
    pub id: String,
    pub text: String,
    pub author: String,
    pub created_at: Option<DateTime<Utc>>,
    pub likes_count: u64,
    pub reposts_count: u64,
    pub replies_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutput {
    LoggedIn(ProfileData),
    Posted(PostedItem),
    ThreadPosted(Vec<PostedItem>),
    Items(Vec<FetchedItem>),
}

//=========================================================================================
// Scheduled Actions
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledStatus {
    Pending,
    Posted,
    Failed,
}

/// What a scheduled item will do once it is due.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduledPayload {
    Post {
        content: String,
        media: Vec<String>,
        reply_to_id: Option<String>,
        thread_id: Option<String>,
    },
    Thread {
        segments: Vec<String>,
        media: SegmentMedia,
    },
}

impl ScheduledPayload {
    pub fn is_thread(&self) -> bool {
        matches!(self, Self::Thread { .. })
    }

    /// Namespace prefix for ids of this payload kind.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            Self::Thread { .. } => "scheduled-thread",
            Self::Post {
                reply_to_id: Some(_),
                ..
            } => "scheduled-reply",
            Self::Post { .. } => "scheduled",
        }
    }

    pub fn to_action(&self) -> ActionSpec {
        match self {
            Self::Post {
                content,
                media,
                reply_to_id: Some(target),
                ..
            } => ActionSpec::Reply {
                target_id: target.clone(),
                content: content.clone(),
                media: media.clone(),
            },
            Self::Post { content, media, .. } => ActionSpec::Post {
                content: content.clone(),
                media: media.clone(),
            },
            Self::Thread { segments, media } => ActionSpec::Thread {
                segments: segments.clone(),
                media: media.clone(),
            },
        }
    }
}

/// Outcome recorded on a scheduled item after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ScheduledResult {
    Posted(PostedItem),
    Thread(Vec<PostedItem>),
    Failed(FailureReport),
}

/// A deferred post/reply/thread.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduledAction {
    pub id: String,
    pub user_id: Option<Uuid>,
    pub payload: ScheduledPayload,
    pub schedule_time: DateTime<Utc>,
    /// Account whose stored session is resolved at dispatch time.
    pub account: String,
    #[serde(skip)]
    pub credentials: Option<Credentials>,
    pub status: ScheduledStatus,
    pub result: Option<ScheduledResult>,
    pub completed_at: Option<DateTime<Utc>>,
}
