//! crates/xengage_core/src/executor.rs
//!
//! The Action Executor. Each call opens one execution context, establishes an
//! authenticated session when the action needs one (restore first, full login
//! as the fallback), runs the scripted steps for the action and always closes
//! the context again. Failures come back as values; nothing escapes as a fault.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::auth::{AuthStateMachine, Authenticator, LoginSuccess};
use crate::domain::{
    ActionAuth, ActionOutput, ActionSpec, Credentials, FetchedItem, PostedItem, ProfileData,
    SegmentMedia, Session,
};
use crate::error::{AutomationError, StepContext};
use crate::platform::{
    extraction_script, parse_items, selectors, status_id_from_href, AutomationTimeouts,
    PlatformUrls,
};
use crate::ports::{BrowserLauncher, BrowserPage};
use crate::session::SessionStore;

//=========================================================================================
// Executor Port
//=========================================================================================

/// The structured result of one action.
#[derive(Debug, Clone)]
pub struct ActionReport {
    pub outcome: Result<ActionOutput, AutomationError>,
    /// A session captured by a fresh login during this action. The executor
    /// never stores it; persisting it is the caller's decision.
    pub fresh_session: Option<Session>,
    /// The supplied session was replayed and the platform did not accept it.
    pub session_rejected: bool,
}

impl ActionReport {
    pub fn failed(err: AutomationError) -> Self {
        Self {
            outcome: Err(err),
            fresh_session: None,
            session_rejected: false,
        }
    }

    pub fn succeeded(output: ActionOutput) -> Self {
        Self {
            outcome: Ok(output),
            fresh_session: None,
            session_rejected: false,
        }
    }
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, auth: ActionAuth, spec: ActionSpec) -> ActionReport;
}

//=========================================================================================
// Browser-backed Implementation
//=========================================================================================

/// A status page shows the conversation around the item; look at a few articles
/// to find the requested one.
const SINGLE_ITEM_SCAN: usize = 5;

pub struct BrowserActionExecutor {
    launcher: Arc<dyn BrowserLauncher>,
    sessions: Arc<SessionStore>,
    machine: AuthStateMachine,
    urls: PlatformUrls,
    timeouts: AutomationTimeouts,
}

/// Who the page is acting as once authentication is settled.
struct Established {
    username: String,
    profile: Option<ProfileData>,
}

impl BrowserActionExecutor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        sessions: Arc<SessionStore>,
        urls: PlatformUrls,
        timeouts: AutomationTimeouts,
    ) -> Self {
        let machine = AuthStateMachine::new(urls.clone(), timeouts.clone(), sessions.clone());
        Self {
            launcher,
            sessions,
            machine,
            urls,
            timeouts,
        }
    }

    async fn open_page(&self) -> Result<Box<dyn BrowserPage>, AutomationError> {
        self.launcher.open().await.step("launch browser")
    }

    async fn release(&self, page: Box<dyn BrowserPage>) {
        if let Err(e) = page.close().await {
            warn!("Failed to release browser resources: {}", e);
        }
    }

    async fn run(&self, page: &dyn BrowserPage, auth: &ActionAuth, spec: &ActionSpec) -> ActionReport {
        let mut report = ActionReport::failed(AutomationError::Unexpected("action did not run".to_string()));

        let established = if spec.requires_session() {
            let force_login = matches!(spec, ActionSpec::Login);
            match self.establish(page, auth, force_login, &mut report).await {
                Ok(established) => established,
                Err(e) => {
                    report.outcome = Err(e);
                    return report;
                }
            }
        } else {
            Established {
                username: auth.username.clone(),
                profile: None,
            }
        };

        report.outcome = match spec {
            ActionSpec::Login => Ok(ActionOutput::LoggedIn(established.profile.unwrap_or_default())),
            ActionSpec::Post { content, media } => self
                .post(page, &established.username, content, media, None)
                .await
                .map(ActionOutput::Posted),
            ActionSpec::Reply {
                target_id,
                content,
                media,
            } => self
                .post(page, &established.username, content, media, Some(target_id))
                .await
                .map(ActionOutput::Posted),
            ActionSpec::Thread { segments, media } => self
                .thread(page, &established.username, segments, media)
                .await
                .map(ActionOutput::ThreadPosted),
            ActionSpec::FetchSingle { id } => self
                .fetch(page, &self.urls.status(id), SINGLE_ITEM_SCAN, "")
                .await
                .map(|items| {
                    let exact = items.iter().position(|item| &item.id == id).unwrap_or(0);
                    ActionOutput::Items(items.into_iter().skip(exact).take(1).collect())
                }),
            ActionSpec::FetchTimeline { username, count } => self
                .fetch(page, &self.urls.profile(username), *count, username)
                .await
                .map(ActionOutput::Items),
        };
        report
    }

    /// Restores the supplied session or logs in with the supplied credentials.
    async fn establish(
        &self,
        page: &dyn BrowserPage,
        auth: &ActionAuth,
        force_login: bool,
        report: &mut ActionReport,
    ) -> Result<Established, AutomationError> {
        if !force_login {
            if let Some(session) = &auth.session {
                if self.sessions.restore(session, page).await {
                    return Ok(Established {
                        username: session.username.clone(),
                        profile: None,
                    });
                }
                report.session_rejected = true;
            }
        }

        match &auth.credentials {
            Some(credentials) if credentials.can_login() => {
                let LoginSuccess { session, profile } =
                    self.machine.authenticate(page, credentials).await?;
                let established = Established {
                    username: session.username.clone(),
                    profile: Some(profile),
                };
                report.fresh_session = Some(session);
                Ok(established)
            }
            _ if report.session_rejected => Err(AutomationError::SessionExpired),
            _ => Err(AutomationError::MissingCredentials),
        }
    }

    async fn post(
        &self,
        page: &dyn BrowserPage,
        username: &str,
        content: &str,
        media: &[String],
        reply_to: Option<&String>,
    ) -> Result<PostedItem, AutomationError> {
        let t = &self.timeouts;
        match reply_to {
            None => {
                page.goto(&self.urls.home()).await.step("open home")?;
                self.require(page, selectors::COMPOSE_BUTTON, "open composer").await?;
                page.click(selectors::COMPOSE_BUTTON).await.step("open composer")?;
            }
            Some(target) => {
                page.goto(&self.urls.status(target)).await.step("open reply target")?;
                self.require(page, selectors::REPLY_BUTTON, "open reply target").await?;
                page.click(selectors::REPLY_BUTTON).await.step("open reply composer")?;
            }
        }

        self.require(page, selectors::COMPOSER_TEXTAREA, "open composer").await?;
        page.fill(selectors::COMPOSER_TEXTAREA, content)
            .await
            .step("enter text")?;

        let skipped_media = self.attach_media(page, media).await;

        page.click(selectors::SUBMIT_BUTTON).await.step("submit post")?;
        let confirmed = page
            .wait_for(selectors::TOAST, t.confirm)
            .await
            .step("confirm post")?;
        if !confirmed {
            return Err(AutomationError::step(
                "confirm post",
                format!("no confirmation within {}s", t.confirm.as_secs()),
            ));
        }

        let id = match self.id_from_toast(page).await {
            Some(id) => id,
            None => self.latest_id(page, username).await.ok_or_else(|| {
                AutomationError::step("read new item id", "posted, but the new item could not be located")
            })?,
        };
        info!("Posted item {} as {}", id, username);
        Ok(PostedItem {
            url: self.urls.canonical(username, &id),
            id,
            skipped_media,
        })
    }

    /// Uploads each attachment under its own bound, waiting for that
    /// attachment's own preview slot. A stuck or failed upload is skipped so it
    /// cannot hold up the rest of the post.
    async fn attach_media(&self, page: &dyn BrowserPage, media: &[String]) -> Vec<String> {
        let mut skipped = Vec::new();
        let mut previews = 0;
        for path in media {
            let preview = selectors::attachment_preview(previews + 1);
            let attached = async {
                page.upload(selectors::FILE_INPUT, path).await?;
                page.wait_for(&preview, self.timeouts.upload).await
            }
            .await;
            match attached {
                Ok(true) => previews += 1,
                Ok(false) => {
                    warn!("Upload of {} did not finish in time; skipping it", path);
                    skipped.push(path.clone());
                }
                Err(e) => {
                    warn!("Upload of {} failed: {}", path, e);
                    skipped.push(path.clone());
                }
            }
        }
        skipped
    }

    async fn id_from_toast(&self, page: &dyn BrowserPage) -> Option<String> {
        page.attribute_of(selectors::TOAST_LINK, "href")
            .await
            .ok()
            .flatten()
            .and_then(|href| status_id_from_href(&href))
    }

    /// Fallback when the confirmation has no link: the newest item on the profile.
    async fn latest_id(&self, page: &dyn BrowserPage, username: &str) -> Option<String> {
        self.fetch(page, &self.urls.profile(username), 1, username)
            .await
            .ok()
            .and_then(|items| items.into_iter().next())
            .map(|item| item.id)
    }

    async fn thread(
        &self,
        page: &dyn BrowserPage,
        username: &str,
        segments: &[String],
        media: &SegmentMedia,
    ) -> Result<Vec<PostedItem>, AutomationError> {
        let total = segments.len();
        let mut posted: Vec<PostedItem> = Vec::with_capacity(total);
        for (index, content) in segments.iter().enumerate() {
            let attachments = media.get(&index).map(Vec::as_slice).unwrap_or(&[]);
            let reply_to = posted.last().map(|item| item.id.clone());
            match self
                .post(page, username, content, attachments, reply_to.as_ref())
                .await
            {
                Ok(item) => posted.push(item),
                Err(e) if posted.is_empty() => return Err(e),
                Err(e) => {
                    return Err(AutomationError::ThreadIncomplete {
                        posted: posted.len(),
                        total,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(posted)
    }

    /// Reads up to `limit` items from `url`. No content within the bound is an
    /// empty result, not a failure.
    async fn fetch(
        &self,
        page: &dyn BrowserPage,
        url: &str,
        limit: usize,
        fallback_author: &str,
    ) -> Result<Vec<FetchedItem>, AutomationError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        page.goto(url).await.step("open page")?;
        let loaded = page
            .wait_for(selectors::ARTICLE, self.timeouts.content)
            .await
            .step("wait for content")?;
        if !loaded {
            info!("No content appeared at {}", url);
            return Ok(Vec::new());
        }
        let raw = page
            .evaluate_json(&extraction_script(limit))
            .await
            .step("extract items")?;
        let mut items = parse_items(&raw, fallback_author);
        items.truncate(limit);
        Ok(items)
    }

    async fn require(
        &self,
        page: &dyn BrowserPage,
        selector: &str,
        step: &str,
    ) -> Result<(), AutomationError> {
        let present = page
            .wait_for(selector, self.timeouts.element)
            .await
            .step(step)?;
        if present {
            Ok(())
        } else {
            Err(AutomationError::step(
                step,
                format!("element did not appear within {}s", self.timeouts.element.as_secs()),
            ))
        }
    }
}

#[async_trait]
impl ActionExecutor for BrowserActionExecutor {
    async fn execute(&self, auth: ActionAuth, spec: ActionSpec) -> ActionReport {
        info!("Executing {} action", spec.kind());
        let page = match self.open_page().await {
            Ok(page) => page,
            Err(e) => {
                error!("Could not open a browser for {}: {}", spec.kind(), e);
                return ActionReport::failed(e);
            }
        };
        let report = self.run(page.as_ref(), &auth, &spec).await;
        self.release(page).await;
        if let Err(e) = &report.outcome {
            warn!("{} action failed [{}]: {}", spec.kind(), e.code(), e);
        }
        report
    }
}

#[async_trait]
impl Authenticator for BrowserActionExecutor {
    async fn authenticate(&self, credentials: &Credentials) -> Result<LoginSuccess, AutomationError> {
        let page = self.open_page().await?;
        let result = self.machine.authenticate(page.as_ref(), credentials).await;
        self.release(page).await;
        result
    }
}
