//! crates/xengage_core/src/session.rs
//!
//! The Session Store: captures the cookies and local storage of an
//! authenticated execution context, replays them into a fresh one, and keeps
//! the most recent session per username.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::domain::{Session, SessionData};
use crate::platform::{selectors, AutomationTimeouts, PlatformUrls};
use crate::ports::{BrowserPage, Clock, PortResult};

pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    urls: PlatformUrls,
    timeouts: AutomationTimeouts,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(urls: PlatformUrls, timeouts: AutomationTimeouts, clock: Arc<dyn Clock>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            urls,
            timeouts,
            clock,
        }
    }

    /// Reads every cookie and the full local storage snapshot of `page`.
    pub async fn capture(&self, username: &str, page: &dyn BrowserPage) -> PortResult<Session> {
        let cookies = page.cookies().await?;
        let local_storage = match page.local_storage().await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read local storage for {}: {}", username, e);
                Default::default()
            }
        };
        debug!(
            "Captured {} cookies and {} storage entries for {}",
            cookies.len(),
            local_storage.len(),
            username
        );
        Ok(Session {
            username: username.to_string(),
            data: SessionData {
                cookies,
                local_storage,
            },
            captured_at: self.clock.now(),
        })
    }

    /// Replays `session` into `page` and checks for the home landmark.
    ///
    /// Never fails: any problem, including expired cookies, is reported as
    /// `false` and the caller is expected to fall back to a full login.
    pub async fn restore(&self, session: &Session, page: &dyn BrowserPage) -> bool {
        match self.try_restore(session, page).await {
            Ok(restored) => {
                info!(
                    "Session restore for {} {}",
                    session.username,
                    if restored { "succeeded" } else { "was rejected" }
                );
                restored
            }
            Err(e) => {
                warn!("Session restore for {} failed: {}", session.username, e);
                false
            }
        }
    }

    async fn try_restore(&self, session: &Session, page: &dyn BrowserPage) -> PortResult<bool> {
        let now = self.clock.now();
        let live: Vec<_> = session
            .data
            .cookies
            .iter()
            .filter(|c| !c.is_expired_at(now))
            .cloned()
            .collect();
        if live.is_empty() {
            debug!("No unexpired cookies left for {}", session.username);
            return Ok(false);
        }
        page.set_cookies(&live).await?;

        // Local storage is per origin, so the page must be on the platform first.
        page.goto(self.urls.base()).await?;
        if !session.data.local_storage.is_empty() {
            page.set_local_storage(&session.data.local_storage).await?;
        }
        page.goto(&self.urls.home()).await?;
        page.wait_for(selectors::HOME_LANDMARK, self.timeouts.restore)
            .await
    }

    pub async fn get(&self, username: &str) -> Option<Session> {
        self.sessions.read().await.get(username).cloned()
    }

    /// Stores `session` as the current one for its username. Concurrent
    /// captures for the same username race; the last writer wins.
    pub async fn save(&self, session: Session) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.username.clone(), session);
    }

    /// Discards the stored session for `username`, returning whether one existed.
    pub async fn invalidate(&self, username: &str) -> bool {
        let removed = self.sessions.write().await.remove(username).is_some();
        if removed {
            info!("Invalidated stored session for {}", username);
        }
        removed
    }
}
