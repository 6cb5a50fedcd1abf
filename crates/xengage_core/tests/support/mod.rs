//! A scripted stand-in for the remote platform. Pages answer selector queries
//! from a small state model (which screen is showing, who is logged in, what
//! the composer holds) so the real state machine, session store and executor
//! can run against it without a browser.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use xengage_core::platform::selectors;
use xengage_core::{
    AutomationTimeouts, BrowserActionExecutor, BrowserLauncher, BrowserPage, PlatformUrls, PortError,
    PortResult, SessionCookie, SessionStore, SystemClock,
};

pub const BASE: &str = "https://x.test";

pub fn urls() -> PlatformUrls {
    PlatformUrls::new(BASE)
}

/// Waits short enough to keep the suite fast.
pub fn timeouts() -> AutomationTimeouts {
    let short = Duration::from_millis(40);
    AutomationTimeouts {
        element: short,
        prompt: short,
        login: short,
        restore: short,
        upload: short,
        confirm: short,
        content: short,
        poll: Duration::from_millis(5),
    }
}

#[derive(Debug, Clone)]
pub struct FakeAccount {
    pub password: String,
    pub display_name: String,
    pub two_factor: Option<String>,
    pub verification: bool,
}

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub id: String,
    pub author: String,
    pub text: String,
    pub reply_to: Option<String>,
    pub likes: Option<String>,
}

#[derive(Default)]
struct PlatformState {
    accounts: HashMap<String, FakeAccount>,
    /// auth_token cookie value -> username.
    tokens: HashMap<String, String>,
    stuck_uploads: HashSet<String>,
    failing_content: Option<String>,
    hide_toast_link: bool,
    items: Vec<FakeItem>,
    next_id: u64,
    pages_opened: usize,
    pages_closed: usize,
}

#[derive(Clone, Default)]
pub struct FakePlatform {
    state: Arc<Mutex<PlatformState>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        let platform = Self::default();
        platform.lock().next_id = 1000;
        platform
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PlatformState> {
        self.state.lock().unwrap()
    }

    pub fn with_account(self, username: &str, password: &str) -> Self {
        self.lock().accounts.insert(
            username.to_string(),
            FakeAccount {
                password: password.to_string(),
                display_name: format!("{} display", username),
                two_factor: None,
                verification: false,
            },
        );
        self
    }

    pub fn with_two_factor(self, username: &str, code: &str) -> Self {
        if let Some(account) = self.lock().accounts.get_mut(username) {
            account.two_factor = Some(code.to_string());
        }
        self
    }

    pub fn with_verification(self, username: &str) -> Self {
        if let Some(account) = self.lock().accounts.get_mut(username) {
            account.verification = true;
        }
        self
    }

    pub fn with_item(self, author: &str, text: &str, likes: Option<&str>) -> Self {
        {
            let mut state = self.lock();
            state.next_id += 1;
            let id = state.next_id.to_string();
            state.items.insert(
                0,
                FakeItem {
                    id,
                    author: author.to_string(),
                    text: text.to_string(),
                    reply_to: None,
                    likes: likes.map(str::to_string),
                },
            );
        }
        self
    }

    pub fn stick_upload(&self, path: &str) {
        self.lock().stuck_uploads.insert(path.to_string());
    }

    pub fn fail_submit_of(&self, content: &str) {
        self.lock().failing_content = Some(content.to_string());
    }

    pub fn hide_toast_link(&self) {
        self.lock().hide_toast_link = true;
    }

    /// Logs every session of `username` out on the platform side.
    pub fn revoke_sessions(&self, username: &str) {
        self.lock().tokens.retain(|_, user| user != username);
    }

    pub fn items(&self) -> Vec<FakeItem> {
        self.lock().items.clone()
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.lock().items.iter().map(|i| i.id.clone()).collect()
    }

    pub fn pages_opened(&self) -> usize {
        self.lock().pages_opened
    }

    pub fn pages_closed(&self) -> usize {
        self.lock().pages_closed
    }

    pub fn launcher(&self) -> Arc<FakeLauncher> {
        Arc::new(FakeLauncher {
            platform: self.clone(),
        })
    }

    pub fn session_store(&self) -> Arc<SessionStore> {
        Arc::new(SessionStore::new(urls(), timeouts(), Arc::new(SystemClock)))
    }

    pub fn executor(&self, sessions: Arc<SessionStore>) -> BrowserActionExecutor {
        BrowserActionExecutor::new(self.launcher(), sessions, urls(), timeouts())
    }
}

pub struct FakeLauncher {
    platform: FakePlatform,
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn open(&self) -> PortResult<Box<dyn BrowserPage>> {
        self.platform.lock().pages_opened += 1;
        Ok(Box::new(FakePage {
            platform: self.platform.clone(),
            state: Mutex::new(PageState::default()),
        }))
    }
}

//=========================================================================================
// Page model
//=========================================================================================

#[derive(Debug, Clone, Default, PartialEq)]
enum Screen {
    #[default]
    Blank,
    Landing,
    LoginUsername,
    LoginVerification,
    LoginPassword,
    LoginTwoFactor,
    Home,
    Profile(String),
    Status(String),
}

#[derive(Default)]
struct PageState {
    screen: Screen,
    inputs: HashMap<String, String>,
    pending_user: Option<String>,
    user: Option<String>,
    login_error: Option<String>,
    cookies: Vec<SessionCookie>,
    local_storage: BTreeMap<String, String>,
    menu_open: bool,
    composer_open: bool,
    reply_to: Option<String>,
    /// Finished attachment previews in the open composer.
    attachments: usize,
    toast: Option<String>,
}

fn preview_position(selector: &str) -> Option<usize> {
    selector
        .strip_prefix(selectors::ATTACHMENTS)?
        .strip_prefix(" > div:nth-child(")?
        .strip_suffix(')')?
        .parse()
        .ok()
}

pub struct FakePage {
    platform: FakePlatform,
    state: Mutex<PageState>,
}

impl FakePage {
    fn page(&self) -> std::sync::MutexGuard<'_, PageState> {
        self.state.lock().unwrap()
    }

    fn visible(&self, selector: &str) -> bool {
        let page = self.page();
        let logged_in = page.user.is_some();
        match selector {
            s if s == selectors::USERNAME_INPUT || s == selectors::USERNAME_NEXT => {
                page.screen == Screen::LoginUsername
            }
            s if s == selectors::VERIFICATION_INPUT => page.screen == Screen::LoginVerification,
            s if s == selectors::PASSWORD_INPUT => page.screen == Screen::LoginPassword,
            s if s == selectors::TWO_FACTOR_INPUT => page.screen == Screen::LoginTwoFactor,
            s if s == selectors::LOGIN_BUTTON => {
                matches!(page.screen, Screen::LoginPassword | Screen::LoginTwoFactor)
            }
            s if s == selectors::LOGIN_ERROR => page.login_error.is_some(),
            s if s == selectors::HOME_LANDMARK
                || s == selectors::ACCOUNT_SWITCHER
                || s == selectors::PRIMARY_COLUMN =>
            {
                logged_in
            }
            s if s == selectors::USER_CELL
                || s == selectors::USER_CELL_HANDLE
                || s == selectors::USER_CELL_NAME
                || s == selectors::USER_CELL_AVATAR =>
            {
                page.menu_open
            }
            s if s == selectors::COMPOSE_BUTTON => logged_in && page.screen == Screen::Home,
            s if s == selectors::REPLY_BUTTON => {
                logged_in && matches!(&page.screen, Screen::Status(id) if self.item(id).is_some())
            }
            s if s == selectors::COMPOSER_TEXTAREA
                || s == selectors::FILE_INPUT
                || s == selectors::SUBMIT_BUTTON =>
            {
                page.composer_open
            }
            s if s == selectors::ATTACHMENTS => page.composer_open && page.attachments > 0,
            s if preview_position(s).is_some_and(|n| n >= 1 && n <= page.attachments) => page.composer_open,
            s if s == selectors::TOAST => page.toast.is_some(),
            s if s == selectors::TOAST_LINK => {
                page.toast.is_some() && !self.platform.lock().hide_toast_link
            }
            s if s == selectors::ARTICLE => !self.visible_items(&page.screen).is_empty(),
            _ => false,
        }
    }

    fn item(&self, id: &str) -> Option<FakeItem> {
        self.platform.lock().items.iter().find(|i| i.id == id).cloned()
    }

    fn visible_items(&self, screen: &Screen) -> Vec<FakeItem> {
        let platform = self.platform.lock();
        match screen {
            Screen::Profile(user) => platform
                .items
                .iter()
                .filter(|i| &i.author == user)
                .cloned()
                .collect(),
            Screen::Status(id) => {
                let mut items: Vec<FakeItem> = platform.items.iter().filter(|i| &i.id == id).cloned().collect();
                items.extend(
                    platform
                        .items
                        .iter()
                        .filter(|i| i.reply_to.as_deref() == Some(id.as_str()))
                        .cloned(),
                );
                items
            }
            _ => Vec::new(),
        }
    }

    fn require(&self, selector: &str) -> PortResult<()> {
        if self.visible(selector) {
            Ok(())
        } else {
            Err(PortError::NotFound(selector.to_string()))
        }
    }

    fn authenticate_from_cookies(&self, page: &mut PageState) {
        if page.user.is_some() {
            return;
        }
        let now = Utc::now();
        let platform = self.platform.lock();
        page.user = page
            .cookies
            .iter()
            .filter(|c| c.name == "auth_token" && !c.is_expired_at(now))
            .find_map(|c| platform.tokens.get(&c.value).cloned());
    }

    fn complete_login(&self, page: &mut PageState, username: String) {
        let token = uuid::Uuid::new_v4().to_string();
        self.platform.lock().tokens.insert(token.clone(), username.clone());
        page.cookies.retain(|c| c.name != "auth_token");
        page.cookies.push(SessionCookie {
            name: "auth_token".to_string(),
            value: token,
            domain: ".x.test".to_string(),
            path: "/".to_string(),
            expires: Some((Utc::now() + ChronoDuration::days(30)).timestamp() as f64),
            http_only: true,
            secure: true,
            same_site: Some("Lax".to_string()),
        });
        page.local_storage
            .insert("active_user".to_string(), username.clone());
        page.user = Some(username);
        page.pending_user = None;
        page.login_error = None;
        page.screen = Screen::Home;
    }
}

#[async_trait]
impl BrowserPage for FakePage {
    async fn goto(&self, url: &str) -> PortResult<()> {
        let path = url
            .strip_prefix(BASE)
            .ok_or_else(|| PortError::Unexpected(format!("navigation outside the platform: {}", url)))?
            .to_string();
        let mut page = self.page();
        page.menu_open = false;
        page.composer_open = false;
        page.toast = None;
        page.login_error = None;
        page.inputs.clear();
        self.authenticate_from_cookies(&mut page);
        page.screen = match path.as_str() {
            "" | "/" => Screen::Landing,
            "/i/flow/login" => Screen::LoginUsername,
            "/home" if page.user.is_some() => Screen::Home,
            "/home" => Screen::LoginUsername,
            p if p.starts_with("/i/status/") => Screen::Status(p["/i/status/".len()..].to_string()),
            p => Screen::Profile(p.trim_start_matches('/').to_string()),
        };
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> PortResult<bool> {
        if self.visible(selector) {
            return Ok(true);
        }
        if !timeout.is_zero() {
            tokio::time::sleep(timeout).await;
        }
        Ok(self.visible(selector))
    }

    async fn fill(&self, selector: &str, text: &str) -> PortResult<()> {
        self.require(selector)?;
        self.page().inputs.insert(selector.to_string(), text.to_string());
        Ok(())
    }

    async fn click(&self, selector: &str) -> PortResult<()> {
        self.require(selector)?;
        let mut page = self.page();
        match selector {
            s if s == selectors::USERNAME_NEXT => {
                let username = page.inputs.get(selectors::USERNAME_INPUT).cloned().unwrap_or_default();
                let account = self.platform.lock().accounts.get(&username).cloned();
                match account {
                    None => {
                        page.login_error = Some("Sorry, we could not find your account.".to_string());
                    }
                    Some(account) if account.verification => page.screen = Screen::LoginVerification,
                    Some(_) => {
                        page.pending_user = Some(username);
                        page.screen = Screen::LoginPassword;
                    }
                }
            }
            s if s == selectors::LOGIN_BUTTON => {
                let username = page.pending_user.clone().unwrap_or_default();
                let account = self.platform.lock().accounts.get(&username).cloned();
                let Some(account) = account else {
                    page.login_error = Some("Something went wrong.".to_string());
                    return Ok(());
                };
                if page.screen == Screen::LoginPassword {
                    let password = page.inputs.get(selectors::PASSWORD_INPUT).cloned().unwrap_or_default();
                    if password != account.password {
                        page.login_error = Some("Wrong password!".to_string());
                    } else if account.two_factor.is_some() {
                        page.screen = Screen::LoginTwoFactor;
                    } else {
                        self.complete_login(&mut page, username);
                    }
                } else {
                    let code = page.inputs.get(selectors::TWO_FACTOR_INPUT).cloned();
                    if code == account.two_factor {
                        self.complete_login(&mut page, username);
                    } else {
                        page.login_error = Some("Your code was incorrect.".to_string());
                    }
                }
            }
            s if s == selectors::ACCOUNT_SWITCHER => page.menu_open = true,
            s if s == selectors::PRIMARY_COLUMN => page.menu_open = false,
            s if s == selectors::COMPOSE_BUTTON => {
                page.composer_open = true;
                page.reply_to = None;
            }
            s if s == selectors::REPLY_BUTTON => {
                if let Screen::Status(id) = &page.screen {
                    page.reply_to = Some(id.clone());
                }
                page.composer_open = true;
            }
            s if s == selectors::SUBMIT_BUTTON => {
                let text = page
                    .inputs
                    .get(selectors::COMPOSER_TEXTAREA)
                    .cloned()
                    .unwrap_or_default();
                let mut platform = self.platform.lock();
                if platform.failing_content.as_deref() == Some(text.as_str()) {
                    return Err(PortError::Unexpected("submit button is disabled".to_string()));
                }
                platform.next_id += 1;
                let id = platform.next_id.to_string();
                platform.items.insert(
                    0,
                    FakeItem {
                        id: id.clone(),
                        author: page.user.clone().unwrap_or_default(),
                        text,
                        reply_to: page.reply_to.clone(),
                        likes: None,
                    },
                );
                page.composer_open = false;
                page.attachments = 0;
                page.toast = Some(id);
            }
            _ => {}
        }
        Ok(())
    }

    async fn upload(&self, selector: &str, path: &str) -> PortResult<()> {
        self.require(selector)?;
        let stuck = self.platform.lock().stuck_uploads.contains(path);
        if !stuck {
            self.page().attachments += 1;
        }
        Ok(())
    }

    async fn text_of(&self, selector: &str) -> PortResult<Option<String>> {
        if !self.visible(selector) {
            return Ok(None);
        }
        let page = self.page();
        let user = page.user.clone().unwrap_or_default();
        Ok(match selector {
            s if s == selectors::LOGIN_ERROR => page.login_error.clone(),
            s if s == selectors::USER_CELL_HANDLE => Some(format!("@{}", user)),
            s if s == selectors::USER_CELL_NAME => self
                .platform
                .lock()
                .accounts
                .get(&user)
                .map(|a| a.display_name.clone()),
            _ => None,
        })
    }

    async fn attribute_of(&self, selector: &str, attribute: &str) -> PortResult<Option<String>> {
        if !self.visible(selector) {
            return Ok(None);
        }
        let page = self.page();
        let user = page.user.clone().unwrap_or_default();
        Ok(match (selector, attribute) {
            (s, "src") if s == selectors::USER_CELL_AVATAR => Some(format!("https://img.x.test/{}.png", user)),
            (s, "href") if s == selectors::TOAST_LINK => page.toast.as_ref().map(|id| format!("/{}/status/{}", user, id)),
            _ => None,
        })
    }

    async fn evaluate_json(&self, _script: &str) -> PortResult<Value> {
        let screen = self.page().screen.clone();
        let entries: Vec<Value> = self
            .visible_items(&screen)
            .into_iter()
            .map(|item| {
                json!({
                    "href": format!("/{}/status/{}", item.author, item.id),
                    "text": item.text,
                    "author": format!("{} display\n@{}\n·\n1h", item.author, item.author),
                    "time": "2024-05-01T10:00:00.000Z",
                    "likes": item.likes,
                    "reposts": null,
                    "replies": "",
                })
            })
            .collect();
        Ok(Value::Array(entries))
    }

    async fn cookies(&self) -> PortResult<Vec<SessionCookie>> {
        Ok(self.page().cookies.clone())
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> PortResult<()> {
        let mut page = self.page();
        for cookie in cookies {
            page.cookies.retain(|c| c.name != cookie.name);
            page.cookies.push(cookie.clone());
        }
        Ok(())
    }

    async fn local_storage(&self) -> PortResult<BTreeMap<String, String>> {
        Ok(self.page().local_storage.clone())
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> PortResult<()> {
        let mut page = self.page();
        if page.screen == Screen::Blank {
            return Err(PortError::Unexpected("no origin for local storage".to_string()));
        }
        page.local_storage.extend(entries.clone());
        Ok(())
    }

    async fn close(&self) -> PortResult<()> {
        self.platform.lock().pages_closed += 1;
        Ok(())
    }
}
