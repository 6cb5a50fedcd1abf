//! crates/xengage_core/src/platform.rs
//!
//! Everything that is specific to the remote platform's UI: URLs, selectors,
//! wait bounds, the item extraction script and the helpers that parse what it
//! returns. Selector brittleness is an accepted external risk; keeping them in
//! one place is what makes it manageable.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::FetchedItem;
use crate::ports::{BrowserPage, PortResult};

//=========================================================================================
// Selectors
//=========================================================================================

pub mod selectors {
    pub const USERNAME_INPUT: &str = r#"input[autocomplete="username"]"#;
    pub const USERNAME_NEXT: &str = r#"div[data-testid="auth_input_forward_button"]"#;
    pub const VERIFICATION_INPUT: &str = r#"input[data-testid="ocfEnterTextTextInput"]"#;
    pub const PASSWORD_INPUT: &str = r#"input[name="password"]"#;
    pub const LOGIN_BUTTON: &str = r#"div[data-testid="LoginForm_Login_Button"]"#;
    pub const TWO_FACTOR_INPUT: &str = r#"input[data-testid="LoginForm_CodeInput"]"#;
    pub const LOGIN_ERROR: &str = r#"div[data-testid="LoginForm_Error"]"#;

    /// Present only for an authenticated context.
    pub const HOME_LANDMARK: &str = r#"a[data-testid="AppTabBar_Home_Link"]"#;

    pub const ACCOUNT_SWITCHER: &str = r#"div[data-testid="SideNav_AccountSwitcher_Button"]"#;
    pub const USER_CELL: &str = r#"div[data-testid="UserCell"]"#;
    pub const USER_CELL_HANDLE: &str = r#"div[data-testid="UserCell"] div[dir="ltr"] span"#;
    pub const USER_CELL_NAME: &str = r#"div[data-testid="UserCell"] div[dir="auto"] span"#;
    pub const USER_CELL_AVATAR: &str = r#"div[data-testid="UserCell"] img"#;
    pub const PRIMARY_COLUMN: &str = r#"div[data-testid="primaryColumn"]"#;

    pub const COMPOSE_BUTTON: &str = r#"a[data-testid="SideNav_NewTweet_Button"]"#;
    pub const COMPOSER_TEXTAREA: &str = r#"div[data-testid="tweetTextarea_0"]"#;
    pub const FILE_INPUT: &str = r#"input[data-testid="fileInput"]"#;
    pub const ATTACHMENTS: &str = r#"div[data-testid="attachments"]"#;
    pub const SUBMIT_BUTTON: &str = r#"div[data-testid="tweetButton"]"#;
    pub const REPLY_BUTTON: &str = r#"div[data-testid="reply"]"#;
    pub const TOAST: &str = r#"div[data-testid="toast"]"#;
    pub const TOAST_LINK: &str = r#"div[data-testid="toast"] a[href*="/status/"]"#;

    pub const ARTICLE: &str = r#"article[data-testid="tweet"]"#;

    /// The preview of the `position`-th (1-based) finished attachment. The
    /// container itself stays up once the first one lands.
    pub fn attachment_preview(position: usize) -> String {
        format!("{} > div:nth-child({})", ATTACHMENTS, position)
    }
}

//=========================================================================================
// URLs
//=========================================================================================

#[derive(Debug, Clone)]
pub struct PlatformUrls {
    base: String,
}

impl PlatformUrls {
    pub fn new(base: impl Into<String>) -> Self {
        let base = base.into();
        Self {
            base: base.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn login(&self) -> String {
        format!("{}/i/flow/login", self.base)
    }

    pub fn home(&self) -> String {
        format!("{}/home", self.base)
    }

    pub fn profile(&self, username: &str) -> String {
        format!("{}/{}", self.base, username.trim_start_matches('@'))
    }

    pub fn status(&self, id: &str) -> String {
        format!("{}/i/status/{}", self.base, id)
    }

    /// The canonical public URL of an item.
    pub fn canonical(&self, username: &str, id: &str) -> String {
        format!("{}/{}/status/{}", self.base, username.trim_start_matches('@'), id)
    }
}

impl Default for PlatformUrls {
    fn default() -> Self {
        Self::new("https://twitter.com")
    }
}

//=========================================================================================
// Wait Bounds
//=========================================================================================

/// Explicit bounds for every wait point in the scripted flows.
#[derive(Debug, Clone)]
pub struct AutomationTimeouts {
    /// Generic element waits (composer, buttons, prompts).
    pub element: Duration,
    /// How long to look for the verification / password / two-factor branch.
    pub prompt: Duration,
    /// Waiting for the post-login landmark.
    pub login: Duration,
    /// Waiting for the landmark after a session restore.
    pub restore: Duration,
    /// Per attachment.
    pub upload: Duration,
    /// Waiting for the post confirmation toast.
    pub confirm: Duration,
    /// Waiting for the first content item on timeline/status pages.
    pub content: Duration,
    /// Poll interval when several selectors are watched at once.
    pub poll: Duration,
}

impl Default for AutomationTimeouts {
    fn default() -> Self {
        Self {
            element: Duration::from_secs(10),
            prompt: Duration::from_secs(5),
            login: Duration::from_secs(10),
            restore: Duration::from_secs(5),
            upload: Duration::from_secs(30),
            confirm: Duration::from_secs(15),
            content: Duration::from_secs(10),
            poll: Duration::from_millis(250),
        }
    }
}

/// Watches several selectors and returns the index of the first one present,
/// or `None` once `timeout` has elapsed.
pub async fn first_present(
    page: &dyn BrowserPage,
    candidates: &[&str],
    timeout: Duration,
    poll: Duration,
) -> PortResult<Option<usize>> {
    let deadline = Instant::now() + timeout;
    loop {
        for (index, selector) in candidates.iter().enumerate() {
            if page.wait_for(selector, Duration::ZERO).await? {
                return Ok(Some(index));
            }
        }
        let now = Instant::now();
        if now >= deadline {
            return Ok(None);
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

//=========================================================================================
// Item Extraction
//=========================================================================================

/// Builds the in-page script that collects up to `limit` items as JSON.
/// Counters are returned as raw label text and parsed on the Rust side.
pub fn extraction_script(limit: usize) -> String {
    format!(
        r#"(() => Array.from(document.querySelectorAll('article[data-testid="tweet"]')).slice(0, {limit}).map((el) => {{
    const text = (sel) => {{ const n = el.querySelector(sel); return n ? n.innerText.trim() : null; }};
    const link = el.querySelector('a[href*="/status/"]');
    const time = el.querySelector('time');
    return {{
        href: link ? link.getAttribute('href') : null,
        text: text('div[data-testid="tweetText"]'),
        author: text('div[data-testid="User-Name"]'),
        time: time ? time.getAttribute('datetime') : null,
        likes: text('div[data-testid="like"]') ?? text('div[data-testid="unlike"]'),
        reposts: text('div[data-testid="retweet"]') ?? text('div[data-testid="unretweet"]'),
        replies: text('div[data-testid="reply"]'),
    }};
}}))()"#
    )
}

/// Turns the script's JSON into items. Entries without a status link are
/// skipped; absent or unparseable counters become zero.
pub fn parse_items(value: &Value, fallback_author: &str) -> Vec<FetchedItem> {
    let Some(entries) = value.as_array() else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let id = entry
                .get("href")
                .and_then(Value::as_str)
                .and_then(status_id_from_href)?;
            let field = |key: &str| entry.get(key).and_then(Value::as_str);
            let author = field("author")
                .map(author_handle)
                .filter(|a| !a.is_empty())
                .unwrap_or_else(|| fallback_author.to_string());
            Some(FetchedItem {
                id,
                text: field("text").unwrap_or_default().to_string(),
                author,
                created_at: field("time")
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc)),
                likes_count: field("likes").map(parse_count).unwrap_or(0),
                reposts_count: field("reposts").map(parse_count).unwrap_or(0),
                replies_count: field("replies").map(parse_count).unwrap_or(0),
            })
        })
        .collect()
}

/// The author block reads "Display Name\n@handle\n·\n3h"; prefer the handle.
fn author_handle(raw: &str) -> String {
    raw.split_whitespace()
        .find_map(|part| part.strip_prefix('@'))
        .map(str::to_string)
        .unwrap_or_else(|| raw.lines().next().unwrap_or_default().trim().to_string())
}

fn status_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/status/(\d+)").expect("status id pattern is valid"))
}

/// Extracts the numeric item id from a `/user/status/<id>` link.
pub fn status_id_from_href(href: &str) -> Option<String> {
    status_regex()
        .captures(href)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parses engagement labels such as "", "7", "1,204", "3.4K" or "2M".
pub fn parse_count(label: &str) -> u64 {
    let cleaned: String = label
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();
    if cleaned.is_empty() {
        return 0;
    }
    let (number, multiplier) = match cleaned.chars().last() {
        Some('K') | Some('k') => (&cleaned[..cleaned.len() - 1], 1_000.0),
        Some('M') | Some('m') => (&cleaned[..cleaned.len() - 1], 1_000_000.0),
        Some('B') | Some('b') => (&cleaned[..cleaned.len() - 1], 1_000_000_000.0),
        _ => (cleaned.as_str(), 1.0),
    };
    match number.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => (value * multiplier).round() as u64,
        _ => 0,
    }
}
