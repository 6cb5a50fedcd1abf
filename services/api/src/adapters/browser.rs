//! services/api/src/adapters/browser.rs
//!
//! The Chromium adapter. It implements the `BrowserLauncher` and `BrowserPage`
//! ports from the core crate on top of `chromiumoxide`, driving a real browser
//! over the DevTools protocol. Every `open` launches a separate browser process,
//! so two actions never share cookies or storage.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::network::{CookieParam, CookieSameSite, TimeSinceEpoch};
use chromiumoxide::{Element, Page};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use xengage_core::domain::SessionCookie;
use xengage_core::ports::{BrowserLauncher, BrowserPage, PortError, PortResult};
use xengage_core::AutomationTimeouts;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn unexpected(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

/// Quotes `value` as a JavaScript string literal.
fn js_string(value: &str) -> PortResult<String> {
    serde_json::to_string(value).map_err(unexpected)
}

/// Runs one DevTools round trip under `limit`.
async fn bounded<T>(limit: Duration, what: &str, call: impl Future<Output = PortResult<T>>) -> PortResult<T> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| PortError::Timeout(what.to_string()))?
}

/// A bare `null` evaluates to no value at all, so element reads are wrapped.
#[derive(serde::Deserialize)]
struct Lookup {
    value: Option<String>,
}

//=========================================================================================
// Launcher
//=========================================================================================

/// Launches headless (or headed, for debugging) Chromium instances.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    headless: bool,
    executable: Option<PathBuf>,
    timeouts: AutomationTimeouts,
}

impl ChromiumLauncher {
    pub fn new(headless: bool, executable: Option<PathBuf>, timeouts: AutomationTimeouts) -> Self {
        Self {
            headless,
            executable,
            timeouts,
        }
    }

    fn config(&self) -> PortResult<BrowserConfig> {
        let mut builder = BrowserConfig::builder().arg("--disable-blink-features=AutomationControlled");
        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        builder.build().map_err(unexpected)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn open(&self) -> PortResult<Box<dyn BrowserPage>> {
        let (browser, mut handler) = Browser::launch(self.config()?).await.map_err(unexpected)?;

        // The CDP handler must be polled for the browser to make progress.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        let opened = bounded(self.timeouts.element, "new page", async {
            browser.new_page("about:blank").await.map_err(unexpected)
        })
        .await;
        let page = match opened {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(e);
            }
        };
        info!("Launched browser context (headless: {})", self.headless);

        Ok(Box::new(ChromiumPage {
            page,
            browser: Mutex::new(Some(browser)),
            handler: handler_task,
            timeouts: self.timeouts.clone(),
        }))
    }
}

//=========================================================================================
// Page
//=========================================================================================

pub struct ChromiumPage {
    page: Page,
    browser: Mutex<Option<Browser>>,
    handler: JoinHandle<()>,
    timeouts: AutomationTimeouts,
}

impl ChromiumPage {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: &str) -> PortResult<T> {
        bounded(self.timeouts.element, "script evaluation", async {
            self.page
                .evaluate(script)
                .await
                .map_err(unexpected)?
                .into_value::<T>()
                .map_err(unexpected)
        })
        .await
    }

    async fn element(&self, selector: &str) -> PortResult<Element> {
        bounded(self.timeouts.element, selector, async {
            self.page
                .find_element(selector)
                .await
                .map_err(|_| PortError::NotFound(selector.to_string()))
        })
        .await
    }

    async fn present(&self, selector: &str) -> PortResult<bool> {
        let script = format!("document.querySelector({}) !== null", js_string(selector)?);
        self.eval::<bool>(&script).await
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&self, url: &str) -> PortResult<()> {
        debug!("Navigating to {}", url);
        bounded(self.timeouts.content, url, async {
            self.page.goto(url).await.map_err(unexpected)
        })
        .await?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> PortResult<bool> {
        // A zero wait is a single presence check; the round trip itself is
        // bounded by the element wait.
        if timeout.is_zero() {
            return self.present(selector).await;
        }
        let poll = async {
            loop {
                if self.present(selector).await? {
                    return Ok::<_, PortError>(());
                }
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        };
        match tokio::time::timeout(timeout, poll).await {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    async fn fill(&self, selector: &str, text: &str) -> PortResult<()> {
        let element = self.element(selector).await?;
        bounded(self.timeouts.element, selector, async {
            element.click().await.map_err(unexpected)?;
            element.type_str(text).await.map_err(unexpected)?;
            Ok(())
        })
        .await
    }

    async fn click(&self, selector: &str) -> PortResult<()> {
        let element = self.element(selector).await?;
        bounded(self.timeouts.element, selector, async {
            element.click().await.map_err(unexpected)?;
            Ok(())
        })
        .await
    }

    async fn upload(&self, selector: &str, path: &str) -> PortResult<()> {
        let element = self.element(selector).await?;
        let params = SetFileInputFilesParams::builder()
            .files(vec![path.to_string()])
            .backend_node_id(element.backend_node_id)
            .build()
            .map_err(unexpected)?;
        bounded(self.timeouts.upload, path, async {
            self.page.execute(params).await.map_err(unexpected)?;
            Ok(())
        })
        .await
    }

    async fn text_of(&self, selector: &str) -> PortResult<Option<String>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return {{ value: el ? el.innerText : null }}; }})()",
            js_string(selector)?
        );
        self.eval::<Lookup>(&script).await.map(|found| found.value)
    }

    async fn attribute_of(&self, selector: &str, attribute: &str) -> PortResult<Option<String>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return {{ value: el ? el.getAttribute({}) : null }}; }})()",
            js_string(selector)?,
            js_string(attribute)?
        );
        self.eval::<Lookup>(&script).await.map(|found| found.value)
    }

    async fn evaluate_json(&self, script: &str) -> PortResult<serde_json::Value> {
        self.eval::<serde_json::Value>(script).await
    }

    async fn cookies(&self) -> PortResult<Vec<SessionCookie>> {
        let cookies = bounded(self.timeouts.element, "cookies", async {
            self.page.get_cookies().await.map_err(unexpected)
        })
        .await?;
        Ok(cookies
            .into_iter()
            .map(|c| SessionCookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                // Session cookies report a negative expiry.
                expires: (c.expires > 0.0).then_some(c.expires),
                http_only: c.http_only,
                secure: c.secure,
                same_site: c.same_site.map(|s| format!("{:?}", s)),
            })
            .collect())
    }

    async fn set_cookies(&self, cookies: &[SessionCookie]) -> PortResult<()> {
        let mut params = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            let mut builder = CookieParam::builder()
                .name(cookie.name.clone())
                .value(cookie.value.clone())
                .domain(cookie.domain.clone())
                .path(cookie.path.clone())
                .secure(cookie.secure)
                .http_only(cookie.http_only);
            if let Some(expires) = cookie.expires {
                builder = builder.expires(TimeSinceEpoch::new(expires));
            }
            if let Some(same_site) = cookie.same_site.as_deref().and_then(same_site_from_str) {
                builder = builder.same_site(same_site);
            }
            params.push(builder.build().map_err(unexpected)?);
        }
        bounded(self.timeouts.element, "cookies", async {
            self.page.set_cookies(params).await.map_err(unexpected)
        })
        .await?;
        Ok(())
    }

    async fn local_storage(&self) -> PortResult<BTreeMap<String, String>> {
        self.eval::<BTreeMap<String, String>>("JSON.parse(JSON.stringify(Object.assign({}, window.localStorage)))")
            .await
    }

    async fn set_local_storage(&self, entries: &BTreeMap<String, String>) -> PortResult<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut script = String::from("(() => {");
        for (key, value) in entries {
            script.push_str(&format!(
                " window.localStorage.setItem({}, {});",
                js_string(key)?,
                js_string(value)?
            ));
        }
        script.push_str(" return true; })()");
        self.eval::<bool>(&script).await.map(|_| ())
    }

    async fn close(&self) -> PortResult<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        let shutdown = async {
            if let Err(e) = browser.close().await {
                warn!("Browser did not acknowledge close: {}", e);
            }
            browser.wait().await.map_err(unexpected)
        };
        let result = tokio::time::timeout(self.timeouts.element, shutdown).await;
        if result.is_err() {
            warn!("Browser did not exit in time; killing it");
            if let Some(Err(e)) = browser.kill().await {
                warn!("Failed to kill browser: {}", e);
            }
        }
        self.handler.abort();
        if let Ok(Err(e)) = result {
            return Err(e);
        }
        debug!("Browser context released");
        Ok(())
    }
}

impl Drop for ChromiumPage {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

fn same_site_from_str(value: &str) -> Option<CookieSameSite> {
    match value.to_ascii_lowercase().as_str() {
        "strict" => Some(CookieSameSite::Strict),
        "lax" => Some(CookieSameSite::Lax),
        "none" => Some(CookieSameSite::None),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn js_strings_are_escaped() {
        assert_eq!(js_string(r#"a"b"#).unwrap(), r#""a\"b""#);
        assert_eq!(js_string("[data-testid='x']").unwrap(), r#""[data-testid='x']""#);
    }

    #[test]
    fn same_site_accepts_stored_debug_names() {
        assert_eq!(same_site_from_str("Lax"), Some(CookieSameSite::Lax));
        assert_eq!(same_site_from_str("None"), Some(CookieSameSite::None));
        assert_eq!(same_site_from_str("unknown"), None);
    }

    #[tokio::test]
    async fn bounded_call_times_out_as_a_port_timeout() {
        let stalled = bounded(Duration::from_millis(10), "goto", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(stalled, Err(PortError::Timeout(ref what)) if what == "goto"));

        let quick = bounded(Duration::from_secs(1), "goto", async { Ok(7) }).await;
        assert_eq!(quick.unwrap(), 7);
    }

    #[test]
    fn headed_launcher_keeps_its_executable() {
        let launcher = ChromiumLauncher::new(
            false,
            Some(PathBuf::from("/usr/bin/chromium")),
            AutomationTimeouts::default(),
        );
        assert!(!launcher.headless);
        assert_eq!(launcher.executable.as_deref(), Some(std::path::Path::new("/usr/bin/chromium")));
    }
}
