//! The browser seam.
//!
//! [`PageDriver`] is everything the loop, the overlay and the plan executor
//! need from a page. [`EokaDriver`] backs it with a real Chrome tab; tests use
//! the scripted page from `testing`.

use std::time::Duration;

use async_trait::async_trait;
use eoka::{Browser, Page, StealthConfig};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::{Error, Result};

/// Poll interval while waiting for `document.readyState`.
const READY_POLL_MS: u64 = 100;

/// Quiet period that counts as "network idle".
const IDLE_WINDOW_MS: u64 = 500;

/// Finds the first interactive element whose text contains the needle and
/// returns a selector for it, or null.
const FIND_BY_TEXT_JS: &str = r#"(() => {
    const needle = __NEEDLE__.toLowerCase();
    const candidates = document.querySelectorAll('a, button, input[type="submit"], input[type="button"], [role="button"], [role="link"], [role="option"], li');
    for (const el of candidates) {
        const text = (el.innerText || el.value || el.getAttribute('aria-label') || '').trim().toLowerCase();
        if (!text.includes(needle)) continue;
        const rect = el.getBoundingClientRect();
        if (rect.width < 2 || rect.height < 2) continue;
        if (el.id) return JSON.stringify('#' + CSS.escape(el.id));
        const path = [];
        let node = el;
        while (node && node !== document.body) {
            if (node.id) {
                path.unshift('#' + CSS.escape(node.id));
                break;
            }
            let part = node.tagName.toLowerCase();
            const siblings = Array.from(node.parentNode?.children || []);
            if (siblings.length > 1) part += ':nth-child(' + (siblings.indexOf(node) + 1) + ')';
            path.unshift(part);
            node = node.parentNode;
        }
        return JSON.stringify(path.join(' > '));
    }
    return JSON.stringify(null);
})()"#;

/// Operations on one browser page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Wait until `document.readyState` is past `loading`.
    async fn wait_for_ready(&self, timeout_ms: u64) -> Result<()>;

    /// Wait until the network has been quiet for a moment.
    async fn wait_for_idle(&self, timeout_ms: u64) -> Result<()>;

    async fn url(&self) -> Result<String>;

    /// Visible text of the document body.
    async fn text(&self) -> Result<String>;

    /// Evaluate an expression that yields a JSON-encoded string.
    async fn evaluate_json(&self, js: &str) -> Result<String>;

    /// Run JavaScript for its side effects.
    async fn execute(&self, js: &str) -> Result<()>;

    /// Click the first match for `selector`, waiting up to `timeout_ms` for it to show.
    async fn click(&self, selector: &str, timeout_ms: u64) -> Result<()>;

    /// Click the first interactive element whose visible text contains `text`.
    async fn click_text(&self, text: &str) -> Result<()>;

    /// Replace a form field's value.
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Type into the focused element one character at a time.
    async fn type_keys(&self, text: &str, delay_ms: u64) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    /// Release the page and its browser.
    async fn close(&self) -> Result<()>;

    /// Navigate and wait for the DOM.
    async fn goto_ready(&self, url: &str, timeout_ms: u64) -> Result<()> {
        self.goto(url).await?;
        self.wait_for_ready(timeout_ms).await
    }
}

/// Produces fresh, isolated pages.
#[async_trait]
pub trait Launcher: Send + Sync {
    type Driver: PageDriver + 'static;

    async fn launch(&self) -> Result<Self::Driver>;
}

// =============================================================================
// eoka-backed driver
// =============================================================================

/// A Chrome tab driven over CDP. Owns its browser, so closing the driver
/// tears the whole context down.
pub struct EokaDriver {
    browser: Mutex<Option<Browser>>,
    page: Page,
}

impl EokaDriver {
    /// Launch a browser and open a blank tab.
    pub async fn launch(stealth: StealthConfig) -> Result<Self> {
        let browser = Browser::launch_with_config(stealth).await?;
        let page = browser.new_page("about:blank").await?;
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
        })
    }

    /// The underlying page, for callers that need more than the trait offers.
    pub fn page(&self) -> &Page {
        &self.page
    }
}

#[async_trait]
impl PageDriver for EokaDriver {
    async fn goto(&self, url: &str) -> Result<()> {
        debug!("goto {}", url);
        self.page.goto(url).await?;
        Ok(())
    }

    async fn wait_for_ready(&self, timeout_ms: u64) -> Result<()> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            let state: String = self.page.evaluate("document.readyState").await?;
            if state != "loading" {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(format!(
                    "document still loading after {}ms",
                    timeout_ms
                )));
            }
            self.page.wait(READY_POLL_MS).await;
        }
    }

    async fn wait_for_idle(&self, timeout_ms: u64) -> Result<()> {
        self.page
            .wait_for_network_idle(IDLE_WINDOW_MS, timeout_ms)
            .await?;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.page.url().await?)
    }

    async fn text(&self) -> Result<String> {
        Ok(self.page.text().await?)
    }

    async fn evaluate_json(&self, js: &str) -> Result<String> {
        Ok(self.page.evaluate(js).await?)
    }

    async fn execute(&self, js: &str) -> Result<()> {
        self.page.execute(js).await?;
        Ok(())
    }

    async fn click(&self, selector: &str, timeout_ms: u64) -> Result<()> {
        self.page.wait_for_visible(selector, timeout_ms).await?;
        self.page.click(selector).await?;
        Ok(())
    }

    async fn click_text(&self, text: &str) -> Result<()> {
        let js = FIND_BY_TEXT_JS.replace("__NEEDLE__", &serde_json::to_string(text)?);
        let found: Option<String> = serde_json::from_str(&self.evaluate_json(&js).await?)?;
        let Some(selector) = found else {
            return Err(Error::ActionFailed(format!(
                "no element with text '{}'",
                text
            )));
        };
        debug!("text '{}' resolved to {}", text, selector);
        self.page.click(&selector).await?;
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.page.fill(selector, value).await?;
        Ok(())
    }

    async fn type_keys(&self, text: &str, delay_ms: u64) -> Result<()> {
        let mut buf = [0u8; 4];
        for ch in text.chars() {
            self.page.type_text(ch.encode_utf8(&mut buf)).await?;
            if delay_ms > 0 {
                self.page.wait(delay_ms).await;
            }
        }
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.page.human().press_key(key).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        if let Some(browser) = self.browser.lock().await.take() {
            browser.close().await?;
        }
        Ok(())
    }
}

/// Launches one stealth Chrome per session.
#[derive(Debug, Clone)]
pub struct EokaLauncher {
    pub headless: bool,
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    pub viewport: (u32, u32),
}

impl Default for EokaLauncher {
    fn default() -> Self {
        Self {
            headless: false,
            proxy: None,
            user_agent: None,
            viewport: (1280, 720),
        }
    }
}

impl EokaLauncher {
    fn stealth(&self) -> StealthConfig {
        StealthConfig {
            headless: self.headless,
            proxy: self.proxy.clone(),
            user_agent: self.user_agent.clone(),
            viewport_width: self.viewport.0,
            viewport_height: self.viewport.1,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Launcher for EokaLauncher {
    type Driver = EokaDriver;

    async fn launch(&self) -> Result<EokaDriver> {
        debug!(headless = self.headless, "launching browser");
        EokaDriver::launch(self.stealth()).await
    }
}
