//! Scripted fakes for the page and model seams.
//!
//! Enabled for this crate's tests and, through the `testing` feature, for
//! downstream crates.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::assets::{OVERLAY, SNAPSHOT};
use crate::driver::{Launcher, PageDriver};
use crate::llm::{ChatBackend, ChatMessage};
use crate::{ElementDescriptor, Error, Result};

// =============================================================================
// FakePage
// =============================================================================

#[derive(Debug, Default)]
struct PageState {
    url: String,
    snapshots: VecDeque<Vec<ElementDescriptor>>,
    elements: Vec<ElementDescriptor>,
    texts: VecDeque<String>,
    text: String,
    failing: HashSet<String>,
    failing_text: HashSet<String>,
    goals: Vec<String>,
    overlay: bool,
    disconnected: bool,
    disconnect_on_goto: bool,
    snapshot_count: usize,
    ops: Vec<String>,
}

/// In-memory page. Queued snapshots and texts are served first; after that
/// the steady-state values repeat.
#[derive(Debug, Default)]
pub struct FakePage {
    state: Mutex<PageState>,
}

impl FakePage {
    pub fn new() -> Self {
        let page = Self::default();
        page.lock().url = "about:blank".into();
        page
    }

    pub fn with_elements(self, elements: Vec<ElementDescriptor>) -> Self {
        self.lock().elements = elements;
        self
    }

    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.lock().text = text.into();
        self
    }

    pub fn with_url(self, url: impl Into<String>) -> Self {
        self.lock().url = url.into();
        self
    }

    /// Serve this snapshot before the steady-state one.
    pub fn push_snapshot(&self, elements: Vec<ElementDescriptor>) {
        self.lock().snapshots.push_back(elements);
    }

    /// Serve this body text before the steady-state one.
    pub fn push_text(&self, text: impl Into<String>) {
        self.lock().texts.push_back(text.into());
    }

    /// Make every click on `selector` fail.
    pub fn fail_selector(&self, selector: &str) {
        self.lock().failing.insert(selector.to_string());
    }

    /// Make every visible-text click on `text` fail.
    pub fn fail_text(&self, text: &str) {
        self.lock().failing_text.insert(text.to_string());
    }

    /// Queue a goal as if typed into the dock.
    pub fn queue_goal(&self, goal: impl Into<String>) {
        self.lock().goals.push(goal.into());
    }

    /// From now on every call fails the way a dropped CDP socket does.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    /// The next navigation drops the connection instead of loading.
    pub fn disconnect_on_goto(&self) {
        self.lock().disconnect_on_goto = true;
    }

    pub fn ops(&self) -> Vec<String> {
        self.lock().ops.clone()
    }

    pub fn snapshot_count(&self) -> usize {
        self.lock().snapshot_count
    }

    pub fn current_url(&self) -> String {
        self.lock().url.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn live(&self) -> Result<MutexGuard<'_, PageState>> {
        let state = self.lock();
        if state.disconnected {
            return Err(Error::Browser(eoka::Error::CdpSimple(
                "WebSocket connection closed".into(),
            )));
        }
        Ok(state)
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&self, url: &str) -> Result<()> {
        let mut state = self.live()?;
        if state.disconnect_on_goto {
            state.disconnected = true;
            drop(state);
            return self.live().map(|_| ());
        }
        state.ops.push(format!("goto {}", url));
        state.url = url.to_string();
        state.overlay = false;
        Ok(())
    }

    async fn wait_for_ready(&self, _timeout_ms: u64) -> Result<()> {
        self.live()?;
        Ok(())
    }

    async fn wait_for_idle(&self, _timeout_ms: u64) -> Result<()> {
        self.live()?;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        Ok(self.live()?.url.clone())
    }

    async fn text(&self) -> Result<String> {
        let mut state = self.live()?;
        Ok(match state.texts.pop_front() {
            Some(text) => text,
            None => state.text.clone(),
        })
    }

    async fn evaluate_json(&self, js: &str) -> Result<String> {
        let mut state = self.live()?;
        if js.contains(&SNAPSHOT.tag()) {
            state.snapshot_count += 1;
            let elements = match state.snapshots.pop_front() {
                Some(elements) => elements,
                None => state.elements.clone(),
            };
            let raw: Vec<_> = elements
                .iter()
                .map(|e| serde_json::json!({ "id": e.id, "tag": e.tag, "desc": e.description }))
                .collect();
            return Ok(serde_json::to_string(&raw)?);
        }
        if js.contains(&OVERLAY.tag()) {
            let installed = !state.overlay;
            state.overlay = true;
            return Ok(installed.to_string());
        }
        if js.contains("__errand.version") {
            return Ok(state.overlay.to_string());
        }
        if js.contains("drain()") {
            let goals: Vec<String> = if state.overlay {
                state.goals.drain(..).collect()
            } else {
                Vec::new()
            };
            return Ok(serde_json::to_string(&goals)?);
        }
        Ok("null".into())
    }

    async fn execute(&self, js: &str) -> Result<()> {
        self.live()?.ops.push(format!("exec {}", js));
        Ok(())
    }

    async fn click(&self, selector: &str, _timeout_ms: u64) -> Result<()> {
        let mut state = self.live()?;
        if state.failing.contains(selector) {
            return Err(Error::Browser(eoka::Error::ElementNotFound(selector.into())));
        }
        state.ops.push(format!("click {}", selector));
        Ok(())
    }

    async fn click_text(&self, text: &str) -> Result<()> {
        let mut state = self.live()?;
        if state.failing_text.contains(text) {
            return Err(Error::ActionFailed(format!("no element with text '{}'", text)));
        }
        state.ops.push(format!("click_text {}", text));
        Ok(())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        let mut state = self.live()?;
        if state.failing.contains(selector) {
            return Err(Error::Browser(eoka::Error::ElementNotFound(selector.into())));
        }
        state.ops.push(format!("fill {}={}", selector, value));
        Ok(())
    }

    async fn type_keys(&self, text: &str, _delay_ms: u64) -> Result<()> {
        self.live()?.ops.push(format!("type {}", text));
        Ok(())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.live()?.ops.push(format!("press {}", key));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.lock().ops.push("close".into());
        Ok(())
    }
}

/// Hands out [`FakePage`]s built by a factory and counts launches.
pub struct FakeLauncher {
    factory: Box<dyn Fn() -> FakePage + Send + Sync>,
    launches: AtomicUsize,
    fail: bool,
}

impl FakeLauncher {
    pub fn new(factory: impl Fn() -> FakePage + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            launches: AtomicUsize::new(0),
            fail: false,
        }
    }

    /// A launcher whose every launch fails, like a missing Chrome binary.
    pub fn broken() -> Self {
        Self {
            fail: true,
            ..Self::new(FakePage::new)
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    type Driver = FakePage;

    async fn launch(&self) -> Result<FakePage> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Browser(eoka::Error::CdpSimple(
                "Chrome not found".into(),
            )));
        }
        Ok((self.factory)())
    }
}

// =============================================================================
// ScriptedBackend
// =============================================================================

/// One scripted backend response.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
    /// Never answers
    Hang,
}

/// Backend that plays back queued replies, then repeats a fallback reply.
pub struct ScriptedBackend {
    name: String,
    replies: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, replies: Vec<Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            replies: Mutex::new(replies.into()),
            fallback,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn always(name: &str, text: &str) -> Arc<Self> {
        Self::new(name, Vec::new(), Reply::Text(text.to_string()))
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::new(name, Vec::new(), Reply::Fail("HTTP 503".into()))
    }

    pub fn hanging(name: &str) -> Arc<Self> {
        Self::new(name, Vec::new(), Reply::Hang)
    }

    /// Reply with each text in turn, then keep repeating the last one.
    pub fn sequence(name: &str, texts: &[&str]) -> Arc<Self> {
        let replies = texts.iter().map(|t| Reply::Text(t.to_string())).collect();
        let last = texts.last().map(|t| t.to_string()).unwrap_or_default();
        Self::new(name, replies, Reply::Text(last))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Messages of every call so far.
    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        let reply = self
            .replies
            .lock()
            .ok()
            .and_then(|mut q| q.pop_front())
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(message) => Err(Error::Backend {
                backend: self.name.clone(),
                message,
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}
