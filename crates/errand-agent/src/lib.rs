//! # errand-agent
//!
//! Observe/think/act loop that drives one browser page toward a
//! natural-language goal.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use errand_agent::{AgentConfig, AgentLoop, DecisionEngine, EokaDriver, LlmConfig, MemoryLog, PageDriver};
//!
//! # #[tokio::main]
//! # async fn main() -> errand_agent::Result<()> {
//! let llm = LlmConfig::default().with_env();
//! let engine = DecisionEngine::from_config(&llm)?;
//! let config = AgentConfig::default();
//! let log = MemoryLog::default();
//!
//! let driver = EokaDriver::launch(eoka::StealthConfig::default()).await?;
//! driver.goto_ready("https://duckduckgo.com", config.ready_timeout_ms).await?;
//!
//! // Observe → ask the model → act, until `done` or the step cap
//! let report = AgentLoop::new(&driver, &engine, &config, &log)
//!     .run("search for the weather in Lisbon")
//!     .await;
//! println!("{:?} after {} iterations", report.outcome, report.iterations);
//! # Ok(())
//! # }
//! ```

pub mod act;
pub mod agent_loop;
pub mod assets;
pub mod blockage;
pub mod bridge;
pub mod config;
pub mod decision;
pub mod driver;
pub mod llm;
pub mod log;
pub mod observe;
pub mod overlay;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use act::ActionExecutor;
pub use agent_loop::{AgentLoop, LoopOutcome, LoopReport, Phase};
pub use bridge::GoalBridge;
pub use config::{AgentConfig, AutocompleteConfig, BlockageConfig};
pub use decision::{Decision, DecisionAction, DecisionEngine, DecodeFailure, Decoded};
pub use driver::{EokaDriver, EokaLauncher, Launcher, PageDriver};
pub use llm::{ChatBackend, ChatMessage, Gateway, LlmConfig, OpenRouterBackend};
pub use log::{LogEntry, LogEvent, LogSink, MemoryLog, StepRecord};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type for errand-agent operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the page, model and action layers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("browser error: {0}")]
    Browser(#[from] eoka::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("backend {backend} failed: {message}")]
    Backend { backend: String, message: String },

    #[error("all {tried} backends failed")]
    Exhausted { tried: usize },

    #[error("no backend configured (set OPENROUTER_API_KEY)")]
    NoBackend,

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Whether the error means the page is gone and retrying the iteration
    /// cannot help (websocket closed, browser process died).
    pub fn is_fatal(&self) -> bool {
        let Error::Browser(inner) = self else {
            return false;
        };
        let msg = inner.to_string().to_lowercase();
        msg.contains("websocket")
            || msg.contains("transport")
            || msg.contains("connection")
            || msg.contains("broken pipe")
            || msg.contains("reset by peer")
    }
}

/// A visible interactable element, addressed by its page-local marker id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    /// Value of the element's `data-agent-id` marker (stable for the page load)
    pub id: u32,
    /// Lower-case HTML tag name
    pub tag: String,
    /// Text, aria-label or field name (≤50 chars) plus an optional placeholder hint
    pub description: String,
}

impl ElementDescriptor {
    pub fn new(id: u32, tag: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            tag: tag.into(),
            description: description.into(),
        }
    }
}

impl fmt::Display for ElementDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: <{}> {}", self.id, self.tag, self.description)
    }
}
