//! # errand-runner
//!
//! Turns a goal into a plan and executes it in an isolated browser session.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use errand_runner::{Config, Mode, Planner, ProfileStore, Runner, SessionStore};
//!
//! # #[tokio::main]
//! # async fn main() -> errand_runner::Result<()> {
//! let config = Config::load("errand.yaml")?.with_env();
//! let planner = Planner::from_config(&config);
//! let plan = planner.plan("search wikipedia for octopus").await?;
//!
//! let sessions = Arc::new(SessionStore::open("data/sessions")?);
//! let profiles = Arc::new(ProfileStore::open("data/profile.json")?);
//! let runner = Runner::new(config.browser.launcher(), sessions, profiles, &config);
//! let result = runner.execute(&plan, Mode::Simulate).await?;
//! println!("session {} success: {}", result.session_id, result.success);
//! # Ok(())
//! # }
//! ```

mod config;
pub mod mcp;
mod planner;
mod registry;
mod runner;
mod store;

pub use config::{
    catalog::{Catalog, Heuristic, ItemChoice, TopicRule},
    params::Params,
    plan::{Mode, Plan, Step, StepAction, StepData},
    schema::{BrowserConfig, Config, Viewport},
};
pub use planner::{decode_plan, PlanSource, Planned, Planner};
pub use registry::SessionRegistry;
pub use runner::{RunResult, Runner};
pub use store::{
    profile::{Profile, ProfileStore},
    session::{Session, SessionLog, SessionStore},
};

/// Result type for errand-runner operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading config, planning or executing.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Agent(#[from] errand_agent::Error),

    #[error("action failed: {0}")]
    ActionFailed(String),

    #[error("agent loop aborted: {0}")]
    LoopAborted(String),

    #[error("session {0} is already running")]
    SessionBusy(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),
}
