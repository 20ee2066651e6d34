//! In-page dock: goal input, status line and element highlight.
//!
//! Status and highlight are cosmetic. Their failures are logged at debug
//! level and never reach the caller.

use tracing::debug;

use crate::assets::OVERLAY;
use crate::driver::PageDriver;
use crate::Result;

/// What the dock shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Scanning,
    EmptyPage,
    Blocked,
    Resuming,
    Thinking(String),
    Acting { action: String, target: String },
    Achieved,
    Exhausted,
    Retrying,
    Failed(String),
}

impl Status {
    pub fn icon(&self) -> &'static str {
        match self {
            Status::Scanning => "👀",
            Status::EmptyPage => "⚠️",
            Status::Blocked => "🛑",
            Status::Resuming => "▶️",
            Status::Thinking(_) => "🤔",
            Status::Acting { .. } => "⚡",
            Status::Achieved => "✅",
            Status::Exhausted => "⏹️",
            Status::Retrying => "🔁",
            Status::Failed(_) => "❌",
        }
    }

    pub fn text(&self) -> String {
        match self {
            Status::Scanning => "Scanning page...".into(),
            Status::EmptyPage => "No interactive elements found".into(),
            Status::Blocked => "CAPTCHA detected! Please solve it to continue.".into(),
            Status::Resuming => "Resuming...".into(),
            Status::Thinking(reason) => reason.clone(),
            Status::Acting { action, target } => format!("{} {}", action, target),
            Status::Achieved => "Goal Achieved!".into(),
            Status::Exhausted => "Step limit reached".into(),
            Status::Retrying => "Retrying step...".into(),
            Status::Failed(error) => format!("Failed: {}", error),
        }
    }
}

/// Install the dock unless the current version is already present.
/// Returns whether anything was installed.
pub async fn install<D: PageDriver + ?Sized>(driver: &D) -> Result<bool> {
    let installed: bool = serde_json::from_str(&driver.evaluate_json(OVERLAY.source).await?)?;
    if installed {
        debug!("installed {}", OVERLAY.tag());
    }
    Ok(installed)
}

/// Whether the current dock version is live on the page. Navigation wipes it.
pub async fn is_installed<D: PageDriver + ?Sized>(driver: &D) -> Result<bool> {
    let js = format!(
        "JSON.stringify(!!(window.__errand && window.__errand.version === {}))",
        OVERLAY.version
    );
    Ok(serde_json::from_str(&driver.evaluate_json(&js).await?)?)
}

pub async fn post_status<D: PageDriver + ?Sized>(driver: &D, status: &Status) {
    let js = match (
        serde_json::to_string(status.icon()),
        serde_json::to_string(&status.text()),
    ) {
        (Ok(icon), Ok(text)) => format!("window.__errand && window.__errand.status({icon}, {text})"),
        _ => return,
    };
    if let Err(e) = driver.execute(&js).await {
        debug!("status update skipped: {}", e);
    }
}

/// Return the dock to its input state.
pub async fn clear_status<D: PageDriver + ?Sized>(driver: &D) {
    if let Err(e) = driver.execute("window.__errand && window.__errand.idle()").await {
        debug!("status reset skipped: {}", e);
    }
}

/// Scroll to and outline the element with the given marker id.
pub async fn highlight<D: PageDriver + ?Sized>(driver: &D, id: &str) {
    let Ok(id) = serde_json::to_string(id) else {
        return;
    };
    let js = format!("window.__errand && window.__errand.highlight({id})");
    if let Err(e) = driver.execute(&js).await {
        debug!("highlight skipped: {}", e);
    }
}

/// Take every goal queued in the dock since the last call.
pub async fn drain_goals<D: PageDriver + ?Sized>(driver: &D) -> Result<Vec<String>> {
    let json = driver
        .evaluate_json("window.__errand ? window.__errand.drain() : JSON.stringify([])")
        .await?;
    Ok(serde_json::from_str(&json)?)
}
