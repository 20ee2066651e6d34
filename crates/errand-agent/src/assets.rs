//! Page-side scripts, bundled at compile time and versioned.
//!
//! Each script opens with an `errand:<name>@<version>` marker comment so a
//! stale copy left in a long-lived page can be told apart from the current one.

/// A JavaScript asset evaluated inside the page.
#[derive(Debug, Clone, Copy)]
pub struct PageAsset {
    pub name: &'static str,
    pub version: u32,
    pub source: &'static str,
}

impl PageAsset {
    /// Marker embedded in the script's first line.
    pub fn tag(&self) -> String {
        format!("errand:{}@{}", self.name, self.version)
    }
}

/// Enumerates visible interactable elements and stamps `data-agent-id` markers.
/// Evaluates to a JSON string of `[{id, tag, desc}]`.
pub const SNAPSHOT: PageAsset = PageAsset {
    name: "snapshot",
    version: 1,
    source: include_str!("../assets/snapshot.js"),
};

/// Goal dock, status line and highlight helper exposed as `window.__errand`.
/// Evaluates to a JSON boolean: whether it installed anything.
pub const OVERLAY: PageAsset = PageAsset {
    name: "overlay",
    version: 1,
    source: include_str!("../assets/overlay.js"),
};
