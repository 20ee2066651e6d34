//! DOM snapshot: lists the visible interactable elements of the page.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::assets::SNAPSHOT;
use crate::config::AgentConfig;
use crate::driver::PageDriver;
use crate::{ElementDescriptor, Result};

#[derive(Deserialize)]
struct RawElement {
    id: u32,
    tag: String,
    desc: String,
}

impl From<RawElement> for ElementDescriptor {
    fn from(raw: RawElement) -> Self {
        ElementDescriptor::new(raw.id, raw.tag, raw.desc)
    }
}

/// Take one snapshot. Marks new elements with `data-agent-id`; ids already
/// present on the page are kept.
pub async fn snapshot<D: PageDriver + ?Sized>(driver: &D) -> Result<Vec<ElementDescriptor>> {
    let json = driver.evaluate_json(SNAPSHOT.source).await?;
    let raw: Vec<RawElement> = serde_json::from_str(&json)?;
    Ok(raw.into_iter().map(Into::into).collect())
}

/// Snapshot until the page looks populated or the attempts run out.
///
/// Returns whatever the last attempt produced, which may be empty.
pub async fn snapshot_settled<D: PageDriver + ?Sized>(
    driver: &D,
    config: &AgentConfig,
) -> Result<Vec<ElementDescriptor>> {
    let attempts = config.snapshot_attempts.max(1);
    let mut elements = Vec::new();
    for attempt in 1..=attempts {
        elements = snapshot(driver).await?;
        if elements.len() > config.min_elements {
            break;
        }
        debug!(
            "snapshot attempt {}/{} found {} elements",
            attempt,
            attempts,
            elements.len()
        );
        if attempt < attempts {
            tokio::time::sleep(Duration::from_millis(config.snapshot_retry_ms)).await;
        }
    }
    Ok(elements)
}
