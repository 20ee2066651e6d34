//! Applies a decision to the page.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::decision::{Decision, DecisionAction};
use crate::driver::PageDriver;
use crate::overlay;
use crate::{Error, Result};

/// Selector for an element stamped by the snapshot.
pub fn agent_selector(id: &str) -> String {
    let escaped = id.replace('\\', "\\\\").replace('"', "\\\"");
    format!("[data-agent-id=\"{}\"]", escaped)
}

pub struct ActionExecutor<'a, D: PageDriver + ?Sized> {
    driver: &'a D,
    config: &'a AgentConfig,
}

impl<'a, D: PageDriver + ?Sized> ActionExecutor<'a, D> {
    pub fn new(driver: &'a D, config: &'a AgentConfig) -> Self {
        Self { driver, config }
    }

    /// Perform one decision. `done` is a no-op.
    pub async fn apply(&self, decision: &Decision) -> Result<()> {
        match decision.action {
            DecisionAction::Click => {
                let selector = self.spotlight(&decision.target).await;
                self.driver
                    .click(&selector, self.config.click_timeout_ms)
                    .await?;
            }
            DecisionAction::Fill => {
                let value = decision.value.as_deref().ok_or_else(|| {
                    Error::ActionFailed(format!("fill on {} without a value", decision.target))
                })?;
                let selector = self.spotlight(&decision.target).await;
                self.driver
                    .click(&selector, self.config.click_timeout_ms)
                    .await?;
                self.driver
                    .type_keys(value, self.config.keystroke_delay_ms)
                    .await?;

                let autocomplete = &self.config.autocomplete;
                if autocomplete.triggered_by(&decision.reason) {
                    debug!("picking the first suggestion for {}", decision.target);
                    pause(autocomplete.render_wait_ms).await;
                    self.driver.press_key(&autocomplete.next_key).await?;
                    pause(autocomplete.key_gap_ms).await;
                    self.driver.press_key(&autocomplete.confirm_key).await?;
                }
            }
            DecisionAction::Goto => {
                info!("navigating to {}", decision.target);
                self.driver
                    .goto_ready(&decision.target, self.config.ready_timeout_ms)
                    .await?;
                if let Err(e) = overlay::install(self.driver).await {
                    debug!("overlay reinstall failed: {}", e);
                }
            }
            DecisionAction::Done => {}
        }
        Ok(())
    }

    async fn spotlight(&self, id: &str) -> String {
        overlay::highlight(self.driver, id).await;
        pause(self.config.highlight_ms).await;
        agent_selector(id)
    }
}

async fn pause(ms: u64) {
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePage;

    fn decision(action: DecisionAction, target: &str, value: Option<&str>, reason: &str) -> Decision {
        Decision {
            action,
            target: target.into(),
            value: value.map(String::from),
            reason: reason.into(),
        }
    }

    #[test]
    fn test_agent_selector_quotes_id() {
        assert_eq!(agent_selector("12"), r#"[data-agent-id="12"]"#);
        assert_eq!(agent_selector(r#"a"b"#), r#"[data-agent-id="a\"b"]"#);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_targets_marker() {
        let page = FakePage::new();
        let config = AgentConfig::default();
        ActionExecutor::new(&page, &config)
            .apply(&decision(DecisionAction::Click, "4", None, "open"))
            .await
            .unwrap();
        assert!(page.ops().contains(&r#"click [data-agent-id="4"]"#.to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_types_value() {
        let page = FakePage::new();
        let config = AgentConfig::default();
        ActionExecutor::new(&page, &config)
            .apply(&decision(DecisionAction::Fill, "2", Some("ramen"), "the name field"))
            .await
            .unwrap();
        let ops = page.ops();
        assert!(ops.contains(&r#"click [data-agent-id="2"]"#.to_string()));
        assert!(ops.contains(&"type ramen".to_string()));
        assert!(!ops.iter().any(|op| op.starts_with("press")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_search_picks_suggestion() {
        let page = FakePage::new();
        let config = AgentConfig::default();
        ActionExecutor::new(&page, &config)
            .apply(&decision(DecisionAction::Fill, "2", Some("Lisbon"), "enter the destination city"))
            .await
            .unwrap();
        let presses: Vec<_> = page.ops().into_iter().filter(|op| op.starts_with("press")).collect();
        assert_eq!(presses, vec!["press ArrowDown", "press Enter"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_without_value_fails() {
        let page = FakePage::new();
        let config = AgentConfig::default();
        let err = ActionExecutor::new(&page, &config)
            .apply(&decision(DecisionAction::Fill, "2", None, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActionFailed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_element_fails() {
        let page = FakePage::new();
        page.fail_selector(&agent_selector("9"));
        let config = AgentConfig::default();
        let result = ActionExecutor::new(&page, &config)
            .apply(&decision(DecisionAction::Click, "9", None, "x"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_goto_reinstalls_overlay() {
        let page = FakePage::new();
        let config = AgentConfig::default();
        ActionExecutor::new(&page, &config)
            .apply(&decision(DecisionAction::Goto, "https://example.com", None, "x"))
            .await
            .unwrap();
        assert_eq!(page.current_url(), "https://example.com");
        assert!(overlay::is_installed(&page).await.unwrap());
    }
}
