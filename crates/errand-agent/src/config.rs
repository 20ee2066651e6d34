//! Timing and limits for the agent loop.
//!
//! Every field has a default, so a YAML `agent:` section may set any subset.

use serde::{Deserialize, Serialize};

/// Knobs for observe/think/act.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Hard cap on loop iterations per goal
    pub max_steps: usize,

    /// How long to wait for network quiet before observing
    pub idle_timeout_ms: u64,

    /// A snapshot with this many elements or fewer is retried
    pub min_elements: usize,

    /// Snapshot attempts per observation
    pub snapshot_attempts: u32,

    /// Pause between snapshot attempts
    pub snapshot_retry_ms: u64,

    /// Elements listed in the decision prompt
    pub max_prompt_elements: usize,

    /// Pause after showing the model's reasoning
    pub reflect_ms: u64,

    /// Pause after highlighting the target element
    pub highlight_ms: u64,

    /// How long a click waits for its target to become visible
    pub click_timeout_ms: u64,

    /// How long navigation waits for the DOM to be ready
    pub ready_timeout_ms: u64,

    /// Delay between typed characters
    pub keystroke_delay_ms: u64,

    /// Pause after every action
    pub settle_ms: u64,

    pub blockage: BlockageConfig,

    pub autocomplete: AutocompleteConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            idle_timeout_ms: 8_000,
            min_elements: 5,
            snapshot_attempts: 3,
            snapshot_retry_ms: 1_500,
            max_prompt_elements: 300,
            reflect_ms: 1_000,
            highlight_ms: 800,
            click_timeout_ms: 5_000,
            ready_timeout_ms: 10_000,
            keystroke_delay_ms: 150,
            settle_ms: 1_000,
            blockage: BlockageConfig::default(),
            autocomplete: AutocompleteConfig::default(),
        }
    }
}

/// Heuristics for "a human has to solve something on this page".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockageConfig {
    /// Phrases that always mean a challenge page, matched ignoring case
    pub phrases: Vec<String>,
    /// Keyword that only counts on a short page
    pub keyword: String,
    /// Pages with fewer characters than this are "short"
    pub short_page_chars: usize,
    /// How long to hand control to the human
    pub wait_ms: u64,
}

impl Default for BlockageConfig {
    fn default() -> Self {
        Self {
            phrases: vec![
                "verify you are human".into(),
                "security check".into(),
                "challenge-platform".into(),
            ],
            keyword: "captcha".into(),
            short_page_chars: 2_000,
            wait_ms: 15_000,
        }
    }
}

/// Follow-up keystrokes after typing into a field that opens suggestions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutocompleteConfig {
    /// Words in the model's reason that mark the field as suggestion-driven
    pub keywords: Vec<String>,
    /// Wait for the suggestion list to render
    pub render_wait_ms: u64,
    /// Gap between the two keystrokes
    pub key_gap_ms: u64,
    pub next_key: String,
    pub confirm_key: String,
}

impl Default for AutocompleteConfig {
    fn default() -> Self {
        Self {
            keywords: ["search", "enter", "location", "station", "city"]
                .into_iter()
                .map(String::from)
                .collect(),
            render_wait_ms: 2_000,
            key_gap_ms: 500,
            next_key: "ArrowDown".into(),
            confirm_key: "Enter".into(),
        }
    }
}

impl AutocompleteConfig {
    /// Whether a fill with this reason should pick the first suggestion.
    pub fn triggered_by(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();
        self.keywords.iter().any(|k| reason.contains(k.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.max_steps, 20);
        assert_eq!(config.idle_timeout_ms, 8000);
        assert_eq!(config.max_prompt_elements, 300);
        assert_eq!(config.blockage.wait_ms, 15000);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let json = serde_json::json!({ "max_steps": 5, "blockage": { "wait_ms": 10 } });
        let config: AgentConfig = serde_json::from_value(json).unwrap();
        assert_eq!(config.max_steps, 5);
        assert_eq!(config.blockage.wait_ms, 10);
        assert_eq!(config.blockage.keyword, "captcha");
        assert_eq!(config.keystroke_delay_ms, 150);
    }

    #[test]
    fn test_autocomplete_trigger() {
        let ac = AutocompleteConfig::default();
        assert!(ac.triggered_by("Type the departure Station"));
        assert!(ac.triggered_by("search box"));
        assert!(!ac.triggered_by("fill in the email address"));
    }
}
