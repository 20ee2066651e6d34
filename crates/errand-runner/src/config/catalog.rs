//! Deterministic goal heuristics and the submit guardrail patterns.
//!
//! A heuristic matches on lowercase keywords and instantiates a plan
//! template. Templates may use `${goal}`, `${topic}` (when the heuristic has a
//! [`TopicRule`]) and `${item}` (when it has [`ItemChoice`]s).

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::params::Params;
use super::plan::{Plan, Step, StepAction};
use crate::{Error, Result};

pub const DEFAULT_START_URL: &str = "https://www.google.com";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    /// Tried in order; the first match wins
    pub heuristics: Vec<Heuristic>,

    /// A click step whose target contains one of these is a submit
    pub submit_patterns: Vec<String>,

    /// Where delegated goals start when nothing better is known
    pub default_start_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Heuristic {
    pub name: String,

    /// Every keyword must appear in the goal
    #[serde(default)]
    pub all_of: Vec<String>,

    /// At least one keyword must appear, if any are listed
    #[serde(default)]
    pub any_of: Vec<String>,

    /// First listed item found in the goal binds `${item}`
    #[serde(default)]
    pub items: Vec<ItemChoice>,

    #[serde(default)]
    pub topic: Option<TopicRule>,

    pub plan: Plan,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemChoice {
    pub keyword: String,
    pub value: String,
}

/// How to cut the subject out of a goal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicRule {
    /// Phrases removed wherever they appear as whole words
    pub strip: Vec<String>,

    /// Words dropped from the front of what remains
    #[serde(default = "default_fillers")]
    pub fillers: Vec<String>,

    #[serde(default = "default_punctuation")]
    pub punctuation: String,
}

fn default_fillers() -> Vec<String> {
    vec!["for".into(), "about".into()]
}

fn default_punctuation() -> String {
    "?.,".into()
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            heuristics: vec![wikipedia_heuristic(), demo_heuristic()],
            submit_patterns: vec!["place-order".into()],
            default_start_url: DEFAULT_START_URL.into(),
        }
    }
}

fn wikipedia_heuristic() -> Heuristic {
    let strip = ["search for", "search", "find out about", "on wikipedia", "wikipedia", "wiki"];
    Heuristic {
        name: "wikipedia".into(),
        all_of: vec!["search".into()],
        any_of: vec!["wiki".into()],
        items: Vec::new(),
        topic: Some(TopicRule {
            strip: strip.iter().map(|s| s.to_string()).collect(),
            fillers: default_fillers(),
            punctuation: default_punctuation(),
        }),
        plan: vec![
            Step::goto("https://www.wikipedia.org"),
            Step::fill(r#"input[name="search"]"#, "${topic}"),
            Step::click("button.pure-button-primary-progressive"),
            Step::note("Searching Wikipedia for: ${topic}"),
        ],
    }
}

fn demo_heuristic() -> Heuristic {
    let items = ["pizza", "burger", "ramen"]
        .iter()
        .map(|item| ItemChoice {
            keyword: item.to_string(),
            value: format!(r#"[data-item="{}-btn"]"#, item),
        })
        .collect();
    Heuristic {
        name: "demo".into(),
        all_of: Vec::new(),
        any_of: Vec::new(),
        items,
        topic: None,
        plan: vec![
            Step::goto("http://localhost:3000/demo/index.html"),
            Step::click("${item}"),
            Step::fill_profile("#checkout-form"),
            Step::click("#place-order-btn"),
        ],
    }
}

impl TopicRule {
    pub fn extract(&self, goal: &str) -> Result<String> {
        let mut phrases: Vec<&str> = self.strip.iter().map(String::as_str).collect();
        phrases.sort_by_key(|p| std::cmp::Reverse(p.len()));
        let alternation = phrases
            .iter()
            .map(|p| regex::escape(p))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(r"(?i)\b(?:{})\b", alternation))
            .map_err(|e| Error::Config(format!("invalid topic phrases: {}", e)))?;

        let stripped = pattern.replace_all(goal, " ");
        let cleaned: String = stripped
            .chars()
            .filter(|c| !self.punctuation.contains(*c))
            .collect();

        let mut words: Vec<&str> = cleaned.split_whitespace().collect();
        while let Some(first) = words.first() {
            if self.fillers.iter().any(|f| f.eq_ignore_ascii_case(first)) {
                words.remove(0);
            } else {
                break;
            }
        }
        Ok(words.join(" "))
    }
}

impl Heuristic {
    /// The plan for `goal`, or `None` when this heuristic does not apply.
    pub fn instantiate(&self, goal: &str) -> Result<Option<Plan>> {
        let lower = goal.to_lowercase();
        if !self.all_of.iter().all(|k| lower.contains(&k.to_lowercase())) {
            return Ok(None);
        }
        if !self.any_of.is_empty() && !self.any_of.iter().any(|k| lower.contains(&k.to_lowercase())) {
            return Ok(None);
        }

        let mut params = Params::new().set("goal", goal);
        if !self.items.is_empty() {
            let Some(item) = self
                .items
                .iter()
                .find(|i| lower.contains(&i.keyword.to_lowercase()))
            else {
                return Ok(None);
            };
            params = params.set("item", &item.value);
        }
        if let Some(rule) = &self.topic {
            let topic = rule.extract(goal)?;
            if topic.is_empty() {
                debug!("heuristic {} matched but left no topic", self.name);
                return Ok(None);
            }
            params = params.set("topic", topic);
        }

        self.render(&params).map(Some)
    }

    fn render(&self, params: &Params) -> Result<Plan> {
        let mut template = serde_yaml::to_value(&self.plan)?;
        params.substitute_value(&mut template)?;
        Ok(serde_yaml::from_value(template)?)
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("heuristic name cannot be empty".into()));
        }
        if self.all_of.is_empty() && self.any_of.is_empty() && self.items.is_empty() {
            return Err(Error::Config(format!(
                "heuristic {} needs at least one keyword",
                self.name
            )));
        }
        if self.plan.is_empty() {
            return Err(Error::Config(format!("heuristic {} has an empty plan", self.name)));
        }

        // Render once with stand-in bindings so unknown placeholders fail at load
        let mut params = Params::new().set("goal", "goal");
        if !self.items.is_empty() {
            params = params.set("item", "item");
        }
        if self.topic.is_some() {
            params = params.set("topic", "topic");
        }
        self.render(&params)
            .map_err(|e| Error::Config(format!("heuristic {}: {}", self.name, e)))?;
        Ok(())
    }
}

impl Catalog {
    /// Name and plan of the first matching heuristic.
    pub fn match_goal(&self, goal: &str) -> Result<Option<(&str, Plan)>> {
        for heuristic in &self.heuristics {
            if let Some(plan) = heuristic.instantiate(goal)? {
                return Ok(Some((heuristic.name.as_str(), plan)));
            }
        }
        Ok(None)
    }

    /// Whether `step` trips the simulate-mode guardrail.
    pub fn is_submit(&self, step: &Step) -> bool {
        step.action == StepAction::Click
            && self
                .submit_patterns
                .iter()
                .any(|p| step.target.contains(p.as_str()))
    }

    /// The plan used when nothing else produced one.
    pub fn delegate(&self, goal: &str) -> Plan {
        vec![Step::active_loop(&self.default_start_url, goal)]
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_start_url.trim().is_empty() {
            return Err(Error::Config("catalog.default_start_url cannot be empty".into()));
        }
        if self.submit_patterns.iter().any(|p| p.is_empty()) {
            return Err(Error::Config("catalog.submit_patterns cannot contain empty patterns".into()));
        }
        for heuristic in &self.heuristics {
            heuristic.validate()?;
        }
        Ok(())
    }
}
