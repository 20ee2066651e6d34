//! Plan wire types.

use std::fmt;
use std::str::FromStr;

use errand_agent::StepRecord;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Ordered steps, serialized as a JSON array.
pub type Plan = Vec<Step>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    Goto,
    Click,
    Fill,
    Note,
    /// Hand the rest of the goal to the interactive agent loop
    ActiveLoop,
}

impl StepAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepAction::Goto => "goto",
            StepAction::Click => "click",
            StepAction::Fill => "fill",
            StepAction::Note => "note",
            StepAction::ActiveLoop => "active_loop",
        }
    }
}

/// One step of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct Step {
    pub action: StepAction,

    /// CSS selector, URL, visible text or note text, depending on the action
    #[serde(default)]
    pub target: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<StepData>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StepData {
    /// Literal text for `fill`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Fill from the stored profile instead of `value`
    #[serde(
        default,
        rename = "useProfile",
        alias = "use_profile",
        skip_serializing_if = "std::ops::Not::not"
    )]
    pub use_profile: bool,

    /// Goal for `active_loop`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

impl Step {
    fn new(action: StepAction, target: impl Into<String>, data: Option<StepData>) -> Self {
        Self {
            action,
            target: target.into(),
            data,
        }
    }

    pub fn goto(url: impl Into<String>) -> Self {
        Self::new(StepAction::Goto, url, None)
    }

    pub fn click(target: impl Into<String>) -> Self {
        Self::new(StepAction::Click, target, None)
    }

    pub fn fill(target: impl Into<String>, value: impl Into<String>) -> Self {
        let data = StepData {
            value: Some(value.into()),
            ..Default::default()
        };
        Self::new(StepAction::Fill, target, Some(data))
    }

    pub fn fill_profile(target: impl Into<String>) -> Self {
        let data = StepData {
            use_profile: true,
            ..Default::default()
        };
        Self::new(StepAction::Fill, target, Some(data))
    }

    pub fn note(text: impl Into<String>) -> Self {
        Self::new(StepAction::Note, text, None)
    }

    pub fn active_loop(start_url: impl Into<String>, goal: impl Into<String>) -> Self {
        let data = StepData {
            goal: Some(goal.into()),
            ..Default::default()
        };
        Self::new(StepAction::ActiveLoop, start_url, Some(data))
    }

    pub fn value(&self) -> Option<&str> {
        self.data.as_ref()?.value.as_deref()
    }

    pub fn goal(&self) -> Option<&str> {
        self.data.as_ref()?.goal.as_deref()
    }

    pub fn uses_profile(&self) -> bool {
        self.data.as_ref().is_some_and(|d| d.use_profile)
    }

    /// The step as it appears in session log entries.
    pub fn record(&self) -> StepRecord {
        let record = StepRecord::new(self.action.as_str(), &self.target);
        match self.data.as_ref().and_then(|d| serde_json::to_value(d).ok()) {
            Some(data) => record.with_data(data),
            None => record,
        }
    }
}

/// `simulate` stops before submit steps; `assist` runs everything.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Simulate,
    Assist,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Simulate => f.write_str("simulate"),
            Mode::Assist => f.write_str("assist"),
        }
    }
}

impl FromStr for Mode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "simulate" => Ok(Mode::Simulate),
            "assist" | "execute" => Ok(Mode::Assist),
            other => Err(Error::Config(format!(
                "unknown mode '{}', expected simulate or assist",
                other
            ))),
        }
    }
}
