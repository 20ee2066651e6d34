//! Goal → plan.
//!
//! Tries the heuristic catalog, then the planning models, and finally hands
//! the whole goal to the interactive loop.

use errand_agent::{ChatMessage, Gateway};
use tracing::{debug, info, warn};

use crate::config::catalog::Catalog;
use crate::config::plan::{Plan, Step};
use crate::{Config, Result};

const PLANNER_INSTRUCTION: &str = r#"You are a browser automation engineer. Turn the user's goal into a plan.

The plan is a JSON array of steps with the keys "action", "target" and optionally "data".
"action" is one of "goto", "click", "fill", "note".
"target" is a CSS selector for the real site (preferred) or a URL.
"data" is an object such as { "value": "text to type" }.

Rules:
1. Use CSS selectors that match the real website the goal refers to.
2. For a generic search use https://duckduckgo.com rather than Google unless Google is requested.
3. After filling a search box, add a "click" step that submits it.
4. Reply with the raw JSON array only. No markdown, no commentary."#;

/// Where a plan came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    Heuristic(String),
    Model(String),
    /// Nothing matched; the plan is a single `active_loop` step
    Delegated,
}

#[derive(Debug, Clone)]
pub struct Planned {
    pub plan: Plan,
    pub source: PlanSource,
}

pub struct Planner {
    catalog: Catalog,
    gateway: Option<Gateway>,
}

impl Planner {
    pub fn new(catalog: Catalog, gateway: Option<Gateway>) -> Self {
        Self {
            catalog,
            gateway: gateway.filter(|g| !g.is_empty()),
        }
    }

    /// Planner over the configured catalog and planning models. Without a
    /// credential only heuristics and delegation are available.
    pub fn from_config(config: &Config) -> Self {
        let gateway = Gateway::openrouter(
            &config.llm,
            &config.llm.planner_models,
            config.llm.planner_timeout_ms,
        );
        Self::new(config.catalog.clone(), gateway)
    }

    pub async fn plan(&self, goal: &str) -> Result<Plan> {
        Ok(self.plan_with_source(goal).await?.plan)
    }

    pub async fn plan_with_source(&self, goal: &str) -> Result<Planned> {
        let goal = goal.trim();

        if let Some((name, plan)) = self.catalog.match_goal(goal)? {
            info!("planned by heuristic {}", name);
            return Ok(Planned {
                plan,
                source: PlanSource::Heuristic(name.to_string()),
            });
        }

        if let Some(ref gateway) = self.gateway {
            let messages = [
                ChatMessage::system(PLANNER_INSTRUCTION),
                ChatMessage::user(goal),
            ];
            match gateway.complete_with(&messages, decode_plan).await {
                Ok(completion) => {
                    info!(
                        "planned by {} ({} steps)",
                        completion.backend,
                        completion.value.len()
                    );
                    return Ok(Planned {
                        plan: completion.value,
                        source: PlanSource::Model(completion.backend),
                    });
                }
                Err(e) => warn!("planning models unavailable, delegating: {}", e),
            }
        } else {
            debug!("no planning backend configured");
        }

        info!("delegating goal to the agent loop");
        Ok(Planned {
            plan: self.catalog.delegate(goal),
            source: PlanSource::Delegated,
        })
    }
}

/// Parse a model reply as a plan. Code fences are dropped; the rest must be
/// a non-empty JSON array of steps.
pub fn decode_plan(reply: &str) -> std::result::Result<Plan, String> {
    let stripped = reply.replace("```json", "").replace("```", "");
    let value: serde_json::Value =
        serde_json::from_str(stripped.trim()).map_err(|e| format!("not JSON: {}", e))?;
    let Some(items) = value.as_array() else {
        return Err("not a JSON array".into());
    };
    if items.is_empty() {
        return Err("empty plan".into());
    }
    serde_json::from_value::<Vec<Step>>(value).map_err(|e| format!("bad step: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plan::StepAction;
    use errand_agent::testing::ScriptedBackend;
    use errand_agent::ChatBackend;
    use std::sync::Arc;
    use std::time::Duration;

    const DDG_PLAN: &str = r#"```json
[{"action": "goto", "target": "https://duckduckgo.com"},
 {"action": "fill", "target": "input[name=q]", "data": {"value": "rust"}},
 {"action": "click", "target": "button[type=submit]"}]
```"#;

    fn planner(backends: Vec<Arc<ScriptedBackend>>) -> Planner {
        let gateway = Gateway::new(
            backends.into_iter().map(|b| b as Arc<dyn ChatBackend>).collect(),
            Duration::from_secs(10),
        );
        Planner::new(Catalog::default(), Some(gateway))
    }

    #[tokio::test]
    async fn test_heuristic_first() {
        let model = ScriptedBackend::always("m", DDG_PLAN);
        let planned = planner(vec![model.clone()])
            .plan_with_source("search wikipedia for octopus")
            .await
            .unwrap();
        assert_eq!(planned.source, PlanSource::Heuristic("wikipedia".into()));
        assert_eq!(planned.plan.len(), 4);
        assert_eq!(planned.plan[1].value(), Some("octopus"));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_model_plan_with_fences() {
        let model = ScriptedBackend::always("m", DDG_PLAN);
        let planned = planner(vec![model.clone()])
            .plan_with_source("search the web for rust")
            .await
            .unwrap();
        assert_eq!(planned.source, PlanSource::Model("m".into()));
        assert_eq!(planned.plan.len(), 3);
        assert_eq!(planned.plan[1].value(), Some("rust"));

        let prompt = &model.prompts()[0];
        assert_eq!(prompt[0].role, "system");
        assert_eq!(prompt[1].content, "search the web for rust");
    }

    #[tokio::test]
    async fn test_invalid_reply_tries_next_model() {
        let first = ScriptedBackend::always("first", r#"{"action": "goto"}"#);
        let second = ScriptedBackend::always("second", DDG_PLAN);
        let planned = planner(vec![first.clone(), second])
            .plan_with_source("look up the weather")
            .await
            .unwrap();
        assert_eq!(planned.source, PlanSource::Model("second".into()));
        assert_eq!(first.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_models_down_delegates() {
        let planned = planner(vec![
            ScriptedBackend::failing("a"),
            ScriptedBackend::hanging("b"),
        ])
        .plan_with_source("book a table for two")
        .await
        .unwrap();
        assert_eq!(planned.source, PlanSource::Delegated);
        assert_eq!(planned.plan.len(), 1);
        assert_eq!(planned.plan[0].action, StepAction::ActiveLoop);
        assert_eq!(planned.plan[0].target, "https://www.google.com");
        assert_eq!(planned.plan[0].goal(), Some("book a table for two"));
    }

    #[tokio::test]
    async fn test_no_credential_delegates() {
        let planner = Planner::new(Catalog::default(), None);
        let plan = planner.plan("book a table for two").await.unwrap();
        assert_eq!(plan, vec![Step::active_loop("https://www.google.com", "book a table for two")]);
    }

    #[test]
    fn test_decode_plan_rejections() {
        assert!(decode_plan("Sure! Here is your plan").is_err());
        assert!(decode_plan("[]").is_err());
        assert!(decode_plan(r#"{"action": "goto", "target": "x"}"#).is_err());
        assert!(decode_plan(r#"[{"action": "scroll", "target": "x"}]"#).is_err());
        assert_eq!(decode_plan(r#"[{"action": "note", "target": "hi"}]"#).unwrap().len(), 1);
    }
}
