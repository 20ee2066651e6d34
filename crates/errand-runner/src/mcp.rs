//! Stdio tool server exposing planning, execution, sessions and the profile.

use rmcp::{
    handler::server::{tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use errand_agent::EokaLauncher;

use crate::{Config, Error, Mode, Plan, Planner, ProfileStore, Runner, SessionStore};

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ParseIntentRequest {
    #[schemars(description = "What the user wants done, in plain language")]
    pub goal: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExecuteRequest {
    #[schemars(description = "Steps to run, as returned by parse_intent (possibly edited)")]
    pub plan: Plan,
    #[schemars(
        description = "'simulate' (default) stops before submit steps; 'assist' runs everything"
    )]
    #[serde(default)]
    pub mode: Mode,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionRequest {
    #[schemars(description = "Session id returned by execute")]
    pub id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct UpdateProfileRequest {
    #[schemars(
        description = "Fields to overwrite, e.g. {\"name\": \"Ada\", \"paymentMethod\": \"Cash\"}"
    )]
    pub fields: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn err(e: impl std::fmt::Display) -> ErrorData {
    ErrorData::internal_error(e.to_string(), None::<Value>)
}

fn store_err(e: Error) -> ErrorData {
    match e {
        Error::SessionNotFound(_) => ErrorData::invalid_params(e.to_string(), None::<Value>),
        e => err(e),
    }
}

fn text_ok(s: impl Into<String>) -> Result<CallToolResult, ErrorData> {
    Ok(CallToolResult::success(vec![Content::text(s.into())]))
}

fn json_ok(value: &impl serde::Serialize) -> Result<CallToolResult, ErrorData> {
    text_ok(serde_json::to_string_pretty(value).map_err(err)?)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ErrandServer {
    planner: Arc<Planner>,
    runner: Arc<Runner<EokaLauncher>>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ErrandServer {
    pub fn new(planner: Planner, runner: Runner<EokaLauncher>) -> Self {
        Self {
            planner: Arc::new(planner),
            runner: Arc::new(runner),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        description = "Turn a goal into a plan of browser steps. Returns {plan}. Does not touch the browser."
    )]
    async fn parse_intent(
        &self,
        req: Parameters<ParseIntentRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let goal = req.0.goal.trim();
        if goal.is_empty() {
            return Err(ErrorData::invalid_params("goal is required", None::<Value>));
        }
        let plan = self.planner.plan(goal).await.map_err(err)?;
        json_ok(&json!({ "plan": plan }))
    }

    #[tool(
        description = "Run a plan in a fresh browser session. Returns {sessionId, result}; read the log with get_session."
    )]
    async fn execute(&self, req: Parameters<ExecuteRequest>) -> Result<CallToolResult, ErrorData> {
        let ExecuteRequest { plan, mode } = req.0;
        if plan.is_empty() {
            return Err(ErrorData::invalid_params("plan is empty", None::<Value>));
        }
        let result = self.runner.execute(&plan, mode).await.map_err(err)?;
        json_ok(&json!({ "sessionId": result.session_id, "result": result }))
    }

    #[tool(description = "Fetch a session: its plan, mode and log entries.")]
    async fn get_session(
        &self,
        req: Parameters<SessionRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let session = self.runner.sessions().get(&req.0.id).map_err(store_err)?;
        json_ok(&session)
    }

    #[tool(description = "Show the profile used to fill checkout forms.")]
    async fn get_profile(&self) -> Result<CallToolResult, ErrorData> {
        let profile = self.runner.profiles().load().map_err(err)?;
        json_ok(&profile)
    }

    #[tool(description = "Merge fields into the stored profile. Returns the updated profile.")]
    async fn update_profile(
        &self,
        req: Parameters<UpdateProfileRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let profile = self
            .runner
            .profiles()
            .update(&req.0.fields)
            .map_err(err)?;
        json_ok(&profile)
    }
}

#[tool_handler]
impl ServerHandler for ErrandServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "errand".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Goal-driven browser errands.\n\n\
                 FLOW: parse_intent(goal) -> review/edit plan -> execute(plan, mode) -> get_session(id)\n\
                 MODES: simulate stops before submit steps (default); assist runs everything\n\
                 STEPS: goto, click, fill (data.value or data.useProfile), note, active_loop (data.goal)\n\
                 PROFILE: get_profile, update_profile"
                    .into(),
            ),
        }
    }
}

/// Serve on stdio with stores under `data_dir`.
pub async fn run_server(config: Config, data_dir: &Path) -> anyhow::Result<()> {
    use rmcp::ServiceExt;

    let sessions = Arc::new(SessionStore::open(data_dir.join("sessions"))?);
    let profiles = Arc::new(ProfileStore::open(data_dir.join("profile.json"))?);
    let planner = Planner::from_config(&config);
    let runner = Runner::new(config.browser.launcher(), sessions, profiles, &config);

    let server = ErrandServer::new(planner, runner);
    let service = server.serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StepAction;

    #[test]
    fn test_execute_request_defaults_to_simulate() {
        let req: ExecuteRequest = serde_json::from_value(json!({
            "plan": [{"action": "goto", "target": "https://www.wikipedia.org"}]
        }))
        .unwrap();
        assert_eq!(req.mode, Mode::Simulate);
        assert_eq!(req.plan[0].action, StepAction::Goto);
    }

    #[test]
    fn test_execute_request_rejects_unknown_mode() {
        let req = serde_json::from_value::<ExecuteRequest>(json!({
            "plan": [], "mode": "yolo"
        }));
        assert!(req.is_err());
    }

    #[test]
    fn test_missing_session_is_invalid_params() {
        let e = store_err(Error::SessionNotFound("x".into()));
        assert_eq!(e.code, ErrorCode::INVALID_PARAMS);
        let e = store_err(Error::Config("boom".into()));
        assert_eq!(e.code, ErrorCode::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn test_info_lists_tools() {
        let config = Config::default();
        let server = ErrandServer::new(
            Planner::from_config(&config),
            Runner::new(
                EokaLauncher::default(),
                Arc::new(SessionStore::in_memory()),
                Arc::new(ProfileStore::in_memory()),
                &config,
            ),
        );
        let info = server.get_info();
        assert_eq!(info.server_info.name, "errand");
        let tools: Vec<String> = server
            .tool_router
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        for name in ["parse_intent", "execute", "get_session", "get_profile", "update_profile"] {
            assert!(tools.contains(&name.to_string()), "missing {name}");
        }
    }
}
