mod executor;

pub use executor::{execute_step, StepContext, CLICK_TIMEOUT_MS};

use std::sync::Arc;
use std::time::{Duration, Instant};

use errand_agent::{
    AgentConfig, AgentLoop, DecisionEngine, Launcher, LogEvent, LogSink, LoopOutcome, PageDriver,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::catalog::Catalog;
use crate::config::plan::{Mode, Step, StepAction};
use crate::registry::SessionRegistry;
use crate::store::profile::ProfileStore;
use crate::store::session::{SessionLog, SessionStore};
use crate::{Config, Error, Result};

/// Logged once when simulate mode stops in front of a submit step.
pub const HALT_MESSAGE: &str = "Stopping before submit (Simulation)";

/// Pause after every executed step.
const STEP_PAUSE: Duration = Duration::from_millis(1_000);

/// Result of executing a plan.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub session_id: String,
    /// Whether every step ran (or the run halted cleanly at a submit step).
    pub success: bool,
    /// Simulate mode stopped before a submit step.
    pub halted: bool,
    pub steps_completed: usize,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Default)]
struct Progress {
    completed: usize,
    halted: bool,
}

/// Executes plans, one browser per session.
pub struct Runner<L: Launcher> {
    registry: SessionRegistry<L>,
    sessions: Arc<SessionStore>,
    profiles: Arc<ProfileStore>,
    engine: Option<Arc<DecisionEngine>>,
    agent: AgentConfig,
    catalog: Catalog,
}

impl<L: Launcher> Runner<L> {
    /// Runner over `launcher`. Without an LLM credential, plans run but
    /// `active_loop` steps fail.
    pub fn new(
        launcher: L,
        sessions: Arc<SessionStore>,
        profiles: Arc<ProfileStore>,
        config: &Config,
    ) -> Self {
        let engine = match DecisionEngine::from_config(&config.llm) {
            Ok(engine) => Some(Arc::new(
                engine.with_max_elements(config.agent.max_prompt_elements),
            )),
            Err(e) => {
                debug!("no decision engine: {}", e);
                None
            }
        };
        Self {
            registry: SessionRegistry::new(launcher),
            sessions,
            profiles,
            engine,
            agent: config.agent.clone(),
            catalog: config.catalog.clone(),
        }
    }

    /// Replace the decision engine used by `active_loop` steps.
    pub fn with_engine(mut self, engine: Arc<DecisionEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn registry(&self) -> &SessionRegistry<L> {
        &self.registry
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn profiles(&self) -> &Arc<ProfileStore> {
        &self.profiles
    }

    pub fn engine(&self) -> Option<&Arc<DecisionEngine>> {
        self.engine.as_ref()
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.agent
    }

    /// Create a session for `plan` and run it in a fresh browser. Step
    /// failures end the run and are reported in the result and the session
    /// log; only store failures are returned as errors.
    pub async fn execute(&self, plan: &[Step], mode: Mode) -> Result<RunResult> {
        let id = self.sessions.create(plan, mode)?;
        self.execute_in(&id, plan, mode).await
    }

    /// Run `plan` under an existing session id.
    pub async fn execute_in(&self, id: &str, plan: &[Step], mode: Mode) -> Result<RunResult> {
        let start = Instant::now();
        let log = self.sessions.sink(id);
        info!(session = %id, %mode, "executing {} steps", plan.len());

        let mut progress = Progress::default();
        let outcome = match self.registry.acquire(id).await {
            Ok(driver) => {
                let outcome = self
                    .run_steps(driver.as_ref(), plan, mode, &log, &mut progress)
                    .await;
                drop(driver);
                self.registry.release(id).await;
                outcome
            }
            Err(e) => Err(e),
        };

        let error = match outcome {
            Ok(()) => None,
            // The loop already recorded why it stopped
            Err(Error::LoopAborted(reason)) => {
                warn!(session = %id, "agent loop aborted: {}", reason);
                Some(reason)
            }
            Err(e) => {
                warn!(session = %id, "execution failed: {}", e);
                log.append(LogEvent::error(e.to_string()));
                Some(e.to_string())
            }
        };

        let result = RunResult {
            session_id: id.to_string(),
            success: error.is_none(),
            halted: progress.halted,
            steps_completed: progress.completed,
            error,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            session = %id,
            "finished: success={} steps={} halted={}",
            result.success, result.steps_completed, result.halted
        );
        Ok(result)
    }

    async fn run_steps(
        &self,
        driver: &L::Driver,
        plan: &[Step],
        mode: Mode,
        log: &SessionLog,
        progress: &mut Progress,
    ) -> Result<()> {
        let profile = self.profiles.load()?;
        let ctx = StepContext {
            profile: &profile,
            log,
            ready_timeout_ms: self.agent.ready_timeout_ms,
            keystroke_delay_ms: self.agent.keystroke_delay_ms,
        };

        for (i, step) in plan.iter().enumerate() {
            if mode == Mode::Simulate && self.catalog.is_submit(step) {
                info!("simulate mode: stopping before {}", step.target);
                log.append(LogEvent::info(HALT_MESSAGE));
                progress.halted = true;
                break;
            }

            debug!("step {}: {} {}", i + 1, step.action.as_str(), step.target);
            let record = step.record();

            if step.action == StepAction::ActiveLoop {
                self.delegate(driver, step, log).await?;
                progress.completed += 1;
                break;
            }

            log.append(LogEvent::running(record.clone()));
            execute_step(driver, step, &ctx).await?;
            log.append(LogEvent::complete(record));
            progress.completed += 1;

            tokio::time::sleep(STEP_PAUSE).await;
        }
        Ok(())
    }

    /// Hand the goal of an `active_loop` step to the agent loop on this page.
    async fn delegate(&self, driver: &L::Driver, step: &Step, log: &SessionLog) -> Result<()> {
        let goal = step
            .goal()
            .filter(|g| !g.trim().is_empty())
            .ok_or_else(|| Error::Config("active_loop step has no data.goal".into()))?;
        let engine = self
            .engine
            .as_deref()
            .ok_or(errand_agent::Error::NoBackend)?;

        if !step.target.is_empty() {
            driver
                .goto_ready(&step.target, self.agent.ready_timeout_ms)
                .await?;
        }

        info!("delegating to agent loop: {}", goal);
        let record = step.record();
        log.append(LogEvent::running(record.clone()));
        let report = AgentLoop::new(driver, engine, &self.agent, log as &dyn LogSink)
            .run(goal)
            .await;
        debug!("agent loop finished after {} iterations", report.iterations);

        if let LoopOutcome::Aborted { error } = report.outcome {
            return Err(Error::LoopAborted(error));
        }
        log.append(LogEvent::complete(record));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::plan::Plan;
    use errand_agent::testing::{FakeLauncher, FakePage, ScriptedBackend};
    use errand_agent::{ChatBackend, ElementDescriptor, Gateway};

    fn buttons() -> Vec<ElementDescriptor> {
        (1..=8)
            .map(|i| ElementDescriptor::new(i, "button", format!("Button {i}")))
            .collect()
    }

    fn runner(launcher: FakeLauncher) -> Runner<FakeLauncher> {
        let config = Config::default();
        Runner::new(
            launcher,
            Arc::new(SessionStore::in_memory()),
            Arc::new(ProfileStore::in_memory()),
            &config,
        )
    }

    fn engine(backend: Arc<ScriptedBackend>) -> Arc<DecisionEngine> {
        let gateway = Gateway::new(
            vec![backend as Arc<dyn ChatBackend>],
            Duration::from_secs(20),
        );
        Arc::new(DecisionEngine::new(gateway))
    }

    fn session_events(runner: &Runner<FakeLauncher>, id: &str) -> Vec<LogEvent> {
        runner
            .sessions()
            .get(id)
            .unwrap()
            .logs
            .into_iter()
            .map(|e| e.event)
            .collect()
    }

    fn wikipedia_plan() -> Plan {
        Catalog::default()
            .match_goal("search wikipedia for octopus")
            .unwrap()
            .unwrap()
            .1
    }

    #[tokio::test(start_paused = true)]
    async fn test_wikipedia_plan_simulated() {
        let runner = runner(FakeLauncher::new(FakePage::new));
        let plan = wikipedia_plan();
        let result = runner.execute(&plan, Mode::Simulate).await.unwrap();

        assert!(result.success);
        assert!(!result.halted);
        assert_eq!(result.steps_completed, 4);

        let completed: Vec<_> = session_events(&runner, &result.session_id)
            .into_iter()
            .filter_map(|e| match e {
                LogEvent::StepComplete { step } => Some(step),
                _ => None,
            })
            .collect();
        let expected: Vec<_> = plan.iter().map(Step::record).collect();
        assert_eq!(completed, expected);
        assert!(runner.registry().live_ids().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulate_halts_before_submit() {
        let runner = runner(FakeLauncher::new(FakePage::new));
        let plan = Catalog::default()
            .match_goal("order a pizza")
            .unwrap()
            .unwrap()
            .1;
        let result = runner.execute(&plan, Mode::Simulate).await.unwrap();

        assert!(result.success);
        assert!(result.halted);
        assert_eq!(result.steps_completed, 3);

        let events = session_events(&runner, &result.session_id);
        let halts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, LogEvent::Info { .. }))
            .collect();
        assert_eq!(halts, vec![&LogEvent::info(HALT_MESSAGE)]);
        assert_eq!(events.last(), Some(&LogEvent::info(HALT_MESSAGE)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_assist_clicks_submit() {
        let runner = runner(FakeLauncher::new(FakePage::new));
        let plan = vec![
            Step::goto("http://localhost:3000/demo/index.html"),
            Step::click("#place-order-btn"),
        ];
        let result = runner.execute(&plan, Mode::Assist).await.unwrap();
        assert!(result.success);
        assert!(!result.halted);
        assert_eq!(result.steps_completed, 2);

        let events = session_events(&runner, &result.session_id);
        assert!(!events.contains(&LogEvent::info(HALT_MESSAGE)));
        assert_eq!(
            events.last(),
            Some(&LogEvent::complete(Step::click("#place-order-btn").record()))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_failure_logs_error_and_stops() {
        let runner = runner(FakeLauncher::new(|| {
            let page = FakePage::new();
            page.fail_selector("#missing");
            page.fail_text("#missing");
            page
        }));
        let plan = vec![
            Step::click("#missing"),
            Step::note("never reached"),
        ];
        let result = runner.execute(&plan, Mode::Assist).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.steps_completed, 0);
        assert!(result.error.is_some());

        let events = session_events(&runner, &result.session_id);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LogEvent::Step { .. }));
        assert!(matches!(events[1], LogEvent::Error { .. }));
        assert!(runner.registry().live_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_launch_failure_is_logged() {
        let runner = runner(FakeLauncher::broken());
        let result = runner
            .execute(&[Step::goto("https://example.com")], Mode::Simulate)
            .await
            .unwrap();
        assert!(!result.success);
        let events = session_events(&runner, &result.session_id);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], LogEvent::Error { error } if error.contains("Chrome not found")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_loop_delegation() {
        let backend = ScriptedBackend::sequence(
            "m",
            &[
                r#"{"action": "click", "target": "2", "reason": "open the menu"}"#,
                r#"{"action": "done", "target": "", "reason": "table booked"}"#,
            ],
        );
        let runner = runner(FakeLauncher::new(|| FakePage::new().with_elements(buttons())))
            .with_engine(engine(backend.clone()));
        let plan = vec![
            Step::active_loop("https://www.google.com", "book a table"),
            Step::note("never reached"),
        ];
        let result = runner.execute(&plan, Mode::Simulate).await.unwrap();

        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.steps_completed, 1);
        assert_eq!(backend.calls(), 2);

        let events = session_events(&runner, &result.session_id);
        let record = plan[0].record();
        assert_eq!(events.first(), Some(&LogEvent::running(record.clone())));
        assert_eq!(events.last(), Some(&LogEvent::complete(record)));
        assert!(events.contains(&LogEvent::info("Goal Achieved!")));
        assert!(!events.contains(&LogEvent::info("never reached")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_loop_without_engine_fails() {
        let runner = runner(FakeLauncher::new(FakePage::new));
        let plan = vec![Step::active_loop("https://www.google.com", "book a table")];
        let result = runner.execute(&plan, Mode::Simulate).await.unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("no backend"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_loop_is_not_logged_twice() {
        let backend = ScriptedBackend::always("m", r#"{"action": "click", "target": "1", "reason": "go"}"#);
        let runner = runner(FakeLauncher::new(|| {
            let page = FakePage::new().with_elements(buttons());
            page.disconnect();
            page
        }))
        .with_engine(engine(backend));
        let plan = vec![Step::active_loop("", "anything")];
        let result = runner.execute(&plan, Mode::Simulate).await.unwrap();

        assert!(!result.success);
        let errors = session_events(&runner, &result.session_id)
            .into_iter()
            .filter(|e| matches!(e, LogEvent::Error { .. }))
            .count();
        assert_eq!(errors, 1);
        assert!(runner.registry().live_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_busy_session_id() {
        let runner = runner(FakeLauncher::new(FakePage::new));
        runner.sessions().ensure("dock", Mode::Assist).unwrap();
        let _held = runner.registry().acquire("dock").await.unwrap();

        let result = runner
            .execute_in("dock", &[Step::note("hi")], Mode::Assist)
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("already running"));
        // the holder keeps its browser
        assert_eq!(runner.registry().live_ids().await, vec!["dock"]);
    }
}
