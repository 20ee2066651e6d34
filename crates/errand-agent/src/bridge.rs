//! Goal bridge: turns goals typed into the page's dock into loop runs.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::agent_loop::{AgentLoop, LoopOutcome};
use crate::config::AgentConfig;
use crate::decision::DecisionEngine;
use crate::driver::PageDriver;
use crate::log::{LogEvent, LogSink};
use crate::overlay;
use crate::Result;

/// How often the dock is polled for new goals.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct GoalBridge<'a, D: PageDriver + ?Sized> {
    driver: &'a D,
    engine: &'a DecisionEngine,
    config: &'a AgentConfig,
    log: &'a dyn LogSink,
}

impl<'a, D: PageDriver + ?Sized> GoalBridge<'a, D> {
    pub fn new(
        driver: &'a D,
        engine: &'a DecisionEngine,
        config: &'a AgentConfig,
        log: &'a dyn LogSink,
    ) -> Self {
        Self {
            driver,
            engine,
            config,
            log,
        }
    }

    /// Serve goals until the page goes away. Only returns on a fatal error.
    pub async fn run(&self) -> Result<()> {
        overlay::install(self.driver).await?;
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(0) => {}
                Ok(n) => debug!("bridge ran {} goals", n),
                Err(e) if e.is_fatal() => return Err(e),
                // Mid-navigation the execution context can vanish between calls
                Err(e) => debug!("bridge poll skipped: {}", e),
            }
        }
    }

    /// Reinstall the dock if navigation removed it, then run every queued
    /// goal in order. Returns how many goals ran. After an aborted goal the
    /// rest of the queue is logged as skipped.
    pub async fn poll_once(&self) -> Result<usize> {
        if !overlay::is_installed(self.driver).await? {
            debug!("dock missing, reinstalling");
            overlay::install(self.driver).await?;
            return Ok(0);
        }

        let goals = overlay::drain_goals(self.driver).await?;
        for (ran, goal) in goals.iter().enumerate() {
            info!("dock goal: {}", goal);
            self.log.append(LogEvent::info(format!("Goal received: {}", goal)));
            let report = AgentLoop::new(self.driver, self.engine, self.config, self.log)
                .run(goal)
                .await;
            if matches!(report.outcome, LoopOutcome::Aborted { .. }) {
                warn!("dock goal aborted: {:?}", report.outcome);
                for skipped in &goals[ran + 1..] {
                    self.log.append(LogEvent::error(format!("Goal skipped: {}", skipped)));
                }
                return Ok(ran + 1);
            }
            info!("dock goal finished: {:?} after {} iterations", report.outcome, report.iterations);
        }
        if !goals.is_empty() {
            overlay::clear_status(self.driver).await;
        }
        Ok(goals.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChatBackend, Gateway};
    use crate::log::MemoryLog;
    use crate::testing::{FakePage, ScriptedBackend};
    use crate::ElementDescriptor;
    use std::sync::Arc;

    fn engine(backend: Arc<ScriptedBackend>) -> DecisionEngine {
        DecisionEngine::new(Gateway::new(
            vec![backend as Arc<dyn ChatBackend>],
            Duration::from_secs(20),
        ))
    }

    fn page() -> FakePage {
        let elements = (1..=6)
            .map(|i| ElementDescriptor::new(i, "a", format!("Link {i}")))
            .collect();
        FakePage::new().with_elements(elements).with_text("home")
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_reinstalls_missing_dock() {
        let page = page();
        let engine = engine(ScriptedBackend::always("m", r#"{"action":"done","reason":"ok"}"#));
        let config = AgentConfig::default();
        let log = MemoryLog::default();
        let bridge = GoalBridge::new(&page, &engine, &config, &log);

        assert_eq!(bridge.poll_once().await.unwrap(), 0);
        assert!(overlay::is_installed(&page).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_runs_queued_goals_in_order() {
        let page = page();
        let backend = ScriptedBackend::always("m", r#"{"action":"done","reason":"ok"}"#);
        let engine = engine(backend.clone());
        let config = AgentConfig::default();
        let log = MemoryLog::default();
        let bridge = GoalBridge::new(&page, &engine, &config, &log);

        overlay::install(&page).await.unwrap();
        page.queue_goal("first goal");
        page.queue_goal("second goal");

        assert_eq!(bridge.poll_once().await.unwrap(), 2);
        let prompts = backend.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0][0].content.contains("first goal"));
        assert!(prompts[1][0].content.contains("second goal"));
        assert_eq!(bridge.poll_once().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_goals_after_abort_are_logged_as_skipped() {
        let page = page();
        let backend = ScriptedBackend::always(
            "m",
            r#"{"action":"goto","target":"https://example.com","reason":"go"}"#,
        );
        let engine = engine(backend.clone());
        let config = AgentConfig::default();
        let log = MemoryLog::default();
        let bridge = GoalBridge::new(&page, &engine, &config, &log);

        overlay::install(&page).await.unwrap();
        page.queue_goal("first goal");
        page.queue_goal("second goal");
        page.queue_goal("third goal");
        page.disconnect_on_goto();

        assert_eq!(bridge.poll_once().await.unwrap(), 1);
        assert_eq!(backend.calls(), 1);
        let events = log.events();
        assert!(events.contains(&LogEvent::error("Goal skipped: second goal")));
        assert!(events.contains(&LogEvent::error("Goal skipped: third goal")));
        assert!(!events.contains(&LogEvent::info("Goal received: second goal")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_dead_page() {
        let page = page();
        let engine = engine(ScriptedBackend::always("m", r#"{"action":"done","reason":"ok"}"#));
        let config = AgentConfig::default();
        let log = MemoryLog::default();
        page.disconnect();

        let err = GoalBridge::new(&page, &engine, &config, &log).run().await.unwrap_err();
        assert!(err.is_fatal());
    }
}
