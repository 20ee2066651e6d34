//! The observe → think → act loop.
//!
//! Control flow is an explicit phase machine. [`transition`] is the whole
//! table; [`AgentLoop::run`] only performs the work of each phase and feeds
//! the resulting event back in.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::act::ActionExecutor;
use crate::blockage::{self, Blockage};
use crate::config::AgentConfig;
use crate::decision::{Decision, DecisionEngine};
use crate::driver::PageDriver;
use crate::log::{LogEvent, LogSink, StepRecord};
use crate::observe;
use crate::overlay::{self, Status};
use crate::{ElementDescriptor, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Observing,
    Blocked,
    Thinking,
    Acting,
    Done,
    Exhausted,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Exhausted | Phase::Aborted)
    }
}

/// What the work of a phase produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Observed,
    BlockageDetected,
    BlockageCleared,
    Decided,
    GoalReached,
    Acted,
    /// Recoverable error; the iteration is abandoned
    Faulted,
    BudgetSpent,
    /// The page or browser is gone
    Fatal,
}

/// Next phase. Terminal phases absorb every event; pairs the table does not
/// name leave the phase unchanged.
pub fn transition(phase: Phase, event: Event) -> Phase {
    use Event::*;
    use Phase::*;

    match (phase, event) {
        (p, _) if p.is_terminal() => p,
        (_, Fatal) => Aborted,
        (Observing, BudgetSpent) => Exhausted,
        (Observing, Observed) => Thinking,
        (Observing, BlockageDetected) => Blocked,
        (Blocked, BlockageCleared) => Observing,
        (Thinking, Decided) => Acting,
        (Thinking, GoalReached) => Done,
        (Acting, Acted) => Observing,
        (Observing | Thinking | Acting, Faulted) => Observing,
        (p, _) => p,
    }
}

/// Iteration counter. Every entry into `Observing` starts a new iteration.
#[derive(Debug, Clone, Copy)]
pub struct StepBudget {
    used: usize,
    cap: usize,
}

impl StepBudget {
    pub fn new(cap: usize) -> Self {
        Self { used: 0, cap }
    }

    /// Claim the next iteration; false once the cap is reached.
    pub fn begin(&mut self) -> bool {
        if self.used >= self.cap {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The model reported the goal achieved (or its reply was unusable)
    Done { reason: String },
    /// The iteration cap ran out
    Exhausted,
    /// The page became unusable
    Aborted { error: String },
}

#[derive(Debug, Clone)]
pub struct LoopReport {
    pub outcome: LoopOutcome,
    pub iterations: usize,
    /// Every phase entered, in order, starting with `Observing`
    pub trace: Vec<Phase>,
}

struct Observation {
    url: String,
    elements: Vec<ElementDescriptor>,
}

/// Runs goals against one page.
pub struct AgentLoop<'a, D: PageDriver + ?Sized> {
    driver: &'a D,
    engine: &'a DecisionEngine,
    config: &'a AgentConfig,
    log: &'a dyn LogSink,
}

impl<'a, D: PageDriver + ?Sized> AgentLoop<'a, D> {
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

    /// Drive the page toward `goal`. Never fails: errors inside an iteration
    /// are retried, and a dead page ends the run as [`LoopOutcome::Aborted`].
    pub async fn run(&self, goal: &str) -> LoopReport {
        info!("goal: {}", goal);
        if let Err(e) = overlay::install(self.driver).await {
            debug!("overlay install failed: {}", e);
        }

        let mut budget = StepBudget::new(self.config.max_steps);
        let mut phase = Phase::Observing;
        let mut trace = vec![phase];
        let mut observation: Option<Observation> = None;
        let mut decision: Option<Decision> = None;
        let mut fatal = String::new();

        let outcome = loop {
            let step = match phase {
                Phase::Observing => self.observe(&mut budget, &mut observation).await,
                Phase::Blocked => {
                    self.wait_for_human().await;
                    Ok(Event::BlockageCleared)
                }
                Phase::Thinking => self.think(goal, observation.take(), &mut decision).await,
                Phase::Acting => self.act(decision.as_ref()).await,
                Phase::Done => {
                    let reason = decision.take().map(|d| d.reason).unwrap_or_default();
                    break LoopOutcome::Done { reason };
                }
                Phase::Exhausted => {
                    warn!("step limit of {} reached for goal: {}", self.config.max_steps, goal);
                    overlay::post_status(self.driver, &Status::Exhausted).await;
                    break LoopOutcome::Exhausted;
                }
                Phase::Aborted => break LoopOutcome::Aborted { error: fatal },
            };

            let event = match step {
                Ok(event) => event,
                Err(e) if e.is_fatal() => {
                    error!("agent loop aborted: {}", e);
                    self.log.append(LogEvent::error(e.to_string()));
                    overlay::post_status(self.driver, &Status::Failed(e.to_string())).await;
                    fatal = e.to_string();
                    Event::Fatal
                }
                Err(e) => {
                    warn!("step {} failed: {}", budget.used(), e);
                    overlay::post_status(self.driver, &Status::Retrying).await;
                    Event::Faulted
                }
            };

            let next = transition(phase, event);
            debug!("{:?} --{:?}--> {:?}", phase, event, next);
            phase = next;
            trace.push(phase);
        };

        LoopReport {
            outcome,
            iterations: budget.used(),
            trace,
        }
    }

    async fn observe(
        &self,
        budget: &mut StepBudget,
        observation: &mut Option<Observation>,
    ) -> Result<Event> {
        if !budget.begin() {
            return Ok(Event::BudgetSpent);
        }
        debug!("iteration {}/{}", budget.used(), self.config.max_steps);

        overlay::post_status(self.driver, &Status::Scanning).await;
        if let Err(e) = self.driver.wait_for_idle(self.config.idle_timeout_ms).await {
            if e.is_fatal() {
                return Err(e);
            }
            debug!("network did not settle: {}", e);
        }

        let elements = observe::snapshot_settled(self.driver, self.config).await?;
        if elements.is_empty() {
            overlay::post_status(self.driver, &Status::EmptyPage).await;
        }

        let text = self.driver.text().await?;
        if let Some(blockage) = blockage::detect(&text, &self.config.blockage) {
            self.report_blockage(&blockage).await;
            return Ok(Event::BlockageDetected);
        }

        let url = self.driver.url().await?;
        debug!("{} elements on {}", elements.len(), url);
        *observation = Some(Observation { url, elements });
        Ok(Event::Observed)
    }

    async fn report_blockage(&self, blockage: &Blockage) {
        warn!("page needs a human: {}", blockage);
        overlay::post_status(self.driver, &Status::Blocked).await;
        self.log.append(LogEvent::info(format!(
            "Agent paused for manual CAPTCHA solution ({})",
            blockage
        )));
    }

    async fn wait_for_human(&self) {
        tokio::time::sleep(Duration::from_millis(self.config.blockage.wait_ms)).await;
        overlay::post_status(self.driver, &Status::Resuming).await;
    }

    async fn think(
        &self,
        goal: &str,
        observation: Option<Observation>,
        decision: &mut Option<Decision>,
    ) -> Result<Event> {
        let Some(observation) = observation else {
            return Ok(Event::Faulted);
        };

        self.log.append(LogEvent::running(StepRecord::new(
            "thinking",
            "AI is planning...",
        )));
        overlay::post_status(self.driver, &Status::Thinking("Thinking...".into())).await;

        let chosen = self
            .engine
            .decide(goal, &observation.url, &observation.elements)
            .await?
            .into_decision();
        info!("{} {} ({})", chosen.action, chosen.target, chosen.reason);

        let thought = if chosen.reason.is_empty() {
            format!("Action: {}", chosen.action)
        } else {
            chosen.reason.clone()
        };
        overlay::post_status(self.driver, &Status::Thinking(thought)).await;
        self.log
            .append(LogEvent::complete(StepRecord::new("thought", &chosen.reason)));
        if self.config.reflect_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.reflect_ms)).await;
        }

        let event = if chosen.is_done() {
            overlay::post_status(self.driver, &Status::Achieved).await;
            self.log.append(LogEvent::info("Goal Achieved!"));
            Event::GoalReached
        } else {
            Event::Decided
        };
        *decision = Some(chosen);
        Ok(event)
    }

    async fn act(&self, decision: Option<&Decision>) -> Result<Event> {
        let Some(decision) = decision else {
            return Ok(Event::Faulted);
        };

        let mut record = StepRecord::new(decision.action.as_str(), &decision.target);
        if let Some(value) = &decision.value {
            record = record.with_data(serde_json::json!({ "value": value }));
        }
        self.log.append(LogEvent::running(record.clone()));
        overlay::post_status(
            self.driver,
            &Status::Acting {
                action: decision.action.to_string(),
                target: decision.target.clone(),
            },
        )
        .await;

        ActionExecutor::new(self.driver, self.config)
            .apply(decision)
            .await?;

        self.log.append(LogEvent::complete(record));
        if self.config.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }
        Ok(Event::Acted)
    }
}
