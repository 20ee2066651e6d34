use crate::config::plan::{Step, StepAction};
use crate::store::profile::Profile;
use crate::{Error, Result};
use errand_agent::{LogEvent, LogSink, PageDriver};
use tracing::{debug, info};

/// How long a plan click waits before falling back to a text match.
pub const CLICK_TIMEOUT_MS: u64 = 2_000;

/// Profile fields written by a `useProfile` fill, as (selector, value).
fn profile_fields(profile: &Profile) -> [(&'static str, &str); 3] {
    [
        ("#name", profile.name.as_str()),
        ("#phone", profile.phone.as_str()),
        ("#address", profile.address.as_str()),
    ]
}

/// What a step needs besides the page.
pub struct StepContext<'a> {
    pub profile: &'a Profile,
    pub log: &'a dyn LogSink,
    pub ready_timeout_ms: u64,
    pub keystroke_delay_ms: u64,
}

/// Execute one plan step. `active_loop` is handled by the runner.
pub async fn execute_step<D: PageDriver + ?Sized>(
    driver: &D,
    step: &Step,
    ctx: &StepContext<'_>,
) -> Result<()> {
    match step.action {
        StepAction::Goto => {
            info!("goto: {}", step.target);
            driver.goto_ready(&step.target, ctx.ready_timeout_ms).await?;
        }
        StepAction::Click => {
            info!("click: {}", step.target);
            click_with_fallback(driver, &step.target).await?;
        }
        StepAction::Fill if step.uses_profile() => {
            info!("fill from profile: {}", step.target);
            for (selector, value) in profile_fields(ctx.profile) {
                driver.fill(selector, value).await?;
            }
        }
        StepAction::Fill => {
            let value = step.value().ok_or_else(|| {
                Error::ActionFailed(format!("fill {} has no value", step.target))
            })?;
            info!("fill: {}", step.target);
            driver.click(&step.target, CLICK_TIMEOUT_MS).await?;
            driver.type_keys(value, ctx.keystroke_delay_ms).await?;
        }
        StepAction::Note => {
            info!("note: {}", step.target);
            ctx.log.append(LogEvent::info(step.target.clone()));
        }
        StepAction::ActiveLoop => {
            return Err(Error::ActionFailed(
                "active_loop steps are run by the agent loop".into(),
            ));
        }
    }
    Ok(())
}

/// Click by selector; if that fails, click whatever shows the target as text.
async fn click_with_fallback<D: PageDriver + ?Sized>(driver: &D, target: &str) -> Result<()> {
    match driver.click(target, CLICK_TIMEOUT_MS).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_fatal() => Err(e.into()),
        Err(e) => {
            debug!("selector click failed ({}), trying text match", e);
            driver.click_text(target).await?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use errand_agent::testing::FakePage;
    use errand_agent::MemoryLog;

    async fn run(page: &FakePage, step: &Step, log: &MemoryLog) -> Result<()> {
        let profile = Profile::default();
        let ctx = StepContext {
            profile: &profile,
            log,
            ready_timeout_ms: 1_000,
            keystroke_delay_ms: 0,
        };
        execute_step(page, step, &ctx).await
    }

    #[tokio::test]
    async fn test_goto() {
        let page = FakePage::new();
        run(&page, &Step::goto("https://www.wikipedia.org"), &MemoryLog::default())
            .await
            .unwrap();
        assert_eq!(page.current_url(), "https://www.wikipedia.org");
    }

    #[tokio::test]
    async fn test_click_by_selector() {
        let page = FakePage::new();
        run(&page, &Step::click("#buy"), &MemoryLog::default()).await.unwrap();
        assert_eq!(page.ops(), vec!["click #buy"]);
    }

    #[tokio::test]
    async fn test_click_falls_back_to_text() {
        let page = FakePage::new();
        page.fail_selector("Order now");
        run(&page, &Step::click("Order now"), &MemoryLog::default())
            .await
            .unwrap();
        assert_eq!(page.ops(), vec!["click_text Order now"]);
    }

    #[tokio::test]
    async fn test_click_fails_when_both_paths_fail() {
        let page = FakePage::new();
        page.fail_selector("#login");
        page.fail_text("#login");
        assert!(run(&page, &Step::click("#login"), &MemoryLog::default())
            .await
            .is_err());
        assert!(page.ops().is_empty());
    }

    #[tokio::test]
    async fn test_click_on_dead_page_skips_fallback() {
        let page = FakePage::new();
        page.disconnect();
        let err = run(&page, &Step::click("#buy"), &MemoryLog::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(ref e) if e.is_fatal()));
    }

    #[tokio::test]
    async fn test_fill_from_profile() {
        let page = FakePage::new();
        run(&page, &Step::fill_profile("#checkout-form"), &MemoryLog::default())
            .await
            .unwrap();
        assert_eq!(
            page.ops(),
            vec![
                "fill #name=John Doe",
                "fill #phone=555-0123",
                "fill #address=123 Main St, Tech City",
            ]
        );
    }

    #[tokio::test]
    async fn test_fill_literal_types() {
        let page = FakePage::new();
        run(&page, &Step::fill("input[name=\"search\"]", "octopus"), &MemoryLog::default())
            .await
            .unwrap();
        assert_eq!(page.ops(), vec!["click input[name=\"search\"]", "type octopus"]);
    }

    #[tokio::test]
    async fn test_fill_without_value_fails() {
        let page = FakePage::new();
        let step = Step {
            action: StepAction::Fill,
            target: "#q".into(),
            data: None,
        };
        assert!(run(&page, &step, &MemoryLog::default()).await.is_err());
        assert!(page.ops().is_empty());
    }

    #[tokio::test]
    async fn test_note_logs_only() {
        let page = FakePage::new();
        let log = MemoryLog::default();
        run(&page, &Step::note("Searching Wikipedia for: octopus"), &log)
            .await
            .unwrap();
        assert!(page.ops().is_empty());
        assert_eq!(log.events(), vec![LogEvent::info("Searching Wikipedia for: octopus")]);
    }
}
