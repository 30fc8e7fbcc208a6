//! Step Executor - runs a goal's fallback chain.
//!
//! Strategies run in order and each is followed by its probe. The first
//! `Confirmed` ends the step. Otherwise the chain is walked again, up to the
//! step's cycle budget, and the best result seen is returned as degraded.
//! Input errors never escape: they become `Failed` results.

use super::probe::{ProbeContext, VerificationProbe};
use super::{Action, Goal, Strategy, TextSource, UIGoalStep, VerificationResult, Verify};
use crate::config::Timings;
use crate::geometry::GeometryProfile;
use crate::input::{InputSynthesizer, KeyChord, KeyCode};
use crate::locator::AppLocator;
use crate::target::{MessageRequest, TargetAppDescriptor};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A `Relaunch` action could not start the installed executable.
#[derive(Debug, thiserror::Error)]
#[error("could not start {}: {source}", .path.display())]
pub struct LaunchError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Everything a strategy can touch during one session.
pub struct DriveContext<'a> {
    pub input: &'a InputSynthesizer,
    pub probe: &'a VerificationProbe,
    pub locator: &'a AppLocator,
    pub geometry: &'a GeometryProfile,
    pub target: &'a TargetAppDescriptor,
    pub request: &'a MessageRequest,
    pub timings: &'a Timings,
    /// Needed by `Relaunch`; `None` if the app was found running without a known path.
    pub install_path: Option<&'a Path>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub strategy: String,
    pub actions: String,
    pub cycle: u32,
    pub result: VerificationResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub goal: Goal,
    /// Best result over all attempts.
    pub result: VerificationResult,
    pub attempts: Vec<AttemptRecord>,
    /// Set whenever the step ends without a confirmation.
    pub degraded: bool,
    /// A strategy failed to spawn the app from the known install path.
    pub launch_failed: bool,
}

impl StepOutcome {
    /// Human-readable list of what was tried, for intervention prompts.
    pub fn guidance(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for attempt in &self.attempts {
            let line = format!("{}: {}", attempt.strategy, attempt.actions);
            if !seen.contains(&line) {
                seen.push(line);
            }
        }
        seen
    }
}

pub struct StepExecutor<'a> {
    ctx: DriveContext<'a>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(ctx: DriveContext<'a>) -> Self {
        Self { ctx }
    }

    pub async fn run(&self, step: &UIGoalStep) -> StepOutcome {
        let cycles = step.cycles.max(1);
        let mut attempts = Vec::new();
        let mut best: Option<VerificationResult> = None;
        let mut launch_failed = false;

        'chain: for cycle in 1..=cycles {
            for strategy in &step.strategies {
                let (result, spawn_failed) = self.try_strategy(strategy).await;
                launch_failed |= spawn_failed;
                log::info!(
                    "[executor] {} via {} (pass {}/{}): {:?} - {}",
                    step.goal,
                    strategy.name,
                    cycle,
                    cycles,
                    result.verdict,
                    result.evidence_or_none()
                );

                let confirmed = result.is_confirmed();
                if best.as_ref().map_or(true, |b| result.verdict > b.verdict) {
                    best = Some(result.clone());
                }
                attempts.push(AttemptRecord {
                    strategy: strategy.name.clone(),
                    actions: describe_actions(&strategy.actions),
                    cycle,
                    result,
                });

                if confirmed {
                    break 'chain;
                }
            }
        }

        let result = best.unwrap_or_else(|| VerificationResult::unconfirmed("no strategies configured"));
        let degraded = !result.is_confirmed();
        if degraded {
            log::warn!("[executor] {} not confirmed after {} attempts", step.goal, attempts.len());
        }

        StepOutcome {
            goal: step.goal,
            result,
            attempts,
            degraded,
            launch_failed,
        }
    }

    /// Perform one strategy's actions, then probe.
    pub async fn attempt(&self, strategy: &Strategy) -> VerificationResult {
        self.try_strategy(strategy).await.0
    }

    /// Like `attempt`, also reporting whether a spawn failed along the way.
    async fn try_strategy(&self, strategy: &Strategy) -> (VerificationResult, bool) {
        match self.perform_all(&strategy.actions).await {
            Ok(()) => (self.verify(strategy.verify).await, false),
            Err(e) => {
                let spawn_failed = e.downcast_ref::<LaunchError>().is_some();
                (VerificationResult::failed(format!("{} aborted: {}", strategy.name, e)), spawn_failed)
            }
        }
    }

    pub async fn verify(&self, kind: Verify) -> VerificationResult {
        let probe_ctx = ProbeContext {
            input: self.ctx.input,
            locator: self.ctx.locator,
            target: self.ctx.target,
            request: self.ctx.request,
            marker_char_delay: Duration::from_millis(self.ctx.timings.body_char_ms),
        };
        self.ctx.probe.verify(kind, &probe_ctx).await
    }

    pub async fn perform_all(&self, actions: &[Action]) -> anyhow::Result<()> {
        for action in actions {
            self.perform(action).await?;
        }
        Ok(())
    }

    pub async fn perform(&self, action: &Action) -> anyhow::Result<()> {
        let input = self.ctx.input;
        let timings = self.ctx.timings;

        match action {
            Action::Click { at } => input.click(self.ctx.geometry.point(*at)).await?,
            Action::Key { chord } => input.key(chord).await?,
            Action::Repeat { chord, times } => input.key_repeated(chord, *times).await?,
            Action::TabNavigate { times } => input.key_repeated(&KeyChord::key(KeyCode::Tab), *times).await?,
            Action::Type { text } => {
                let (text, per_char) = match text {
                    TextSource::Contact => (self.ctx.request.contact.as_str(), timings.contact_char_ms),
                    TextSource::Body => (self.ctx.request.body.as_str(), timings.body_char_ms),
                    TextSource::Literal(text) => (text.as_str(), timings.body_char_ms),
                };
                input.type_text(text, Duration::from_millis(per_char)).await?;
            }
            Action::Pause { ms } => tokio::time::sleep(Duration::from_millis(*ms)).await,
            Action::Relaunch => self.relaunch().await?,
            Action::ClickWindow => {
                let point = self
                    .ctx
                    .locator
                    .find_window(self.ctx.target)
                    .and_then(|w| w.title_bar_point())
                    .ok_or_else(|| anyhow::anyhow!("no visible {} window to click", self.ctx.target.name))?;
                input.click(point).await?;
            }
        }
        Ok(())
    }

    async fn relaunch(&self) -> anyhow::Result<()> {
        let path = self
            .ctx
            .install_path
            .ok_or_else(|| anyhow::anyhow!("install path unknown"))?;
        self.ctx.locator.spawn(path).map_err(|source| LaunchError {
            path: path.to_path_buf(),
            source,
        })?;

        let timings = self.ctx.timings;
        let target = self.ctx.target;
        let visible = self
            .ctx
            .locator
            .poll_until(
                Duration::from_millis(timings.window_timeout_ms),
                Duration::from_millis(timings.poll_interval_ms),
                |locator| locator.find_window(target).is_some(),
            )
            .await;
        if !visible {
            anyhow::bail!("relaunch did not bring up a window");
        }
        tokio::time::sleep(Duration::from_millis(timings.after_click_ms)).await;
        Ok(())
    }
}

fn describe_actions(actions: &[Action]) -> String {
    if actions.is_empty() {
        return "check only".to_string();
    }
    actions.iter().map(Action::describe).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProbeConfig, Timings};
    use crate::drive::Verdict;
    use crate::geometry::{self, Anchor};
    use crate::input::Settle;
    use crate::testing::{Echo, EventLog, FakeDesktop, InputEvent, RecordingBackend, ScriptedReadback};
    use std::sync::Arc;

    struct Rig {
        input: InputSynthesizer,
        probe: VerificationProbe,
        locator: AppLocator,
        geometry: GeometryProfile,
        target: TargetAppDescriptor,
        request: MessageRequest,
        timings: Timings,
        log: EventLog,
    }

    impl Rig {
        fn new(script: &[Echo]) -> (Self, ScriptedReadback) {
            let (backend, log) = RecordingBackend::new(1920, 1080);
            let readback = script
                .iter()
                .cloned()
                .fold(ScriptedReadback::new(log.clone()), ScriptedReadback::then);
            let rig = Self {
                input: InputSynthesizer::new(backend, Settle::none()),
                probe: VerificationProbe::new(Some(Arc::new(readback.clone())), ProbeConfig::default()),
                locator: AppLocator::new(FakeDesktop::new()),
                geometry: geometry::resolve(1920, 1080),
                target: TargetAppDescriptor::whatsapp(),
                request: MessageRequest::new("Alice", "hi"),
                timings: Timings::instant(),
                log,
            };
            (rig, readback)
        }

        fn without_readback() -> Self {
            let (mut rig, _) = Self::new(&[]);
            rig.probe = VerificationProbe::new(None, ProbeConfig::default());
            rig
        }

        fn context(&self) -> DriveContext<'_> {
            DriveContext {
                input: &self.input,
                probe: &self.probe,
                locator: &self.locator,
                geometry: &self.geometry,
                target: &self.target,
                request: &self.request,
                timings: &self.timings,
                install_path: None,
            }
        }

        fn executor(&self) -> StepExecutor<'_> {
            StepExecutor::new(self.context())
        }
    }

    fn echo_click(name: &str, at: Anchor) -> Strategy {
        Strategy::new(name, vec![Action::Click { at }], Verify::Echo)
    }

    fn step(strategies: Vec<Strategy>, cycles: u32) -> UIGoalStep {
        UIGoalStep {
            goal: Goal::MessageInputFocused,
            strategies,
            cycles,
        }
    }

    #[tokio::test]
    async fn test_stops_at_first_confirmed() {
        let (rig, readback) = Rig::new(&[Echo::WithPrefix("Alice".into()), Echo::Typed]);
        let chain = step(
            vec![
                echo_click("a", Anchor::MessageInput),
                echo_click("b", Anchor::ChatArea),
                echo_click("c", Anchor::SendButton),
            ],
            3,
        );

        let outcome = rig.executor().run(&chain).await;

        assert_eq!(outcome.result.verdict, Verdict::Confirmed);
        assert!(!outcome.degraded);
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].result.verdict, Verdict::Failed);
        assert_eq!(readback.probe_count(), 2);
    }

    #[tokio::test]
    async fn test_all_unconfirmed_runs_each_strategy_once_per_cycle() {
        let rig = Rig::without_readback();
        let chain = step(
            vec![
                echo_click("a", Anchor::MessageInput),
                echo_click("b", Anchor::MessageInputRaised(1)),
                echo_click("c", Anchor::ChatArea),
            ],
            2,
        );

        let outcome = rig.executor().run(&chain).await;

        assert_eq!(outcome.result.verdict, Verdict::Unconfirmed);
        assert!(outcome.degraded);
        assert_eq!(outcome.attempts.len(), 6);
        let names: Vec<_> = outcome.attempts.iter().map(|a| a.strategy.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "a", "b", "c"]);
        let clicks = rig
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, InputEvent::Click(_)))
            .count();
        assert_eq!(clicks, 6);
    }

    #[tokio::test]
    async fn test_never_confirms_without_a_confirmed_probe() {
        let (rig, _) = Rig::new(&[Echo::Nothing, Echo::Text("noise".into())]);
        let chain = step(vec![echo_click("a", Anchor::MessageInput), echo_click("b", Anchor::ChatArea)], 1);

        let outcome = rig.executor().run(&chain).await;

        assert_eq!(outcome.result.verdict, Verdict::Failed);
        assert!(outcome.attempts.iter().all(|a| !a.result.is_confirmed()));
        assert!(outcome.attempts[1].result.evidence_or_none().contains("marker missing"));
    }

    #[tokio::test]
    async fn test_action_errors_become_failed_results() {
        let rig = Rig::without_readback();
        let chain = step(vec![Strategy::new("relaunch", vec![Action::Relaunch], Verify::None)], 1);

        let outcome = rig.executor().run(&chain).await;

        assert_eq!(outcome.result.verdict, Verdict::Failed);
        assert!(outcome.result.evidence_or_none().contains("install path unknown"));
    }

    #[tokio::test]
    async fn test_spawn_error_is_reported_as_launch_failure() {
        let (mut rig, _) = Rig::new(&[]);
        let desktop = FakeDesktop::new();
        desktop.fail_spawns();
        rig.locator = AppLocator::new(desktop.clone());
        rig.probe = VerificationProbe::new(None, ProbeConfig::default());
        let path = PathBuf::from("/opt/whatsapp/whatsapp");
        let executor = StepExecutor::new(DriveContext {
            install_path: Some(&path),
            ..rig.context()
        });
        let chain = step(vec![Strategy::new("relaunch", vec![Action::Relaunch], Verify::None)], 1);

        let outcome = executor.run(&chain).await;

        assert_eq!(outcome.result.verdict, Verdict::Failed);
        assert!(outcome.launch_failed);
        assert_eq!(desktop.spawned().len(), 1);

        // a missing install path is not a failed launch
        let outcome = rig.executor().run(&chain).await;
        assert!(!outcome.launch_failed);
    }

    #[tokio::test]
    async fn test_empty_chain_is_unconfirmed() {
        let rig = Rig::without_readback();
        let outcome = rig.executor().run(&step(vec![], 3)).await;
        assert_eq!(outcome.result.verdict, Verdict::Unconfirmed);
        assert!(outcome.attempts.is_empty());
    }

    #[tokio::test]
    async fn test_type_action_uses_request_text() {
        let rig = Rig::without_readback();
        rig.executor()
            .perform(&Action::Type { text: TextSource::Contact })
            .await
            .unwrap();
        let typed: String = rig
            .log
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                InputEvent::Text(t) => Some(t.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(typed, "Alice");
    }

    #[test]
    fn test_guidance_deduplicates_cycles() {
        let record = |cycle| AttemptRecord {
            strategy: "tab".into(),
            actions: "tab x2".into(),
            cycle,
            result: VerificationResult::unconfirmed("x"),
        };
        let outcome = StepOutcome {
            goal: Goal::MessageInputFocused,
            result: VerificationResult::unconfirmed("x"),
            attempts: vec![record(1), record(2)],
            degraded: true,
            launch_failed: false,
        };
        assert_eq!(outcome.guidance(), vec!["tab: tab x2".to_string()]);
    }
}
