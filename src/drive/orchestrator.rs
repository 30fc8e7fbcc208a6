//! Message-Delivery Orchestrator - one message, start to finish.
//!
//! ```text
//! Idle -> Locating -> Launching -> WindowFocusing -> SearchOpening -> ContactSelecting
//!      -> SearchExiting -> InputFocusing -> Typing -> Sending -> Sent
//! ```
//!
//! `Confirmed` and `Unconfirmed` both advance (the latter with a warning).
//! `Failed` parks the session in `AwaitingIntervention` until a human
//! acknowledges, declines, or the wait times out. Locating and launching
//! failures end the session directly.

use super::executor::{DriveContext, StepExecutor, StepOutcome};
use super::plan;
use super::probe::VerificationProbe;
use super::session::{LogEntry, Phase, SessionState};
use super::{DeliveryError, Goal, Verdict};
use crate::cache::PathCache;
use crate::config::CourierConfig;
use crate::geometry::{self, GeometryProfile};
use crate::input::{DryRunBackend, EnigoBackend, InputSynthesizer};
use crate::intervention::{InterventionChannel, InterventionReply, InterventionRequest};
use crate::locator::{AppLocator, NativeDesktop};
use crate::target::MessageRequest;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Next phase after a step reported `verdict`.
pub fn on_verdict(phase: Phase, verdict: Verdict) -> Phase {
    match (phase, verdict) {
        (Phase::Sent, _) => Phase::Sent,
        (Phase::Failed, _) => Phase::Failed,
        (Phase::Locating | Phase::Launching, Verdict::Failed) => Phase::Failed,
        (Phase::AwaitingIntervention(_), Verdict::Failed) => Phase::Failed,
        (Phase::Idle, Verdict::Failed) => Phase::Failed,
        (phase, Verdict::Failed) => match phase.goal() {
            Some(goal) => Phase::AwaitingIntervention(goal),
            None => Phase::Failed,
        },
        (phase, Verdict::Confirmed | Verdict::Unconfirmed) => phase.successor(),
    }
}

/// Next phase after a human answered for `goal`. Acknowledged resumes degraded.
pub fn on_intervention(goal: Goal, reply: InterventionReply) -> Phase {
    let verdict = match reply {
        InterventionReply::Acknowledged => Verdict::Unconfirmed,
        InterventionReply::Declined => Verdict::Failed,
    };
    on_verdict(Phase::AwaitingIntervention(goal), verdict)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendReport {
    pub session_id: Uuid,
    /// Some step was carried forward without confirmation.
    pub degraded: bool,
    pub warnings: Vec<String>,
    pub trace: Vec<Phase>,
    pub log: Vec<LogEntry>,
}

/// Caller-visible `Failed(reason)`.
#[derive(Error, Debug, Clone)]
#[error("{error}")]
pub struct DeliveryFailure {
    pub error: DeliveryError,
    /// What was attempted and observed, one line per event.
    pub diagnostic: String,
    pub trace: Vec<Phase>,
}

pub struct Orchestrator {
    config: CourierConfig,
    input: InputSynthesizer,
    locator: AppLocator,
    probe: VerificationProbe,
    intervention: Box<dyn InterventionChannel>,
}

/// Serialises callers: a second send waits for the first to finish.
pub type SharedOrchestrator = Arc<tokio::sync::Mutex<Orchestrator>>;

impl Orchestrator {
    pub fn new(
        config: CourierConfig,
        input: InputSynthesizer,
        locator: AppLocator,
        probe: VerificationProbe,
        intervention: Box<dyn InterventionChannel>,
    ) -> Self {
        Self {
            config,
            input,
            locator,
            probe,
            intervention,
        }
    }

    /// Wire the real desktop: enigo input (or a logging stand-in), sysinfo/xcap
    /// locator with the persisted cache, and the configured readback.
    pub fn from_config(config: CourierConfig, intervention: Box<dyn InterventionChannel>, dry_run: bool) -> Self {
        let settle = config.timings.settle();
        let input = if dry_run {
            InputSynthesizer::new(DryRunBackend::new(1920, 1080), settle)
        } else {
            InputSynthesizer::new(EnigoBackend, settle)
        };

        let mut locator = AppLocator::new(NativeDesktop);
        if config.cache.enabled {
            let path = config.cache.resolved_path();
            match PathCache::open(&path) {
                Ok(cache) => locator = locator.with_cache(cache),
                Err(e) => log::warn!("[orchestrator] Path cache disabled ({}): {}", path.display(), e),
            }
        }

        let probe = VerificationProbe::from_config(config.probe.clone());
        Self::new(config, input, locator, probe, intervention)
    }

    pub fn shared(self) -> SharedOrchestrator {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn locator(&self) -> &AppLocator {
        &self.locator
    }

    /// Deliver one message. Takes `&mut self`, so sessions never overlap.
    pub async fn send_message(&mut self, request: &MessageRequest) -> Result<SendReport, DeliveryFailure> {
        let mut session = SessionState::new();
        session.note(format!("Delivering message to {:?} via {}", request.contact, self.config.target.name));

        if !self.probe.has_readback() {
            session.note("No readback channel; focus checks cannot confirm");
        }
        let geometry = self.resolve_geometry(&mut session).await;
        let mut install: Option<PathBuf> = None;

        loop {
            let next = match session.phase {
                Phase::Idle => Phase::Locating,
                Phase::Locating => match self.locate(&mut session) {
                    Ok((next, path)) => {
                        install = path;
                        next
                    }
                    Err(error) => return Err(Self::fail(&mut session, error)),
                },
                Phase::Launching => match self.launch(&mut session, install.as_deref()).await {
                    Ok(()) => Phase::WindowFocusing,
                    Err(error) => return Err(Self::fail(&mut session, error)),
                },
                Phase::AwaitingIntervention(goal) => {
                    let reply = self.intervene(&mut session, goal, request).await;
                    let next = on_intervention(goal, reply);
                    if next == Phase::Failed {
                        return Err(Self::fail(&mut session, exhausted(goal)));
                    }
                    session.warn(format!("Resuming after manual help with {}", goal));
                    next
                }
                Phase::Sent => {
                    session.note("Message sent");
                    return Ok(SendReport {
                        session_id: session.id,
                        degraded: session.degraded,
                        warnings: session.warnings.clone(),
                        trace: session.trace().to_vec(),
                        log: session.log,
                    });
                }
                // `fail` returns before the loop ever sees this phase
                Phase::Failed => {
                    let error = failure_after(session.trace());
                    return Err(Self::fail(&mut session, error));
                }
                phase => match phase.goal() {
                    Some(goal) => {
                        let outcome = self.drive(goal, &geometry, request, install.as_deref(), &mut session).await;
                        session.record(&outcome);
                        if outcome.launch_failed {
                            session.warn(format!("Relaunching {} failed; install path forgotten", self.config.target.name));
                            self.locator.invalidate(&self.config.target);
                            install = None;
                        }
                        match outcome.result.verdict {
                            Verdict::Confirmed => {}
                            Verdict::Unconfirmed => session.warn(DeliveryError::VerificationUnconfirmed { goal }.to_string()),
                            Verdict::Failed => session.warn(
                                DeliveryError::VerificationFailed {
                                    goal,
                                    evidence: outcome.result.evidence_or_none().to_string(),
                                }
                                .to_string(),
                            ),
                        }
                        self.stash_guidance(&mut session, &outcome);
                        on_verdict(phase, outcome.result.verdict)
                    }
                    None => Phase::Failed,
                },
            };
            session.enter(next);
        }
    }

    async fn resolve_geometry(&self, session: &mut SessionState) -> GeometryProfile {
        let (width, height) = match self.input.display_size().await {
            Ok(size) => size,
            Err(e) => {
                session.warn(format!("Display size unavailable ({}); anchors will collapse", e));
                (0, 0)
            }
        };
        let profile = geometry::resolve(width, height);
        if profile.is_low_confidence() {
            session.warn(format!(
                "Screen {}x{} is outside the tuned layout ({:?}); clicks may miss",
                width, height, profile.confidence
            ));
        }
        profile
    }

    /// Already up with a window: skip launching. Otherwise find the install.
    fn locate(&mut self, session: &mut SessionState) -> Result<(Phase, Option<PathBuf>), DeliveryError> {
        let target = &self.config.target;
        let running = self.locator.is_running(target);

        if running && self.locator.find_window(target).is_some() {
            session.note(format!("{} is already running with a visible window", target.name));
            return Ok((Phase::WindowFocusing, self.locator.locate_installation(target)));
        }

        match self.locator.locate_installation(target) {
            Some(path) => {
                session.note(format!("Found {} at {}", target.name, path.display()));
                Ok((Phase::Launching, Some(path)))
            }
            None if running => {
                session.note(format!("{} is running but its install path is unknown", target.name));
                Ok((Phase::Launching, None))
            }
            None => Err(DeliveryError::NotInstalled(target.name.clone())),
        }
    }

    async fn launch(&mut self, session: &mut SessionState, install: Option<&Path>) -> Result<(), DeliveryError> {
        let target = self.config.target.clone();
        let timings = self.config.timings.clone();
        let poll = Duration::from_millis(timings.poll_interval_ms);

        if let Some(path) = install {
            session.note(format!("Launching {}", path.display()));
            if let Err(e) = self.locator.spawn(path) {
                self.locator.invalidate(&target);
                return Err(DeliveryError::LaunchFailed {
                    app: target.name,
                    reason: e.to_string(),
                });
            }
        }

        let started = self
            .locator
            .poll_until(Duration::from_millis(timings.launch_timeout_ms), poll, |l| l.is_running(&target))
            .await;
        if !started {
            self.locator.invalidate(&target);
            return Err(DeliveryError::LaunchFailed {
                app: target.name,
                reason: format!("no matching process after {}ms", timings.launch_timeout_ms),
            });
        }

        let visible = self
            .locator
            .poll_until(Duration::from_millis(timings.window_timeout_ms), poll, |l| {
                l.find_window(&target).is_some()
            })
            .await;
        if !visible {
            return Err(DeliveryError::WindowNotFound(target.name));
        }

        tokio::time::sleep(Duration::from_millis(timings.post_launch_ms)).await;
        session.note(format!("{} is up", target.name));
        Ok(())
    }

    async fn drive(
        &self,
        goal: Goal,
        geometry: &GeometryProfile,
        request: &MessageRequest,
        install: Option<&Path>,
        session: &mut SessionState,
    ) -> StepOutcome {
        let executor = StepExecutor::new(DriveContext {
            input: &self.input,
            probe: &self.probe,
            locator: &self.locator,
            geometry,
            target: &self.config.target,
            request,
            timings: &self.config.timings,
            install_path: install,
        });

        if goal == Goal::SearchClosed {
            let outcome = plan::search_exit(&self.config).run(&executor).await;
            session.note(format!("Search exit: {}", outcome.trace_string()));
            outcome.step
        } else {
            executor.run(&plan::step(goal, &self.config)).await
        }
    }

    fn stash_guidance(&self, session: &mut SessionState, outcome: &StepOutcome) {
        if outcome.result.verdict == Verdict::Failed {
            for line in outcome.guidance() {
                session.note(format!("Tried: {}", line));
            }
        }
    }

    async fn intervene(&self, session: &mut SessionState, goal: Goal, request: &MessageRequest) -> InterventionReply {
        if !self.config.intervention.enabled {
            session.note("Manual intervention disabled");
            return InterventionReply::Declined;
        }

        let step = plan::step(goal, &self.config);
        let guidance = step
            .strategies
            .iter()
            .map(|s| {
                let actions = s.actions.iter().map(super::Action::describe).collect::<Vec<_>>();
                if actions.is_empty() {
                    s.name.clone()
                } else {
                    format!("{}: {}", s.name, actions.join(", "))
                }
            })
            .collect();

        let req = InterventionRequest {
            goal,
            instruction: instruction_for(goal, &self.config.target.name, request),
            guidance,
            observed: session.last_result.as_ref().and_then(|r| r.evidence.clone()),
        };
        session.note(format!("Asking for manual help: {}", req.instruction));

        match tokio::time::timeout(self.config.intervention.timeout(), self.intervention.request(&req)).await {
            Ok(reply) => {
                session.note(format!("Manual intervention reply: {:?}", reply));
                reply
            }
            Err(_) => {
                session.note(format!(
                    "No reply within {}s",
                    self.config.intervention.timeout_secs
                ));
                InterventionReply::Declined
            }
        }
    }

    fn fail(session: &mut SessionState, error: DeliveryError) -> DeliveryFailure {
        log::error!("[orchestrator] Delivery failed in {}: {}", session.phase, error);
        session.note(format!("Failed: {}", error));
        session.enter(Phase::Failed);
        DeliveryFailure {
            error,
            diagnostic: session.diagnostic(),
            trace: session.trace().to_vec(),
        }
    }
}

/// Terminal error once a human declined help with `goal`.
fn exhausted(goal: Goal) -> DeliveryError {
    match goal {
        Goal::MessageSent => DeliveryError::SendFailed,
        goal => DeliveryError::RetryBudgetExhausted { goal },
    }
}

/// Error for a run that stopped in `Failed` without one: blame the last goal driven.
fn failure_after(trace: &[Phase]) -> DeliveryError {
    let goal = trace.iter().rev().find_map(|phase| phase.goal()).unwrap_or(Goal::WindowFocused);
    exhausted(goal)
}

fn instruction_for(goal: Goal, app: &str, request: &MessageRequest) -> String {
    match goal {
        Goal::WindowFocused => format!("Bring the {} window to the front", app),
        Goal::SearchOpen => format!("Open the chat search box in {}", app),
        Goal::ContactSelected => format!("Open the chat with {}", request.contact),
        Goal::SearchClosed => "Close the search panel so the chat is showing".to_string(),
        Goal::MessageInputFocused => format!("Click into the message box of the chat with {}", request.contact),
        Goal::MessageTyped => format!("Type the message into the message box: {}", request.body),
        Goal::MessageSent => "Press Enter to send the message".to_string(),
    }
}
