//! Per-message session state.
//!
//! One `SessionState` per `send_message` call, owned by the orchestrator and
//! dropped when the call returns. It carries the phase, retry counters and a
//! timestamped diagnostic log that ends up in the report or failure.

use super::executor::StepOutcome;
use super::{Goal, VerificationResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Idle,
    Locating,
    Launching,
    WindowFocusing,
    SearchOpening,
    ContactSelecting,
    SearchExiting,
    InputFocusing,
    Typing,
    Sending,
    /// Automation gave up on this goal; waiting for a human.
    AwaitingIntervention(Goal),
    Sent,
    Failed,
}

impl Phase {
    /// Goal a UI-driving phase works toward.
    pub fn goal(self) -> Option<Goal> {
        match self {
            Phase::WindowFocusing => Some(Goal::WindowFocused),
            Phase::SearchOpening => Some(Goal::SearchOpen),
            Phase::ContactSelecting => Some(Goal::ContactSelected),
            Phase::SearchExiting => Some(Goal::SearchClosed),
            Phase::InputFocusing => Some(Goal::MessageInputFocused),
            Phase::Typing => Some(Goal::MessageTyped),
            Phase::Sending => Some(Goal::MessageSent),
            _ => None,
        }
    }

    pub fn for_goal(goal: Goal) -> Phase {
        match goal {
            Goal::WindowFocused => Phase::WindowFocusing,
            Goal::SearchOpen => Phase::SearchOpening,
            Goal::ContactSelected => Phase::ContactSelecting,
            Goal::SearchClosed => Phase::SearchExiting,
            Goal::MessageInputFocused => Phase::InputFocusing,
            Goal::MessageTyped => Phase::Typing,
            Goal::MessageSent => Phase::Sending,
        }
    }

    /// Next phase on the happy path.
    pub fn successor(self) -> Phase {
        match self {
            Phase::Idle => Phase::Locating,
            Phase::Locating => Phase::Launching,
            Phase::Launching => Phase::WindowFocusing,
            Phase::WindowFocusing => Phase::SearchOpening,
            Phase::SearchOpening => Phase::ContactSelecting,
            Phase::ContactSelecting => Phase::SearchExiting,
            Phase::SearchExiting => Phase::InputFocusing,
            Phase::InputFocusing => Phase::Typing,
            Phase::Typing => Phase::Sending,
            Phase::Sending => Phase::Sent,
            Phase::AwaitingIntervention(goal) => Phase::for_goal(goal).successor(),
            Phase::Sent => Phase::Sent,
            Phase::Failed => Phase::Failed,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Sent | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::AwaitingIntervention(goal) => write!(f, "AwaitingIntervention({})", goal),
            other => write!(f, "{:?}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryLevel {
    Info,
    Warn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub phase: Phase,
    pub level: EntryLevel,
    pub message: String,
}

pub struct SessionState {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub phase: Phase,
    pub last_result: Option<VerificationResult>,
    /// Strategy attempts spent per goal.
    pub retries: HashMap<Goal, u32>,
    pub log: Vec<LogEntry>,
    pub warnings: Vec<String>,
    /// Set once anything was carried forward without confirmation.
    pub degraded: bool,
    trace: Vec<Phase>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            phase: Phase::Idle,
            last_result: None,
            retries: HashMap::new(),
            log: Vec::new(),
            warnings: Vec::new(),
            degraded: false,
            trace: vec![Phase::Idle],
        }
    }

    pub fn enter(&mut self, phase: Phase) {
        if phase == self.phase {
            return;
        }
        log::info!("[session] {} -> {}", self.phase, phase);
        self.phase = phase;
        self.trace.push(phase);
    }

    pub fn trace(&self) -> &[Phase] {
        &self.trace
    }

    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::info!("[session] {}", message);
        self.push(EntryLevel::Info, message);
    }

    /// Record a non-fatal problem and mark the session degraded.
    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("[session] {}", message);
        self.degraded = true;
        self.warnings.push(message.clone());
        self.push(EntryLevel::Warn, message);
    }

    fn push(&mut self, level: EntryLevel, message: String) {
        self.log.push(LogEntry {
            at: Utc::now(),
            phase: self.phase,
            level,
            message,
        });
    }

    pub fn record(&mut self, outcome: &StepOutcome) {
        *self.retries.entry(outcome.goal).or_insert(0) += outcome.attempts.len() as u32;
        for attempt in &outcome.attempts {
            self.note(format!(
                "{} / {} (pass {}): {:?} - {}",
                outcome.goal,
                attempt.strategy,
                attempt.cycle,
                attempt.result.verdict,
                attempt.result.evidence_or_none()
            ));
        }
        self.last_result = Some(outcome.result.clone());
    }

    /// What was attempted and what was observed, for humans.
    pub fn diagnostic(&self) -> String {
        let trace = self
            .trace
            .iter()
            .map(Phase::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");

        let mut lines = vec![
            format!("session {} started {}", self.id, self.started_at.to_rfc3339()),
            format!("phases: {}", trace),
        ];
        if let Some(result) = &self.last_result {
            lines.push(format!("last observation: {:?} - {}", result.verdict, result.evidence_or_none()));
        }
        for entry in &self.log {
            let level = match entry.level {
                EntryLevel::Info => "info",
                EntryLevel::Warn => "warn",
            };
            lines.push(format!(
                "{} [{}] {}: {}",
                entry.at.format("%H:%M:%S%.3f"),
                level,
                entry.phase,
                entry.message
            ));
        }
        lines.join("\n")
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}
