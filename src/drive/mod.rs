//! UI-Drive core - goals, strategies, verdicts
//!
//! The opaque target app gives us no way to ask where focus is. Everything
//! in this module is built around that:
//! - Strategies: declarative click/key sequences toward one goal
//! - Probe: indirect, three-valued check that a goal was reached
//! - Executor: runs a strategy chain until something is confirmed
//! - Search exit: dedicated loop for leaving the search overlay
//! - Orchestrator: the per-message state machine on top

pub mod executor;
pub mod orchestrator;
pub mod plan;
pub mod probe;
pub mod search_exit;
pub mod session;

use crate::geometry::Anchor;
use crate::input::KeyChord;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A UI state we try to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Goal {
    WindowFocused,
    SearchOpen,
    ContactSelected,
    SearchClosed,
    MessageInputFocused,
    MessageTyped,
    MessageSent,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Goal::WindowFocused => "WindowFocused",
            Goal::SearchOpen => "SearchOpen",
            Goal::ContactSelected => "ContactSelected",
            Goal::SearchClosed => "SearchClosed",
            Goal::MessageInputFocused => "MessageInputFocused",
            Goal::MessageTyped => "MessageTyped",
            Goal::MessageSent => "MessageSent",
        };
        f.write_str(name)
    }
}

/// Text a `Type` action emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TextSource {
    /// The request's contact name, typed at contact speed.
    Contact,
    /// The request's message body, typed at body speed.
    Body,
    Literal(String),
}

/// One primitive step of a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "camelCase")]
pub enum Action {
    Click { at: Anchor },
    Key { chord: KeyChord },
    Repeat { chord: KeyChord, times: u32 },
    /// Tab `times` times from wherever focus currently is.
    TabNavigate { times: u32 },
    Type { text: TextSource },
    Pause { ms: u64 },
    /// Start the installed executable again; single-instance apps raise their window.
    Relaunch,
    /// Click the title bar of the target's visible window.
    ClickWindow,
}

impl Action {
    /// Plain-language form, used in intervention guidance.
    pub fn describe(&self) -> String {
        match self {
            Action::Click { at } => format!("click {:?}", at),
            Action::Key { chord } => format!("press {}", chord),
            Action::Repeat { chord, times } => format!("press {} x{}", chord, times),
            Action::TabNavigate { times } => format!("tab x{}", times),
            Action::Type { text: TextSource::Contact } => "type the contact name".to_string(),
            Action::Type { text: TextSource::Body } => "type the message".to_string(),
            Action::Type { text: TextSource::Literal(text) } => format!("type {:?}", text),
            Action::Pause { ms } => format!("wait {}ms", ms),
            Action::Relaunch => "relaunch the app".to_string(),
            Action::ClickWindow => "click the window title bar".to_string(),
        }
    }
}

/// Which probe runs after a strategy's actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verify {
    /// No observation possible, always Unconfirmed.
    #[default]
    None,
    /// Type a marker and read it back from the focused field.
    Echo,
    /// Focused field no longer holds the message.
    FieldEmpty,
    /// Focused field holds exactly the message.
    FieldHoldsMessage,
    /// Frontmost window belongs to the target.
    WindowForeground,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Strategy {
    pub name: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub verify: Verify,
}

impl Strategy {
    pub fn new(name: impl Into<String>, actions: Vec<Action>, verify: Verify) -> Self {
        Self {
            name: name.into(),
            actions,
            verify,
        }
    }
}

/// A goal plus its ordered fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UIGoalStep {
    pub goal: Goal,
    pub strategies: Vec<Strategy>,
    /// Passes over the whole chain before giving up. Always at least one.
    pub cycles: u32,
}

/// Three-valued probe outcome, ordered worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Failed,
    Unconfirmed,
    Confirmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verdict: Verdict,
    /// What the probe actually saw (echoed text, window title, error).
    pub evidence: Option<String>,
}

impl VerificationResult {
    pub fn confirmed(evidence: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Confirmed,
            evidence: Some(evidence.into()),
        }
    }

    pub fn unconfirmed(evidence: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Unconfirmed,
            evidence: Some(evidence.into()),
        }
    }

    pub fn failed(evidence: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Failed,
            evidence: Some(evidence.into()),
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.verdict == Verdict::Confirmed
    }

    pub fn evidence_or_none(&self) -> &str {
        self.evidence.as_deref().unwrap_or("no evidence")
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("{0} is not installed")]
    NotInstalled(String),
    #[error("Failed to launch {app}: {reason}")]
    LaunchFailed { app: String, reason: String },
    #[error("{0} is running but has no visible window")]
    WindowNotFound(String),
    #[error("Could not confirm {goal}; continuing with degraded confidence")]
    VerificationUnconfirmed { goal: Goal },
    #[error("Verification of {goal} failed: {evidence}")]
    VerificationFailed { goal: Goal, evidence: String },
    #[error("Retry budget exhausted for {goal}")]
    RetryBudgetExhausted { goal: Goal },
    #[error("Message was typed but there is no evidence it was sent")]
    SendFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_ordering_picks_best() {
        let best = [Verdict::Failed, Verdict::Unconfirmed, Verdict::Failed]
            .into_iter()
            .max();
        assert_eq!(best, Some(Verdict::Unconfirmed));
        assert!(Verdict::Confirmed > Verdict::Unconfirmed);
    }

    #[test]
    fn test_strategy_deserialises_from_config_json() {
        let json = r#"{
            "name": "raised input",
            "actions": [
                {"do": "click", "at": {"message-input-raised": 2}},
                {"do": "repeat", "chord": "escape", "times": 3},
                {"do": "type", "text": {"literal": "x"}},
                {"do": "relaunch"}
            ],
            "verify": "echo"
        }"#;
        let strategy: Strategy = serde_json::from_str(json).unwrap();
        assert_eq!(strategy.verify, Verify::Echo);
        assert_eq!(
            strategy.actions,
            vec![
                Action::Click { at: Anchor::MessageInputRaised(2) },
                Action::Repeat { chord: KeyChord::key(crate::input::KeyCode::Escape), times: 3 },
                Action::Type { text: TextSource::Literal("x".into()) },
                Action::Relaunch,
            ]
        );
    }

    #[test]
    fn test_verify_defaults_to_none() {
        let strategy: Strategy = serde_json::from_str(r#"{"name": "n", "actions": []}"#).unwrap();
        assert_eq!(strategy.verify, Verify::None);
    }
}
