//! Search-Exit Protocol - leave the search overlay for the chat view.
//!
//! ```text
//! SearchActive -> Escaping -> ClickingChatArea -> Verifying -> SearchClosed
//!      ^                                              |
//!      +------------- retry, next strategy -----------+--> SearchClosedUnconfirmed
//! ```
//!
//! Each retry uses the next strategy in rotation. Running out of retries is
//! not an error: the caller continues with degraded confidence.

use super::executor::{AttemptRecord, StepExecutor, StepOutcome};
use super::{Action, Goal, Strategy, VerificationResult};
use crate::geometry::Anchor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchExitState {
    SearchActive,
    Escaping,
    ClickingChatArea,
    Verifying,
    SearchClosed,
    SearchClosedUnconfirmed,
}

#[derive(Debug, Clone)]
pub struct SearchExitOutcome {
    /// Either `SearchClosed` or `SearchClosedUnconfirmed`.
    pub state: SearchExitState,
    pub trace: Vec<SearchExitState>,
    pub step: StepOutcome,
}

impl SearchExitOutcome {
    pub fn trace_string(&self) -> String {
        self.trace
            .iter()
            .map(|s| format!("{:?}", s))
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

pub struct SearchExitProtocol {
    strategies: Vec<Strategy>,
    retry_budget: u32,
}

impl SearchExitProtocol {
    pub fn new(strategies: Vec<Strategy>, retry_budget: u32) -> Self {
        let strategies = if strategies.is_empty() {
            vec![Strategy::new(
                "escape",
                vec![Action::Key { chord: crate::input::KeyChord::key(crate::input::KeyCode::Escape) }],
                super::Verify::Echo,
            )]
        } else {
            strategies
        };
        Self {
            strategies,
            retry_budget: retry_budget.max(1),
        }
    }

    fn strategy_for(&self, attempt: u32) -> &Strategy {
        &self.strategies[attempt as usize % self.strategies.len()]
    }

    pub async fn run(&self, executor: &StepExecutor<'_>) -> SearchExitOutcome {
        let mut trace = vec![SearchExitState::SearchActive];
        let mut attempts = Vec::new();
        let mut best: Option<VerificationResult> = None;

        for attempt in 0..self.retry_budget {
            let strategy = self.strategy_for(attempt);

            trace.push(SearchExitState::Escaping);
            let result = match executor.perform_all(&strategy.actions).await {
                Err(e) => VerificationResult::failed(format!("{} aborted: {}", strategy.name, e)),
                Ok(()) => {
                    trace.push(SearchExitState::ClickingChatArea);
                    match executor.perform(&Action::Click { at: Anchor::ChatArea }).await {
                        Err(e) => VerificationResult::failed(format!("chat area click failed: {}", e)),
                        Ok(()) => {
                            trace.push(SearchExitState::Verifying);
                            executor.verify(strategy.verify).await
                        }
                    }
                }
            };

            log::info!(
                "[search_exit] Attempt {}/{} via {}: {:?} - {}",
                attempt + 1,
                self.retry_budget,
                strategy.name,
                result.verdict,
                result.evidence_or_none()
            );

            let confirmed = result.is_confirmed();
            if best.as_ref().map_or(true, |b| result.verdict > b.verdict) {
                best = Some(result.clone());
            }
            attempts.push(AttemptRecord {
                strategy: strategy.name.clone(),
                actions: format!(
                    "{}, then click the chat area",
                    strategy.actions.iter().map(Action::describe).collect::<Vec<_>>().join(", ")
                ),
                cycle: attempt + 1,
                result,
            });

            if confirmed {
                trace.push(SearchExitState::SearchClosed);
                return SearchExitOutcome {
                    state: SearchExitState::SearchClosed,
                    trace,
                    step: StepOutcome {
                        goal: Goal::SearchClosed,
                        result: best.unwrap_or_else(|| VerificationResult::confirmed("search closed")),
                        attempts,
                        degraded: false,
                        launch_failed: false,
                    },
                };
            }
            if attempt + 1 < self.retry_budget {
                trace.push(SearchExitState::SearchActive);
            }
        }

        log::warn!("[search_exit] Retries exhausted; search state unconfirmed");
        trace.push(SearchExitState::SearchClosedUnconfirmed);

        // exhaustion is a warning state, never Failed
        let observed = best.and_then(|b| b.evidence).unwrap_or_default();
        SearchExitOutcome {
            state: SearchExitState::SearchClosedUnconfirmed,
            trace,
            step: StepOutcome {
                goal: Goal::SearchClosed,
                result: VerificationResult::unconfirmed(format!("search exit unconfirmed; last seen: {}", observed)),
                attempts,
                degraded: true,
                launch_failed: false,
            },
        }
    }
}
