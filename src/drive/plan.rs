//! Built-in strategy chains per goal, replaceable from config.

use super::search_exit::SearchExitProtocol;
use super::{Action, Goal, Strategy, TextSource, UIGoalStep, Verify};
use crate::config::CourierConfig;
use crate::geometry::Anchor;
use crate::input::{KeyChord, KeyCode, Modifier};

fn key(chord: KeyChord) -> Action {
    Action::Key { chord }
}

fn click(at: Anchor) -> Action {
    Action::Click { at }
}

pub fn default_strategies(goal: Goal, config: &CourierConfig) -> Vec<Strategy> {
    let timings = &config.timings;
    let tabs = config.search_exit.tab_presses.max(1);

    match goal {
        Goal::WindowFocused => vec![
            Strategy::new("already-frontmost", vec![], Verify::WindowForeground),
            Strategy::new("click-title-bar", vec![Action::ClickWindow], Verify::WindowForeground),
            Strategy::new("relaunch", vec![Action::Relaunch], Verify::WindowForeground),
            Strategy::new(
                "alt-tab",
                vec![
                    key(KeyChord::with(Modifier::Alt, KeyCode::Tab)),
                    Action::Pause { ms: timings.after_click_ms },
                ],
                Verify::WindowForeground,
            ),
        ],
        Goal::SearchOpen => vec![
            // clears a stale or half-open search before opening a fresh one
            Strategy::new(
                "reset-search",
                vec![
                    key(KeyChord::primary('f')),
                    key(KeyChord::primary('a')),
                    key(KeyChord::key(KeyCode::Delete)),
                    key(KeyChord::key(KeyCode::Escape)),
                    key(KeyChord::primary('f')),
                    Action::Pause { ms: timings.after_click_ms },
                ],
                Verify::Echo,
            ),
            Strategy::new(
                "find-shortcut",
                vec![
                    key(KeyChord::primary('f')),
                    key(KeyChord::primary('a')),
                    key(KeyChord::key(KeyCode::Delete)),
                ],
                Verify::Echo,
            ),
            Strategy::new(
                "click-search-box",
                vec![
                    click(Anchor::SearchBox),
                    key(KeyChord::primary('a')),
                    key(KeyChord::key(KeyCode::Delete)),
                ],
                Verify::Echo,
            ),
        ],
        Goal::ContactSelected => vec![
            Strategy::new(
                "type-and-pick-first",
                vec![
                    Action::Type { text: TextSource::Contact },
                    Action::Pause { ms: timings.search_results_ms },
                    key(KeyChord::key(KeyCode::Down)),
                    key(KeyChord::key(KeyCode::Enter)),
                    Action::Pause { ms: timings.chat_open_ms },
                ],
                Verify::None,
            ),
            // the list is filtered again first so the top row is the contact
            Strategy::new(
                "click-first-result",
                vec![
                    click(Anchor::SearchBox),
                    key(KeyChord::primary('a')),
                    Action::Type { text: TextSource::Contact },
                    Action::Pause { ms: timings.search_results_ms },
                    click(Anchor::ContactListFirst),
                    Action::Pause { ms: timings.chat_open_ms },
                ],
                Verify::None,
            ),
        ],
        Goal::SearchClosed => search_exit_strategies(config),
        Goal::MessageInputFocused => vec![
            Strategy::new("click-message-input", vec![click(Anchor::MessageInput)], Verify::Echo),
            Strategy::new("click-raised-once", vec![click(Anchor::MessageInputRaised(1))], Verify::Echo),
            Strategy::new("click-raised-twice", vec![click(Anchor::MessageInputRaised(2))], Verify::Echo),
            Strategy::new("tab-navigate", vec![Action::TabNavigate { times: tabs }], Verify::Echo),
            Strategy::new(
                "chat-area-then-tab",
                vec![click(Anchor::ChatArea), key(KeyChord::key(KeyCode::Tab))],
                Verify::Echo,
            ),
        ],
        Goal::MessageTyped => vec![Strategy::new(
            "type-body",
            vec![Action::Type { text: TextSource::Body }],
            Verify::FieldHoldsMessage,
        )],
        Goal::MessageSent => vec![
            Strategy::new("enter", vec![key(KeyChord::key(KeyCode::Enter))], Verify::FieldEmpty),
            Strategy::new("send-button", vec![click(Anchor::SendButton)], Verify::FieldEmpty),
        ],
    }
}

/// Rotation used by the search-exit loop, one entry per retry.
fn search_exit_strategies(config: &CourierConfig) -> Vec<Strategy> {
    let escapes = config.search_exit.escape_presses.max(1);
    let tabs = config.search_exit.tab_presses.max(1);
    let escape = KeyChord::key(KeyCode::Escape);

    vec![
        Strategy::new(
            "escape-burst",
            vec![Action::Repeat { chord: escape.clone(), times: escapes }],
            Verify::Echo,
        ),
        Strategy::new(
            "escape-then-tab",
            vec![key(escape.clone()), Action::TabNavigate { times: tabs }],
            Verify::Echo,
        ),
        Strategy::new(
            "clear-and-toggle",
            vec![
                key(KeyChord::primary('a')),
                key(KeyChord::key(KeyCode::Delete)),
                key(escape.clone()),
                key(KeyChord::primary('f')),
                key(escape),
            ],
            Verify::Echo,
        ),
    ]
}

/// Configured chain for `goal`, falling back to the built-in one.
pub fn strategies(goal: Goal, config: &CourierConfig) -> Vec<Strategy> {
    match config.strategies.get(&goal) {
        Some(custom) if !custom.is_empty() => custom.clone(),
        _ => default_strategies(goal, config),
    }
}

pub fn step(goal: Goal, config: &CourierConfig) -> UIGoalStep {
    UIGoalStep {
        goal,
        strategies: strategies(goal, config),
        cycles: config.retries.for_goal(goal),
    }
}

pub fn search_exit(config: &CourierConfig) -> SearchExitProtocol {
    SearchExitProtocol::new(strategies(Goal::SearchClosed, config), config.search_exit.retry_budget)
}
