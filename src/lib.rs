//! Courier - deliver a chat message through a desktop app that exposes no API.
//!
//! The target app is driven purely by synthesized mouse and keyboard input.
//! Every UI step is a goal with a fallback chain of strategies, and every
//! strategy is followed by an indirect probe, because the app cannot be
//! asked where focus is.

pub mod cache;
pub mod config;
pub mod drive;
pub mod geometry;
pub mod input;
pub mod intervention;
pub mod locator;
pub mod permissions;
pub mod status;
pub mod target;

#[cfg(test)]
mod testing;

pub use config::CourierConfig;
pub use drive::orchestrator::{DeliveryFailure, Orchestrator, SendReport, SharedOrchestrator};
pub use drive::{DeliveryError, Goal, Verdict};
pub use status::{get_status, AppStatus, StatusReport};
pub use target::{MessageRequest, TargetAppDescriptor};
