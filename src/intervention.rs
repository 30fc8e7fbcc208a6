//! Manual intervention - asking a human to finish the last mile.
//!
//! The orchestrator calls a channel when a step's automated chain is used up.
//! The request carries the same steps the automation tried, so the person
//! can repeat them by hand. Timeouts are enforced by the caller.

use crate::drive::Goal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionRequest {
    pub goal: Goal,
    /// One-line instruction, e.g. "Click into the message box".
    pub instruction: String,
    /// What was attempted, in order.
    pub guidance: Vec<String>,
    /// Last thing the probe observed.
    pub observed: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InterventionReply {
    /// The human fixed the UI state; carry on.
    Acknowledged,
    Declined,
}

#[async_trait]
pub trait InterventionChannel: Send + Sync {
    async fn request(&self, request: &InterventionRequest) -> InterventionReply;
}

/// Prints guidance and waits for a line on stdin.
#[derive(Debug, Default)]
pub struct ConsoleChannel;

#[async_trait]
impl InterventionChannel for ConsoleChannel {
    async fn request(&self, request: &InterventionRequest) -> InterventionReply {
        println!();
        println!("[courier] Manual help needed: {}", request.instruction);
        if !request.guidance.is_empty() {
            println!("[courier] What was tried:");
            for (i, step) in request.guidance.iter().enumerate() {
                println!("  {}. {}", i + 1, step);
            }
        }
        if let Some(observed) = &request.observed {
            println!("[courier] Last observation: {}", observed);
        }
        println!("[courier] Press Enter when done, or type 'n' to give up.");

        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(0) => InterventionReply::Declined,
            Ok(_) => parse_reply(&line),
            Err(e) => {
                log::warn!("[intervention] Could not read stdin: {}", e);
                InterventionReply::Declined
            }
        }
    }
}

fn parse_reply(line: &str) -> InterventionReply {
    match line.trim().to_lowercase().as_str() {
        "" | "y" | "yes" | "ok" | "done" => InterventionReply::Acknowledged,
        _ => InterventionReply::Declined,
    }
}

/// For runs with nobody at the keyboard: log the request and decline.
#[derive(Debug, Default)]
pub struct UnattendedChannel;

#[async_trait]
impl InterventionChannel for UnattendedChannel {
    async fn request(&self, request: &InterventionRequest) -> InterventionReply {
        log::warn!(
            "[intervention] Unattended; declining request for {}: {}",
            request.goal,
            request.instruction
        );
        InterventionReply::Declined
    }
}
