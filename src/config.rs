//! Runtime configuration.
//!
//! Resolution order: built-in defaults, then the JSON file (explicit path or
//! `<data dir>/courier/config.json`), then `COURIER_*` environment overrides.

use crate::drive::{Goal, Strategy};
use crate::input::Settle;
use crate::target::TargetAppDescriptor;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Per-user data directory for the cache database and config file.
pub fn app_data_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    let base = dirs::data_dir();
    #[cfg(not(target_os = "macos"))]
    let base = dirs::data_local_dir();

    base.unwrap_or_else(|| PathBuf::from(".")).join("courier")
}

pub fn default_config_path() -> PathBuf {
    app_data_dir().join("config.json")
}

/// Delays in milliseconds. Scaled together by `COURIER_SETTLE_SCALE`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timings {
    pub after_click_ms: u64,
    pub after_key_ms: u64,
    pub after_text_ms: u64,
    pub contact_char_ms: u64,
    pub body_char_ms: u64,
    /// Wait for the app's search to filter the contact list.
    pub search_results_ms: u64,
    /// Wait for a selected chat to open.
    pub chat_open_ms: u64,
    pub launch_timeout_ms: u64,
    pub window_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub post_launch_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            after_click_ms: 500,
            after_key_ms: 300,
            after_text_ms: 500,
            contact_char_ms: 80,
            body_char_ms: 30,
            search_results_ms: 3000,
            chat_open_ms: 3000,
            launch_timeout_ms: 20_000,
            window_timeout_ms: 10_000,
            poll_interval_ms: 500,
            post_launch_ms: 5000,
        }
    }
}

impl Timings {
    /// Everything zero; used by tests and `geometry` dry runs.
    pub fn instant() -> Self {
        Self {
            after_click_ms: 0,
            after_key_ms: 0,
            after_text_ms: 0,
            contact_char_ms: 0,
            body_char_ms: 0,
            search_results_ms: 0,
            chat_open_ms: 0,
            launch_timeout_ms: 0,
            window_timeout_ms: 0,
            poll_interval_ms: 0,
            post_launch_ms: 0,
        }
    }

    pub fn settle(&self) -> Settle {
        Settle {
            after_click: Duration::from_millis(self.after_click_ms),
            after_key: Duration::from_millis(self.after_key_ms),
            after_text: Duration::from_millis(self.after_text_ms),
        }
    }

    pub fn scale(&mut self, factor: f64) {
        let factor = factor.max(0.0);
        for ms in [
            &mut self.after_click_ms,
            &mut self.after_key_ms,
            &mut self.after_text_ms,
            &mut self.contact_char_ms,
            &mut self.body_char_ms,
            &mut self.search_results_ms,
            &mut self.chat_open_ms,
            &mut self.post_launch_ms,
        ] {
            *ms = (*ms as f64 * factor).round() as u64;
        }
    }
}

/// Chain passes per goal. Goals that type literal text stay at one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryBudgets {
    pub window_focusing: u32,
    pub search_opening: u32,
    pub contact_selecting: u32,
    pub input_focusing: u32,
    pub typing: u32,
    pub sending: u32,
}

impl Default for RetryBudgets {
    fn default() -> Self {
        Self {
            window_focusing: 2,
            search_opening: 2,
            contact_selecting: 1,
            input_focusing: 2,
            typing: 1,
            sending: 1,
        }
    }
}

impl RetryBudgets {
    pub fn for_goal(&self, goal: Goal) -> u32 {
        let cycles = match goal {
            Goal::WindowFocused => self.window_focusing,
            Goal::SearchOpen => self.search_opening,
            Goal::ContactSelected => self.contact_selecting,
            Goal::MessageInputFocused => self.input_focusing,
            Goal::MessageTyped => self.typing,
            Goal::MessageSent => self.sending,
            Goal::SearchClosed => 1,
        };
        cycles.max(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchExitConfig {
    /// Escape presses in the first strategy. At least one is always sent.
    pub escape_presses: u32,
    pub tab_presses: u32,
    pub retry_budget: u32,
}

impl Default for SearchExitConfig {
    fn default() -> Self {
        Self {
            escape_presses: 5,
            tab_presses: 1,
            retry_budget: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadbackKind {
    Clipboard,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProbeConfig {
    pub readback: ReadbackKind,
    pub marker_prefix: String,
    /// Random alphanumeric characters appended to the prefix.
    pub marker_len: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            readback: ReadbackKind::Clipboard,
            marker_prefix: "zq".to_string(),
            marker_len: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InterventionConfig {
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for InterventionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 120,
        }
    }
}

impl InterventionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Defaults to `<data dir>/courier/cache.db`.
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}

impl CacheConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(crate::cache::PathCache::default_path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CourierConfig {
    pub target: TargetAppDescriptor,
    pub timings: Timings,
    pub retries: RetryBudgets,
    pub search_exit: SearchExitConfig,
    pub probe: ProbeConfig,
    pub intervention: InterventionConfig,
    pub cache: CacheConfig,
    /// Replacement strategy chains, keyed by goal.
    pub strategies: HashMap<Goal, Vec<Strategy>>,
}

impl CourierConfig {
    /// Load from `path`, or the default location if none is given.
    /// A missing default file is not an error; a missing explicit one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default = default_config_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Apply `COURIER_*` overrides. `lookup` is the environment in production.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("COURIER_READBACK") {
            match value.trim().to_lowercase().as_str() {
                "clipboard" => self.probe.readback = ReadbackKind::Clipboard,
                "none" | "off" => self.probe.readback = ReadbackKind::None,
                other => log::warn!("[config] Ignoring COURIER_READBACK={}", other),
            }
        }

        if let Some(value) = lookup("COURIER_INTERVENTION_TIMEOUT_SECS") {
            match value.trim().parse() {
                Ok(secs) => self.intervention.timeout_secs = secs,
                Err(_) => log::warn!("[config] Ignoring COURIER_INTERVENTION_TIMEOUT_SECS={}", value),
            }
        }

        if let Some(value) = lookup("COURIER_SETTLE_SCALE") {
            match value.trim().parse::<f64>() {
                Ok(factor) if factor.is_finite() => self.timings.scale(factor),
                _ => log::warn!("[config] Ignoring COURIER_SETTLE_SCALE={}", value),
            }
        }

        if let Some(value) = lookup("COURIER_CACHE") {
            self.cache.enabled = !matches!(value.trim(), "0" | "false" | "off");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| v.to_string())
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let json = r#"{
            "timings": { "bodyCharMs": 5 },
            "searchExit": { "escapePresses": 2 },
            "strategies": {
                "messageInputFocused": [
                    { "name": "tab twice", "actions": [{ "do": "tabNavigate", "times": 2 }], "verify": "echo" }
                ]
            }
        }"#;
        let config: CourierConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.timings.body_char_ms, 5);
        assert_eq!(config.timings.contact_char_ms, 80);
        assert_eq!(config.search_exit.escape_presses, 2);
        assert_eq!(config.search_exit.retry_budget, 3);
        assert_eq!(config.target.name, "WhatsApp");
        assert_eq!(config.strategies[&Goal::MessageInputFocused].len(), 1);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CourierConfig::default();
        config.apply_env(env(&[
            ("COURIER_READBACK", "none"),
            ("COURIER_INTERVENTION_TIMEOUT_SECS", "7"),
            ("COURIER_SETTLE_SCALE", "0.5"),
            ("COURIER_CACHE", "0"),
        ]));

        assert_eq!(config.probe.readback, ReadbackKind::None);
        assert_eq!(config.intervention.timeout(), Duration::from_secs(7));
        assert_eq!(config.timings.after_click_ms, 250);
        assert_eq!(config.timings.launch_timeout_ms, 20_000);
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let mut config = CourierConfig::default();
        config.apply_env(env(&[
            ("COURIER_READBACK", "telepathy"),
            ("COURIER_SETTLE_SCALE", "fast"),
        ]));
        assert_eq!(config, CourierConfig::default());
    }

    #[test]
    fn test_retry_budget_never_zero() {
        let budgets = RetryBudgets {
            typing: 0,
            ..RetryBudgets::default()
        };
        assert_eq!(budgets.for_goal(Goal::MessageTyped), 1);
        assert_eq!(budgets.for_goal(Goal::WindowFocused), 2);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        assert!(CourierConfig::load(Some(Path::new("/nonexistent/courier.json"))).is_err());
    }
}
