//! Status Reporter - read-only view of the target app.

use crate::locator::AppLocator;
use crate::permissions::{check_input_permission, PermissionStatus};
use crate::target::TargetAppDescriptor;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub app: String,
    pub installed: bool,
    pub running: bool,
    pub window_visible: bool,
    pub install_path: Option<String>,
    pub process_id: Option<u32>,
    pub input_permission: PermissionStatus,
}

/// Query the locator without launching anything or touching caches.
pub fn get_status(locator: &AppLocator, target: &TargetAppDescriptor) -> AppStatus {
    let install_path = locator.peek_installation(target);
    let process = locator.running_process(target);
    let window_visible = locator.find_window(target).is_some();

    AppStatus {
        app: target.name.clone(),
        installed: install_path.is_some(),
        running: process.is_some(),
        window_visible,
        install_path: install_path.map(|p| p.to_string_lossy().into_owned()),
        process_id: process.map(|p| p.pid),
        input_permission: check_input_permission(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: AppStatus,
    pub summary: String,
    pub hints: Vec<String>,
}

impl StatusReport {
    pub fn new(status: AppStatus) -> Self {
        let summary = match (status.installed, status.running, status.window_visible) {
            (_, true, true) => format!("{} is running with a visible window", status.app),
            (_, true, false) => format!("{} is running but its window is hidden or minimised", status.app),
            (true, false, _) => format!("{} is installed but not running", status.app),
            (false, false, _) => format!("{} was not found", status.app),
        };

        let mut hints = Vec::new();
        if !status.installed && !status.running {
            hints.push("Install the desktop app, or add its path to target.installGlobs in config.json".to_string());
        }
        if status.running && !status.window_visible {
            hints.push("Restore the window; sending will try to raise it but a visible window is more reliable".to_string());
        }
        if status.input_permission == PermissionStatus::Denied {
            hints.push(
                "Grant Accessibility access (run `courier status --request-permission`), otherwise input is ignored"
                    .to_string(),
            );
        }

        Self { status, summary, hints }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        writeln!(f, "{}", self.summary)?;
        writeln!(f, "  installed:      {}", yes_no(self.status.installed))?;
        if let Some(path) = &self.status.install_path {
            writeln!(f, "  path:           {}", path)?;
        }
        writeln!(f, "  running:        {}", yes_no(self.status.running))?;
        if let Some(pid) = self.status.process_id {
            writeln!(f, "  pid:            {}", pid)?;
        }
        writeln!(f, "  window visible: {}", yes_no(self.status.window_visible))?;
        writeln!(f, "  input access:   {:?}", self.status.input_permission)?;
        for hint in &self.hints {
            writeln!(f, "  hint: {}", hint)?;
        }
        Ok(())
    }
}
