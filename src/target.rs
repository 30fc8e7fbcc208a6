//! Target application descriptor and message requests.

use serde::{Deserialize, Serialize};

/// Everything needed to find the target application on this machine.
///
/// Built once at configuration load and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetAppDescriptor {
    /// Logical name, also used as the persisted cache key.
    pub name: String,
    /// Candidate executable paths, checked in order. Glob syntax, `~` expands to home.
    pub install_globs: Vec<String>,
    /// Candidate process names (case-insensitive glob patterns).
    pub process_patterns: Vec<String>,
    /// Window title fragments (case-insensitive substring match).
    pub window_titles: Vec<String>,
}

impl TargetAppDescriptor {
    /// WhatsApp Desktop, the application this tool was written against.
    pub fn whatsapp() -> Self {
        let install_globs = if cfg!(target_os = "windows") {
            vec![
                "C:/Program Files/WindowsApps/5319275A.WhatsAppDesktop_*/WhatsApp.exe",
                "C:/Program Files/WindowsApps/*WhatsApp*/WhatsApp.exe",
                "~/AppData/Local/WhatsApp/WhatsApp.exe",
                "~/AppData/Roaming/WhatsApp/WhatsApp.exe",
                "C:/Program Files/WhatsApp/WhatsApp.exe",
                "C:/Program Files (x86)/WhatsApp/WhatsApp.exe",
                "~/AppData/Local/Programs/WhatsApp/WhatsApp.exe",
            ]
        } else if cfg!(target_os = "macos") {
            vec![
                "/Applications/WhatsApp.app/Contents/MacOS/WhatsApp",
                "~/Applications/WhatsApp.app/Contents/MacOS/WhatsApp",
            ]
        } else {
            vec!["/usr/bin/whatsapp*", "/opt/whatsapp*/whatsapp*", "~/.local/bin/whatsapp*"]
        };

        Self {
            name: "WhatsApp".to_string(),
            install_globs: install_globs.into_iter().map(String::from).collect(),
            process_patterns: ["whatsapp.exe", "whatsappdesktop.exe", "whatsapp", "whatsapp.root"]
                .into_iter()
                .map(String::from)
                .collect(),
            window_titles: vec!["whatsapp".to_string()],
        }
    }

    /// Key under which the resolved install path is persisted.
    pub fn cache_key(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Case-insensitive check of a window title against the candidate fragments.
    pub fn matches_title(&self, title: &str) -> bool {
        let title = title.to_lowercase();
        self.window_titles
            .iter()
            .any(|fragment| !fragment.is_empty() && title.contains(&fragment.to_lowercase()))
    }
}

impl Default for TargetAppDescriptor {
    fn default() -> Self {
        Self::whatsapp()
    }
}

/// One message to deliver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    /// Free text; matching is left to the target app's own search.
    pub contact: String,
    /// Literal body. Newlines become soft line breaks.
    pub body: String,
}

impl MessageRequest {
    pub fn new(contact: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            contact: contact.into(),
            body: body.into(),
        }
    }
}
