use serde::{Deserialize, Serialize};

#[cfg(target_os = "macos")]
#[link(name = "ApplicationServices", kind = "framework")]
extern "C" {
    fn AXIsProcessTrusted() -> bool;
    fn AXIsProcessTrustedWithOptions(
        options: core_foundation::dictionary::CFDictionaryRef,
    ) -> bool;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum PermissionStatus {
    Granted,
    Denied,
    NotNeeded,
}

// synthesized input is silently dropped on macOS without accessibility trust
pub fn check_input_permission() -> PermissionStatus {
    #[cfg(target_os = "macos")]
    {
        if unsafe { AXIsProcessTrusted() } {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        PermissionStatus::NotNeeded
    }
}

// request permission (triggers system prompt)
pub fn request_input_permission() {
    #[cfg(target_os = "macos")]
    {
        use core_foundation::base::TCFType;
        use core_foundation::boolean::CFBoolean;
        use core_foundation::dictionary::CFDictionary;
        use core_foundation::string::CFString;

        let prompt_key = CFString::new("AXTrustedCheckOptionPrompt");
        let prompt_value = CFBoolean::true_value();

        let options =
            CFDictionary::from_CFType_pairs(&[(prompt_key.as_CFType(), prompt_value.as_CFType())]);

        unsafe {
            AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef());
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        log::info!("[permissions] No input permission needed on this platform");
    }
}

// open system settings to the accessibility pane
pub fn open_permission_settings() {
    #[cfg(target_os = "macos")]
    {
        let url = "x-apple.systempreferences:com.apple.preference.security?Privacy_Accessibility";
        if let Err(e) = std::process::Command::new("open").arg(url).spawn() {
            log::warn!("[permissions] Could not open settings: {}", e);
        }
    }

    #[cfg(not(target_os = "macos"))]
    {
        log::info!("[permissions] No accessibility settings pane on this platform");
    }
}
