use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use which::which;

/// Launch and connection settings for the Chromium backend.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CdpConfig {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub no_sandbox: bool,
    /// Per-command response deadline
    pub default_deadline_ms: u64,
    /// Connect to an already running browser instead of launching one
    pub websocket_url: Option<String>,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: detect_chrome_executable().unwrap_or_default(),
            user_data_dir: default_profile_dir(),
            headless: parse_flag(env::var("FLOWPILOT_HEADLESS").ok().as_deref(), true),
            no_sandbox: parse_flag(
                env::var("FLOWPILOT_DISABLE_SANDBOX").ok().as_deref(),
                false,
            ),
            default_deadline_ms: 30_000,
            websocket_url: None,
        }
    }
}

/// "0", "false", "no", "off" turn a flag off; "1", "true", "yes", "on" turn it on.
pub fn parse_flag(raw: Option<&str>, default: bool) -> bool {
    match raw.map(|value| value.trim().to_ascii_lowercase()) {
        Some(value) if matches!(value.as_str(), "0" | "false" | "no" | "off") => false,
        Some(value) if matches!(value.as_str(), "1" | "true" | "yes" | "on") => true,
        _ => default,
    }
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("FLOWPILOT_CHROME_PROFILE") {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    Path::new("./.flowpilot-profile").into()
}

/// `FLOWPILOT_CHROME`, then well-known binaries on `PATH`, then OS install paths.
pub fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("FLOWPILOT_CHROME") {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            let candidate = PathBuf::from(trimmed);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    for name in chrome_executable_names() {
        if let Ok(path) = which(name) {
            return Some(path);
        }
    }

    os_specific_chrome_paths()
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn chrome_executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(not(target_os = "windows"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }
}

fn os_specific_chrome_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"]
            .iter()
            .filter_map(|key| env::var(key).ok())
            .map(PathBuf::from)
            .flat_map(|root| {
                [
                    root.join("Google/Chrome/Application/chrome.exe"),
                    root.join("Microsoft/Edge/Application/msedge.exe"),
                ]
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/usr/bin/chromium"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn flags_follow_common_spellings() {
        assert!(!parse_flag(Some("off"), true));
        assert!(!parse_flag(Some(" FALSE "), true));
        assert!(parse_flag(Some("yes"), false));
        assert!(parse_flag(None, true));
        assert!(!parse_flag(Some("maybe"), false));
    }

    #[test]
    fn detects_from_env_var() {
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("my-chrome");
        fs::write(&exe_path, b"").unwrap();
        let original = env::var("FLOWPILOT_CHROME").ok();
        env::set_var("FLOWPILOT_CHROME", exe_path.to_string_lossy().to_string());
        let detected = detect_chrome_executable();
        match original {
            Some(value) => env::set_var("FLOWPILOT_CHROME", value),
            None => env::remove_var("FLOWPILOT_CHROME"),
        }
        assert_eq!(detected, Some(exe_path));
    }

    #[test]
    fn deserializes_partial_config() {
        let cfg: CdpConfig =
            serde_json::from_str(r#"{"headless": false, "websocketUrl": "ws://x"}"#).unwrap();
        assert!(!cfg.headless);
        assert_eq!(cfg.websocket_url.as_deref(), Some("ws://x"));
        assert_eq!(cfg.default_deadline_ms, 30_000);
    }
}
