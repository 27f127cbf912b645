use crate::detect_chrome_executable;
use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
};

/// Configuration for launching or attaching to Chromium.
///
/// Posting needs a logged-in profile, so `user_data_dir` should point at a
/// profile the operator signed into once by hand.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CdpConfig {
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    pub default_deadline_ms: u64,
    /// Attach to an already running browser instead of launching one.
    pub websocket_url: Option<String>,
    pub heartbeat_interval_ms: u64,
    pub launch_timeout_secs: u64,
}

impl Default for CdpConfig {
    fn default() -> Self {
        Self {
            executable: default_chrome_path(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            default_deadline_ms: 30_000,
            websocket_url: resolve_ws_url(),
            heartbeat_interval_ms: 15_000,
            launch_timeout_secs: 20,
        }
    }
}

fn resolve_headless_default() -> bool {
    // A visible window is the default; AUTOPOST_HEADLESS=1 hides it.
    match env::var("AUTOPOST_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            matches!(lower.as_str(), "1" | "true" | "yes" | "on")
        }
        Err(_) => false,
    }
}

fn resolve_ws_url() -> Option<String> {
    env::var("AUTOPOST_WS_URL")
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn default_chrome_path() -> PathBuf {
    detect_chrome_executable().unwrap_or_default()
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("AUTOPOST_CHROME_PROFILE") {
        return PathBuf::from(path);
    }

    let default = Path::new("./.autopost-profile");
    default.into()
}
