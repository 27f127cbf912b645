//! Chromium DevTools Protocol adapter.
//!
//! Owns the websocket link to the browser (launching Chromium when no
//! endpoint is configured) and exposes the handful of target-level operations
//! the automation layer needs: list/open/activate tabs, evaluate script in a
//! tab, install init scripts and dispatch trusted input events.

pub mod adapter;
pub mod config;
pub mod error;
pub mod transport;
mod util;

pub use adapter::{CdpAdapter, TargetId, TargetInfo};
pub use config::CdpConfig;
pub use error::{AdapterError, AdapterErrorKind};
pub use transport::{ChromiumTransport, CdpTransport, CommandTarget, NoopTransport, TransportEvent};

use std::{env, path::PathBuf};
use which::which;

pub(crate) fn detect_chrome_executable() -> Option<PathBuf> {
    if let Ok(raw) = env::var("AUTOPOST_CHROME") {
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
        let mut paths = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(value) = env::var(key) {
                let root = PathBuf::from(value.trim());
                paths.push(root.join("Google/Chrome/Application/chrome.exe"));
                paths.push(root.join("Microsoft/Edge/Application/msedge.exe"));
            }
        }
        paths
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
    use super::detect_chrome_executable;
    use std::{env, fs};
    use tempfile::tempdir;

    #[test]
    fn explicit_executable_wins() {
        let dir = tempdir().unwrap();
        let exe_path = dir.path().join("my-chrome");
        fs::write(&exe_path, b"").unwrap();
        let original = env::var("AUTOPOST_CHROME").ok();
        env::set_var("AUTOPOST_CHROME", exe_path.to_string_lossy().to_string());
        let detected = detect_chrome_executable();
        match original {
            Some(value) => env::set_var("AUTOPOST_CHROME", value),
            None => env::remove_var("AUTOPOST_CHROME"),
        }
        assert_eq!(detected, Some(exe_path));
    }
}
