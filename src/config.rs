//! Application configuration, loaded from YAML.

use std::path::PathBuf;
use std::time::Duration;

use autopost_core_types::JobStatus;
use autopost_page_agent::AgentConfig;
use cdp_adapter::CdpConfig;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub sheet: SheetConfig,
    #[serde(default)]
    pub mirror: MirrorConfig,
    #[serde(default)]
    pub browser: CdpConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub posting: PostingConfig,
}

/// The site posts are published to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Opened when no tab on `domain` exists yet.
    pub home_url: String,
    pub domain: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            home_url: "https://www.facebook.com/me".to_string(),
            domain: "facebook.com".to_string(),
        }
    }
}

impl TargetConfig {
    /// Whether `url` belongs to the target site (host equal to or under `domain`).
    pub fn matches(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let domain = self.domain.trim_start_matches('.');
        host == domain || host.ends_with(&format!(".{domain}"))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub jobs_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .map(|dir| dir.join("autopost"))
            .unwrap_or_else(|| PathBuf::from(".autopost"));
        Self {
            data_dir,
            jobs_file: "jobs.json".to_string(),
        }
    }
}

impl StorageConfig {
    pub fn jobs_path(&self) -> PathBuf {
        self.data_dir.join(&self.jobs_file)
    }

    /// Present while job timers are switched off.
    pub fn schedule_marker(&self) -> PathBuf {
        self.data_dir.join("schedule.off")
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetConfig {
    /// Published CSV export of the spreadsheet.
    pub csv_url: Option<String>,
    pub resync_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for SheetConfig {
    fn default() -> Self {
        Self {
            csv_url: None,
            resync_interval_secs: 300,
            request_timeout_secs: 30,
        }
    }
}

impl SheetConfig {
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorConfig {
    /// Root of the REST key-value tree; the mirror is disabled without it.
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
    pub trigger_poll_secs: u64,
    pub write_retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            auth_token: None,
            trigger_poll_secs: 15,
            write_retries: 3,
            retry_delay_ms: 2_000,
        }
    }
}

impl MirrorConfig {
    pub fn trigger_poll(&self) -> Duration {
        Duration::from_secs(self.trigger_poll_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub load_timeout_secs: u64,
    pub ping_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay_ms: 1_500,
            load_timeout_secs: 30,
            ping_timeout_ms: 3_000,
        }
    }
}

impl SessionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub timeout_secs: u64,
    pub max_bytes: u64,
    /// Extra attempts after the first for transient failures.
    pub retries: u32,
    pub retry_delay_ms: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 45,
            max_bytes: 50 * 1024 * 1024,
            retries: 2,
            retry_delay_ms: 1_000,
        }
    }
}

impl MediaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Status recorded when a submit click produced no success signal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnverifiedStatus {
    #[default]
    Done,
    Unverified,
}

impl From<UnverifiedStatus> for JobStatus {
    fn from(value: UnverifiedStatus) -> Self {
        match value {
            UnverifiedStatus::Done => JobStatus::Done,
            UnverifiedStatus::Unverified => JobStatus::Unverified,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostingConfig {
    pub unverified_status: UnverifiedStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg.target.domain, "facebook.com");
        assert_eq!(cfg.sheet.resync_interval_secs, 300);
        assert_eq!(cfg.mirror.trigger_poll_secs, 15);
        assert_eq!(cfg.session.max_attempts, 10);
        assert_eq!(cfg.agent.max_clicks, 5);
        assert_eq!(cfg.media.max_bytes, 50 * 1024 * 1024);
        assert_eq!(cfg.posting.unverified_status, UnverifiedStatus::Done);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let yaml = r#"
sheet:
  csv_url: "https://docs.example.com/sheet.csv"
posting:
  unverified_status: unverified
agent:
  gif_as_link: false
"#;
        let cfg: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.sheet.csv_url.as_deref(), Some("https://docs.example.com/sheet.csv"));
        assert_eq!(cfg.sheet.resync_interval_secs, 300);
        assert_eq!(JobStatus::from(cfg.posting.unverified_status), JobStatus::Unverified);
        assert!(!cfg.agent.gif_as_link);
        assert_eq!(cfg.agent.max_polls, 20);
    }

    #[test]
    fn target_matches_subdomains_only() {
        let target = TargetConfig::default();
        assert!(target.matches("https://www.facebook.com/me"));
        assert!(target.matches("https://facebook.com/"));
        assert!(!target.matches("https://notfacebook.com/"));
        assert!(!target.matches("about:blank"));
    }
}
