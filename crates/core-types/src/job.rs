use std::fmt;
use std::str::FromStr;

use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoreError;

/// Timers for individual jobs are named `job_<id>`.
pub const JOB_TIMER_PREFIX: &str = "job_";

/// Stable key of a job, taken from the external source row.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn timer_name(&self) -> String {
        format!("{JOB_TIMER_PREFIX}{}", self.0)
    }

    /// Inverse of [`JobId::timer_name`]; `None` for timers that do not belong to a job.
    pub fn from_timer_name(name: &str) -> Option<Self> {
        name.strip_prefix(JOB_TIMER_PREFIX)
            .filter(|id| !id.is_empty())
            .map(Self::new)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Done,
    Failed,
    /// Submission was attempted but no success signal was ever observed.
    Unverified,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Unverified => "unverified",
        }
    }

    /// Settled jobs are never picked up again by a timer.
    pub fn is_settled(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Unverified)
    }

    /// Maps the free-form status column of the spreadsheet.
    pub fn from_sheet(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        if lowered.contains("done") || lowered.contains("đã") {
            JobStatus::Done
        } else {
            JobStatus::Pending
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "done" => Ok(JobStatus::Done),
            "failed" => Ok(JobStatus::Failed),
            "unverified" => Ok(JobStatus::Unverified),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Local time of day at which a job recurs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DueTime {
    hour: u32,
    minute: u32,
}

impl DueTime {
    pub fn new(hour: u32, minute: u32) -> Result<Self, CoreError> {
        if hour > 23 || minute > 59 {
            return Err(CoreError::InvalidDueTime(format!("{hour}:{minute}")));
        }
        Ok(Self { hour, minute })
    }

    /// Accepts `H:MM`, `HH:MM` and `HH:MM:SS` (seconds are ignored).
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let trimmed = raw.trim();
        let invalid = || CoreError::InvalidDueTime(trimmed.to_string());
        let mut parts = trimmed.split(':');
        let hour = parts
            .next()
            .filter(|p| !p.is_empty() && p.len() <= 2)
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        let minute = parts
            .next()
            .filter(|p| p.len() == 2)
            .and_then(|p| p.parse::<u32>().ok())
            .ok_or_else(invalid)?;
        if let Some(seconds) = parts.next() {
            if seconds.len() != 2 || seconds.parse::<u32>().map(|s| s > 59).unwrap_or(true) {
                return Err(invalid());
            }
        }
        if parts.next().is_some() {
            return Err(invalid());
        }
        Self::new(hour, minute).map_err(|_| invalid())
    }

    pub fn hour(&self) -> u32 {
        self.hour
    }

    pub fn minute(&self) -> u32 {
        self.minute
    }

    pub fn as_naive_time(&self) -> NaiveTime {
        NaiveTime::from_hms_opt(self.hour, self.minute, 0).unwrap_or(NaiveTime::MIN)
    }
}

impl From<NaiveTime> for DueTime {
    fn from(value: NaiveTime) -> Self {
        Self {
            hour: value.hour(),
            minute: value.minute(),
        }
    }
}

impl fmt::Display for DueTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for DueTime {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for DueTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DueTime {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DueTime::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// One unit of content to publish.
///
/// Field names on the wire follow the source rows (`rowId`, `time`, `mediaUrls`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Job {
    #[serde(rename = "rowId")]
    pub id: JobId,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "mediaUrls", default)]
    pub media_urls: Vec<String>,
    #[serde(rename = "time", default, with = "due_time_field")]
    pub due_time: Option<DueTime>,
    #[serde(default = "pending")]
    pub status: JobStatus,
}

fn pending() -> JobStatus {
    JobStatus::Pending
}

impl Job {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: JobId::new(id),
            content: content.into(),
            media_urls: Vec::new(),
            due_time: None,
            status: JobStatus::Pending,
        }
    }

    pub fn with_media<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.media_urls = urls.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_due_time(mut self, due: DueTime) -> Self {
        self.due_time = Some(due);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Pending with a valid due time: the jobs that own a daily timer.
    pub fn is_schedulable(&self) -> bool {
        self.status == JobStatus::Pending && self.due_time.is_some()
    }
}

/// Immediate activation appended to the remote trigger channel.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TriggerRecord {
    #[serde(rename = "rowId")]
    pub row_id: JobId,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "mediaUrls", default)]
    pub media_urls: Vec<String>,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
}

impl TriggerRecord {
    pub fn to_job(&self) -> Job {
        Job {
            id: self.row_id.clone(),
            content: self.content.clone(),
            media_urls: self.media_urls.clone(),
            due_time: None,
            status: JobStatus::Pending,
        }
    }
}

mod due_time_field {
    use super::DueTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<DueTime>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(due) => serializer.collect_str(due),
            None => serializer.serialize_str(""),
        }
    }

    // Rows with an empty or malformed time are kept, they just never get a timer.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DueTime>, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.and_then(|s| DueTime::parse(&s).ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn due_time_parsing() {
        assert_eq!(DueTime::parse("09:00").unwrap(), DueTime::new(9, 0).unwrap());
        assert_eq!(DueTime::parse("7:05").unwrap().to_string(), "07:05");
        assert_eq!(DueTime::parse(" 23:59:30 ").unwrap(), DueTime::new(23, 59).unwrap());
        for bad in ["", "24:00", "12:60", "12", "12:5", "ab:cd", "1:00:00:00", "123:00"] {
            assert!(DueTime::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn timer_names_map_back_to_jobs() {
        let id = JobId::new("42");
        assert_eq!(id.timer_name(), "job_42");
        assert_eq!(JobId::from_timer_name("job_42"), Some(id));
        assert_eq!(JobId::from_timer_name("sync"), None);
        assert_eq!(JobId::from_timer_name("job_"), None);
    }

    #[test]
    fn sheet_status_mapping() {
        assert_eq!(JobStatus::from_sheet("Đã đăng"), JobStatus::Done);
        assert_eq!(JobStatus::from_sheet("DONE"), JobStatus::Done);
        assert_eq!(JobStatus::from_sheet("chưa"), JobStatus::Pending);
        assert_eq!(JobStatus::from_sheet(""), JobStatus::Pending);
    }

    #[test]
    fn job_uses_row_field_names() {
        let job = Job::new("42", "Hello")
            .with_media(["https://x/a.png"])
            .with_due_time(DueTime::new(9, 0).unwrap());
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(
            value,
            json!({
                "rowId": "42",
                "content": "Hello",
                "mediaUrls": ["https://x/a.png"],
                "time": "09:00",
                "status": "pending"
            })
        );
    }

    #[test]
    fn malformed_time_deserializes_as_unscheduled() {
        let job: Job = serde_json::from_value(json!({
            "rowId": "7",
            "content": "x",
            "time": "soon",
            "status": "done"
        }))
        .unwrap();
        assert_eq!(job.due_time, None);
        assert_eq!(job.status, JobStatus::Done);
        assert!(job.media_urls.is_empty());
        assert!(!job.is_schedulable());
    }
}
