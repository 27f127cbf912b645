//! Spreadsheet import: the published CSV export becomes the job set.

use std::time::Duration;

use async_trait::async_trait;
use autopost_core_types::{DueTime, Job, JobId, JobStatus};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::errors::SheetError;

#[async_trait]
pub trait SheetSource: Send + Sync {
    async fn fetch_jobs(&self) -> Result<Vec<Job>, SheetError>;
}

/// Reads `rowId, content, time, mediaUrls, status` rows from a CSV URL.
pub struct CsvSheetSource {
    client: Client,
    url: String,
}

impl CsvSheetSource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SheetError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl SheetSource for CsvSheetSource {
    async fn fetch_jobs(&self) -> Result<Vec<Job>, SheetError> {
        debug!(target: "sheet", url = %self.url, "fetching sheet");
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SheetError::Http(status.as_u16()));
        }
        let body = response.text().await?;
        let jobs = parse_jobs(&body)?;
        info!(target: "sheet", rows = jobs.len(), "sheet parsed");
        Ok(jobs)
    }
}

/// Parses the CSV body. The header row is skipped and rows without an id are ignored.
pub fn parse_jobs(body: &str) -> Result<Vec<Job>, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    let mut jobs = Vec::new();
    for record in reader.records() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or_default();
        let id = field(0);
        if id.is_empty() {
            continue;
        }
        let due_time = match field(2) {
            "" => None,
            raw => match DueTime::parse(raw) {
                Ok(due) => Some(due),
                Err(err) => {
                    warn!(target: "sheet", row = id, error = %err, "ignoring unreadable time");
                    None
                }
            },
        };
        jobs.push(Job {
            id: JobId::new(id),
            content: field(1).to_string(),
            media_urls: field(3)
                .split(';')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect(),
            due_time,
            status: JobStatus::from_sheet(field(4)),
        });
    }
    Ok(jobs)
}
