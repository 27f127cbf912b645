use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autopost_core_types::{Job, JobId, JobStatus, TriggerRecord};
use parking_lot::Mutex;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::MirrorError;

/// Shared copy of the job set plus the trigger channel.
#[async_trait]
pub trait RemoteMirror: Send + Sync {
    async fn write_all(&self, jobs: &[Job]) -> Result<(), MirrorError>;

    async fn write_status(&self, id: &JobId, status: JobStatus) -> Result<(), MirrorError>;

    /// Trigger records currently in the channel, keyed by their record key.
    async fn list_triggers(&self) -> Result<Vec<(String, TriggerRecord)>, MirrorError>;

    async fn remove_trigger(&self, key: &str) -> Result<(), MirrorError>;
}

/// Stand-in used when no remote is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullMirror;

#[async_trait]
impl RemoteMirror for NullMirror {
    async fn write_all(&self, _jobs: &[Job]) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn write_status(&self, _id: &JobId, _status: JobStatus) -> Result<(), MirrorError> {
        Ok(())
    }

    async fn list_triggers(&self) -> Result<Vec<(String, TriggerRecord)>, MirrorError> {
        Ok(Vec::new())
    }

    async fn remove_trigger(&self, _key: &str) -> Result<(), MirrorError> {
        Ok(())
    }
}

/// In-process mirror that records every write.
#[derive(Default)]
pub struct MemoryMirror {
    jobs: Mutex<Vec<Job>>,
    status_writes: Mutex<Vec<(JobId, JobStatus)>>,
    triggers: Mutex<BTreeMap<String, TriggerRecord>>,
}

impl MemoryMirror {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_trigger(&self, key: impl Into<String>, record: TriggerRecord) {
        self.triggers.lock().insert(key.into(), record);
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.jobs.lock().clone()
    }

    /// Every status written so far, in order.
    pub fn status_writes(&self) -> Vec<(JobId, JobStatus)> {
        self.status_writes.lock().clone()
    }

    pub fn statuses_for(&self, id: &JobId) -> Vec<JobStatus> {
        self.status_writes
            .lock()
            .iter()
            .filter(|(job, _)| job == id)
            .map(|(_, status)| *status)
            .collect()
    }

    pub fn trigger_keys(&self) -> Vec<String> {
        self.triggers.lock().keys().cloned().collect()
    }
}

#[async_trait]
impl RemoteMirror for MemoryMirror {
    async fn write_all(&self, jobs: &[Job]) -> Result<(), MirrorError> {
        *self.jobs.lock() = jobs.to_vec();
        Ok(())
    }

    async fn write_status(&self, id: &JobId, status: JobStatus) -> Result<(), MirrorError> {
        self.status_writes.lock().push((id.clone(), status));
        if let Some(job) = self.jobs.lock().iter_mut().find(|job| &job.id == id) {
            job.status = status;
        }
        Ok(())
    }

    async fn list_triggers(&self) -> Result<Vec<(String, TriggerRecord)>, MirrorError> {
        Ok(self
            .triggers
            .lock()
            .iter()
            .map(|(key, record)| (key.clone(), record.clone()))
            .collect())
    }

    async fn remove_trigger(&self, key: &str) -> Result<(), MirrorError> {
        self.triggers.lock().remove(key);
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct RestMirrorConfig {
    /// Root of the key-value tree, e.g. `https://example.firebaseio.com/`.
    pub base_url: Url,
    /// Sent as the `auth` query parameter when present.
    pub auth_token: Option<String>,
    pub write_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,
}

impl RestMirrorConfig {
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            auth_token: None,
            write_retries: 3,
            retry_delay: Duration::from_secs(2),
            request_timeout: Duration::from_secs(20),
        }
    }
}

const JOBS_NODE: &str = "autoPosts";
const TRIGGERS_NODE: &str = "triggers";

/// Mirror over a realtime-database style REST surface where every node is
/// addressable as `<path>.json`.
pub struct RestMirror {
    client: Client,
    cfg: RestMirrorConfig,
}

impl RestMirror {
    pub fn new(cfg: RestMirrorConfig) -> Result<Self, MirrorError> {
        if cfg.base_url.cannot_be_a_base() {
            return Err(MirrorError::InvalidUrl(cfg.base_url.to_string()));
        }
        let client = Client::builder().timeout(cfg.request_timeout).build()?;
        Ok(Self { client, cfg })
    }

    fn node_url(&self, segments: &[&str]) -> Result<Url, MirrorError> {
        let mut url = self.cfg.base_url.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| MirrorError::InvalidUrl(self.cfg.base_url.to_string()))?;
            path.pop_if_empty();
            if let Some((last, parents)) = segments.split_last() {
                path.extend(parents);
                path.push(&format!("{last}.json"));
            }
        }
        if let Some(token) = &self.cfg.auth_token {
            url.query_pairs_mut().append_pair("auth", token);
        }
        Ok(url)
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        url: Url,
        body: Option<&B>,
    ) -> Result<Value, MirrorError> {
        let mut request = self.client.request(method.clone(), url.clone());
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::Http {
                status: status.as_u16(),
                body,
            });
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().await?;
        debug!(target: "mirror", %method, path = url.path(), "mirror request ok");
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| MirrorError::Decode(err.to_string()))
    }

    /// Pause after the `attempt`-th failed write; grows linearly.
    fn backoff(&self, attempt: u32) -> Duration {
        self.cfg.retry_delay * attempt
    }

    async fn with_retry<F, Fut>(&self, op: &str, mut call: F) -> Result<(), MirrorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value, MirrorError>>,
    {
        let attempts = self.cfg.write_retries.max(1);
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(_) => return Ok(()),
                Err(err) if attempt < attempts && err.is_transient() => {
                    warn!(target: "mirror", op, attempt, ?err, "mirror write failed, retrying");
                    tokio::time::sleep(self.backoff(attempt)).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl RemoteMirror for RestMirror {
    async fn write_all(&self, jobs: &[Job]) -> Result<(), MirrorError> {
        let url = self.node_url(&[JOBS_NODE])?;
        let body: BTreeMap<&str, &Job> = jobs.iter().map(|job| (job.id.as_str(), job)).collect();
        self.with_retry("write_all", || self.send(Method::PUT, url.clone(), Some(&body)))
            .await
    }

    async fn write_status(&self, id: &JobId, status: JobStatus) -> Result<(), MirrorError> {
        let url = self.node_url(&[JOBS_NODE, id.as_str(), "status"])?;
        self.with_retry("write_status", || {
            self.send(Method::PUT, url.clone(), Some(status.as_str()))
        })
        .await
    }

    async fn list_triggers(&self) -> Result<Vec<(String, TriggerRecord)>, MirrorError> {
        let url = self.node_url(&[TRIGGERS_NODE])?;
        let value = self.send::<()>(Method::GET, url, None).await?;
        let Value::Object(entries) = value else {
            return Ok(Vec::new());
        };
        let mut triggers = Vec::with_capacity(entries.len());
        for (key, raw) in entries {
            match serde_json::from_value::<TriggerRecord>(raw) {
                Ok(record) => triggers.push((key, record)),
                Err(err) => warn!(target: "mirror", key, %err, "skipping malformed trigger"),
            }
        }
        Ok(triggers)
    }

    async fn remove_trigger(&self, key: &str) -> Result<(), MirrorError> {
        let url = self.node_url(&[TRIGGERS_NODE, key])?;
        self.with_retry("remove_trigger", || self.send::<()>(Method::DELETE, url.clone(), None))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mirror_for(server: &MockServer) -> RestMirror {
        let mut cfg = RestMirrorConfig::new(Url::parse(&format!("{}/", server.uri())).unwrap());
        cfg.retry_delay = Duration::from_millis(10);
        RestMirror::new(cfg).unwrap()
    }

    #[tokio::test]
    async fn write_all_puts_keyed_rows() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/autoPosts.json"))
            .and(body_json(json!({
                "42": {"rowId": "42", "content": "Hello", "mediaUrls": [], "time": "09:00", "status": "pending"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let job = Job::new("42", "Hello")
            .with_due_time(autopost_core_types::DueTime::parse("09:00").unwrap());
        mirror_for(&server).write_all(&[job]).await.unwrap();
    }

    #[tokio::test]
    async fn status_write_retries_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/autoPosts/42/status.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/autoPosts/42/status.json"))
            .and(body_json(json!("done")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("done")))
            .expect(1)
            .mount(&server)
            .await;

        mirror_for(&server)
            .write_status(&JobId::new("42"), JobStatus::Done)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_back_off_a_little_more_each_time() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/autoPosts/9/status.json"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/autoPosts/9/status.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!("done")))
            .expect(1)
            .mount(&server)
            .await;

        let mut mirror = mirror_for(&server);
        mirror.cfg.retry_delay = Duration::from_millis(100);
        assert_eq!(mirror.backoff(1), Duration::from_millis(100));
        assert_eq!(mirror.backoff(2), Duration::from_millis(200));

        let started = std::time::Instant::now();
        mirror.write_status(&JobId::new("9"), JobStatus::Done).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/autoPosts/7/status.json"))
            .respond_with(ResponseTemplate::new(401).set_body_string("denied"))
            .expect(1)
            .mount(&server)
            .await;

        let err = mirror_for(&server)
            .write_status(&JobId::new("7"), JobStatus::Failed)
            .await
            .unwrap_err();
        assert!(matches!(err, MirrorError::Http { status: 401, .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn triggers_are_listed_and_removed_with_auth() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/triggers.json"))
            .and(query_param("auth", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "-Nabc": {"rowId": "5", "content": "now please", "mediaUrls": ["https://x/a.png"], "createdAt": 1700000000000i64},
                "-Nbad": {"content": "missing row id"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/triggers/-Nabc.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .expect(1)
            .mount(&server)
            .await;

        let mut cfg = RestMirrorConfig::new(Url::parse(&server.uri()).unwrap());
        cfg.auth_token = Some("secret".into());
        let mirror = RestMirror::new(cfg).unwrap();

        let triggers = mirror.list_triggers().await.unwrap();
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].0, "-Nabc");
        assert_eq!(triggers[0].1.row_id, JobId::new("5"));
        assert_eq!(triggers[0].1.media_urls, vec!["https://x/a.png".to_string()]);

        mirror.remove_trigger("-Nabc").await.unwrap();
    }

    #[tokio::test]
    async fn empty_trigger_node_is_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/triggers.json"))
            .respond_with(ResponseTemplate::new(200).set_body_string("null"))
            .mount(&server)
            .await;
        assert!(mirror_for(&server).list_triggers().await.unwrap().is_empty());
    }
}
