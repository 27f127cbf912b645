use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use autopost_core_types::{Job, JobId, JobStatus};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::StoreError;

/// Local job records.
///
/// `replace` swaps the whole set at once, readers never observe a mix of old
/// and new jobs. `set_status` touches only the matching record and reports
/// whether one existed.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn list(&self) -> Result<Vec<Job>, StoreError>;

    async fn get(&self, id: &JobId) -> Result<Option<Job>, StoreError> {
        Ok(self.list().await?.into_iter().find(|job| &job.id == id))
    }

    async fn replace(&self, jobs: Vec<Job>) -> Result<(), StoreError>;

    async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<bool, StoreError>;

    /// Drops every record.
    async fn clear(&self) -> Result<(), StoreError> {
        self.replace(Vec::new()).await
    }
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<Vec<Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_jobs(jobs: Vec<Job>) -> Arc<Self> {
        Arc::new(Self {
            jobs: RwLock::new(jobs),
        })
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.read().clone())
    }

    async fn replace(&self, jobs: Vec<Job>) -> Result<(), StoreError> {
        *self.jobs.write() = jobs;
        Ok(())
    }

    async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<bool, StoreError> {
        Ok(apply_status(&mut self.jobs.write(), id, status))
    }
}

#[derive(Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    jobs: Vec<Job>,
}

const STORE_VERSION: u32 = 1;

/// JSON file store that survives restarts.
///
/// Every mutation rewrites the file through a temporary sibling and a rename,
/// so a crash leaves either the old or the new contents on disk.
pub struct FileJobStore {
    path: PathBuf,
    jobs: Mutex<Vec<Job>>,
}

impl FileJobStore {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Arc<Self>, StoreError> {
        let path = path.into();
        let jobs = match tokio::fs::read(&path).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => serde_json::from_slice::<StoreFile>(&bytes)?.jobs,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(StoreError::io(&path, err)),
        };
        info!(target: "job-store", path = %path.display(), jobs = jobs.len(), "job store opened");
        Ok(Arc::new(Self {
            path,
            jobs: Mutex::new(jobs),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let file = StoreFile {
            version: STORE_VERSION,
            jobs: jobs.to_vec(),
        };
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &file))
            .await
            .map_err(|err| StoreError::Task(err.to_string()))??;
        debug!(target: "job-store", path = %self.path.display(), jobs = jobs.len(), "job store persisted");
        Ok(())
    }
}

fn write_atomic(path: &Path, contents: &StoreFile) -> Result<(), StoreError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(|err| StoreError::io(&dir, err))?;
    let tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|err| StoreError::io(&dir, err))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer_pretty(&mut writer, contents)?;
        writer.flush().map_err(|err| StoreError::io(path, err))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|err| StoreError::io(path, err))?;
    tmp.persist(path)
        .map_err(|err| StoreError::io(path, err.error))?;
    Ok(())
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn list(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.jobs.lock().await.clone())
    }

    async fn replace(&self, jobs: Vec<Job>) -> Result<(), StoreError> {
        let mut guard = self.jobs.lock().await;
        self.persist(&jobs).await?;
        *guard = jobs;
        Ok(())
    }

    async fn set_status(&self, id: &JobId, status: JobStatus) -> Result<bool, StoreError> {
        let mut guard = self.jobs.lock().await;
        let mut next = guard.clone();
        if !apply_status(&mut next, id, status) {
            return Ok(false);
        }
        self.persist(&next).await?;
        *guard = next;
        Ok(true)
    }
}

fn apply_status(jobs: &mut [Job], id: &JobId, status: JobStatus) -> bool {
    match jobs.iter_mut().find(|job| &job.id == id) {
        Some(job) => {
            job.status = status;
            true
        }
        None => false,
    }
}
