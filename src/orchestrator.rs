//! Job execution and the control operations around it.
//!
//! Every run of a job, whether from its daily timer, a remote trigger or a
//! manual `post-now`, goes through [`Orchestrator::run_job`]: take the
//! processing lock, re-read the job, mark it `Processing` locally and in the
//! mirror, post through the page agent, then persist the final status. The
//! lock guard is dropped on every exit path.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use autopost_core_types::protocol::{
    AgentResponse, AgentState, Inspection, PostPayload, PostReport, RejectReason, SubmitVerdict,
};
use autopost_core_types::{Job, JobId, JobStatus, JOB_TIMER_PREFIX};
use autopost_job_store::{JobStore, PendingTrigger, RemoteMirror, StoreError, TriggerPoller};
use autopost_page_agent::AgentError;
use autopost_scheduler::{metrics, ProcessingLock, SchedulerError, TimerFired, TimerInfo, TimerRegistry};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::PostingConfig;
use crate::errors::SheetError;
use crate::session::PageSessionController;
use crate::sheet::SheetSource;

/// Interval timer driving the spreadsheet re-sync.
pub const RESYNC_TIMER: &str = "resync_sheet";

/// Gap between readiness pings while another job holds the page.
const BUSY_POLL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    /// Another run of this job holds the lock, or the page agent was busy.
    Contended,
    /// Settled already, or gone from the store.
    Skipped { status: Option<JobStatus> },
    Posted { status: JobStatus, report: PostReport },
    Failed { reason: String, report: Option<PostReport> },
}

impl JobOutcome {
    pub fn final_status(&self) -> Option<JobStatus> {
        match self {
            JobOutcome::Posted { status, .. } => Some(*status),
            JobOutcome::Failed { .. } => Some(JobStatus::Failed),
            JobOutcome::Contended | JobOutcome::Skipped { .. } => None,
        }
    }

    pub fn is_posted(&self) -> bool {
        matches!(self, JobOutcome::Posted { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct JobRun {
    pub job_id: JobId,
    #[serde(flatten)]
    pub outcome: JobOutcome,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResyncSummary {
    pub jobs: usize,
    pub scheduled: usize,
}

/// On/off switch for job timers, persisted as a marker file so a one-shot
/// `clear-schedule` reaches a daemon running in another process.
#[derive(Clone, Debug, Default)]
pub struct ScheduleSwitch {
    marker: Option<PathBuf>,
}

impl ScheduleSwitch {
    /// Job timers are off while `marker` exists.
    pub fn at(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: Some(marker.into()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.marker.as_ref().map_or(true, |marker| !marker.exists())
    }

    pub async fn set_enabled(&self, enabled: bool) -> std::io::Result<()> {
        let Some(marker) = &self.marker else {
            return Ok(());
        };
        if enabled {
            match tokio::fs::remove_file(marker).await {
                Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(err),
                _ => Ok(()),
            }
        } else {
            if let Some(parent) = marker.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(marker, b"job timers cleared\n").await
        }
    }
}

/// What the post attempt resolved to, before persistence.
enum Attempt {
    Posted(JobStatus, PostReport),
    Failed(String, Option<PostReport>),
    /// The agent turned the request away; the job keeps its previous status.
    Refused(String),
}

pub struct Orchestrator {
    store: Arc<dyn JobStore>,
    mirror: Arc<dyn RemoteMirror>,
    sheet: Option<Arc<dyn SheetSource>>,
    sessions: Arc<PageSessionController>,
    timers: Arc<TimerRegistry>,
    lock: ProcessingLock,
    posting: PostingConfig,
    switch: ScheduleSwitch,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        mirror: Arc<dyn RemoteMirror>,
        sessions: Arc<PageSessionController>,
        timers: Arc<TimerRegistry>,
        posting: PostingConfig,
    ) -> Self {
        Self {
            store,
            mirror,
            sheet: None,
            sessions,
            timers,
            lock: ProcessingLock::new(),
            posting,
            switch: ScheduleSwitch::default(),
        }
    }

    pub fn with_sheet(mut self, sheet: Arc<dyn SheetSource>) -> Self {
        self.sheet = Some(sheet);
        self
    }

    pub fn with_schedule_switch(mut self, switch: ScheduleSwitch) -> Self {
        self.switch = switch;
        self
    }

    pub fn schedule_enabled(&self) -> bool {
        self.switch.is_enabled()
    }

    pub fn lock(&self) -> &ProcessingLock {
        &self.lock
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    pub async fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        self.store.list().await
    }

    /// Runs one stored job now.
    pub async fn run_job(&self, id: &JobId) -> Result<JobRun, StoreError> {
        self.process(id, None).await
    }

    /// Runs a trigger with its own content, whatever the stored status.
    pub async fn run_trigger(&self, trigger: &PendingTrigger) -> Result<JobRun, StoreError> {
        self.process(&trigger.record.row_id, Some(trigger.record.to_job()))
            .await
    }

    #[instrument(skip_all, fields(job_id = %id, triggered = explicit.is_some()))]
    async fn process(&self, id: &JobId, explicit: Option<Job>) -> Result<JobRun, StoreError> {
        let run = |outcome| JobRun {
            job_id: id.clone(),
            outcome,
        };

        let Some(_guard) = self.lock.acquire(id) else {
            debug!(target: "orchestrator", "job already running");
            return Ok(run(JobOutcome::Contended));
        };

        let stored = self.store.get(id).await?;
        let (job, previous) = match (explicit, stored) {
            (Some(job), stored) => {
                let previous = stored.map_or(JobStatus::Pending, |stored| stored.status);
                (job, previous)
            }
            (None, Some(job)) if job.status.is_settled() => {
                metrics::record_skipped();
                debug!(target: "orchestrator", status = %job.status, "job already settled");
                return Ok(run(JobOutcome::Skipped {
                    status: Some(job.status),
                }));
            }
            (None, Some(job)) => {
                let previous = job.status;
                (job, previous)
            }
            (None, None) => {
                metrics::record_skipped();
                warn!(target: "orchestrator", "job not found");
                return Ok(run(JobOutcome::Skipped { status: None }));
            }
        };

        self.persist_status(id, JobStatus::Processing).await?;
        metrics::record_started();
        info!(target: "orchestrator", media = job.media_urls.len(), "posting job");

        let outcome = match self.attempt(&job).await {
            Attempt::Posted(status, report) => {
                self.persist_status(id, status).await?;
                if report.is_verified() {
                    metrics::record_done();
                } else {
                    metrics::record_unverified();
                }
                info!(target: "orchestrator", %status, verdict = ?report.verdict, "job posted");
                JobOutcome::Posted { status, report }
            }
            Attempt::Failed(reason, report) => {
                self.persist_status(id, JobStatus::Failed).await?;
                metrics::record_failed();
                warn!(target: "orchestrator", %reason, "job failed");
                JobOutcome::Failed { reason, report }
            }
            Attempt::Refused(reason) => {
                self.persist_status(id, previous).await?;
                info!(target: "orchestrator", %reason, "page agent refused the job, left for the next run");
                JobOutcome::Contended
            }
        };
        Ok(run(outcome))
    }

    /// Posts through the page agent. A refusal because another job is on
    /// the page waits for the agent to go idle, within one post timeout,
    /// and sends again.
    async fn attempt(&self, job: &Job) -> Attempt {
        let payload = PostPayload {
            content: job.content.clone(),
            media_urls: job.media_urls.clone(),
        };
        let timeout = self.sessions.agent_config().post_timeout();
        let deadline = Instant::now() + timeout;
        loop {
            let session = match self.sessions.ensure_session(true).await {
                Ok(session) => session,
                Err(err) => return Attempt::Failed(err.to_string(), None),
            };
            if session.pong.state == AgentState::Busy {
                if Instant::now() >= deadline {
                    return Attempt::Refused("page agent stayed busy".into());
                }
                sleep(BUSY_POLL).await;
                continue;
            }
            match session.agent.post(payload.clone(), timeout).await {
                Ok(AgentResponse::Rejected(rejection))
                    if rejection.reason == RejectReason::AlreadyInProgress && Instant::now() < deadline =>
                {
                    debug!(target: "orchestrator", reason = %rejection.message, "page agent busy, waiting");
                    sleep(BUSY_POLL).await;
                }
                answer => return self.settle(answer).await,
            }
        }
    }

    async fn settle(&self, answer: Result<AgentResponse, AgentError>) -> Attempt {
        match answer {
            Ok(AgentResponse::PostResult(report)) if report.success => {
                let status = match report.verdict {
                    Some(SubmitVerdict::Unverified) => self.posting.unverified_status.into(),
                    _ => JobStatus::Done,
                };
                Attempt::Posted(status, report)
            }
            Ok(AgentResponse::PostResult(report)) => {
                let reason = format!(
                    "{:?}: {}",
                    report.stage,
                    report.message.as_deref().unwrap_or("post failed")
                );
                if let Some(diagnostic) = &report.diagnostic {
                    warn!(
                        target: "orchestrator",
                        dialogs = diagnostic.dialogs,
                        editables = diagnostic.editables,
                        buttons = diagnostic.buttons,
                        near_misses = ?diagnostic.near_misses,
                        "heuristic miss"
                    );
                }
                Attempt::Failed(reason, Some(report))
            }
            Ok(AgentResponse::Rejected(rejection)) => Attempt::Refused(rejection.message),
            Ok(AgentResponse::Error { message }) => Attempt::Failed(message, None),
            Ok(other) => Attempt::Failed(format!("unexpected agent answer {other:?}"), None),
            Err(err) => {
                if matches!(err, AgentError::Timeout { .. } | AgentError::Disconnected) {
                    self.sessions.invalidate().await;
                }
                Attempt::Failed(err.to_string(), None)
            }
        }
    }

    /// Local store first; a mirror failure is logged, not fatal.
    async fn persist_status(&self, id: &JobId, status: JobStatus) -> Result<(), StoreError> {
        if !self.store.set_status(id, status).await? {
            debug!(target: "orchestrator", job_id = %id, %status, "job not in local store");
        }
        if let Err(err) = self.mirror.write_status(id, status).await {
            warn!(target: "orchestrator", job_id = %id, %status, error = %err, "mirror status write failed");
        }
        Ok(())
    }

    /// StartPosting: every pending job, one after another, due time ignored.
    pub async fn start_posting(&self) -> Result<Vec<JobRun>, StoreError> {
        let pending: Vec<JobId> = self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|job| job.status == JobStatus::Pending)
            .map(|job| job.id)
            .collect();
        info!(target: "orchestrator", jobs = pending.len(), "posting pending jobs now");
        let mut runs = Vec::with_capacity(pending.len());
        for id in &pending {
            runs.push(self.run_job(id).await?);
        }
        Ok(runs)
    }

    /// SetSchedule: switches job timers on and creates one daily timer per
    /// pending job with a due time.
    pub async fn set_schedule(&self) -> Result<usize, anyhow::Error> {
        self.switch.set_enabled(true).await?;
        self.rebuild_schedule().await
    }

    /// Recreates job timers from the store, unless they were switched off.
    pub async fn rebuild_schedule(&self) -> Result<usize, anyhow::Error> {
        let jobs = self.store.list().await?;
        Ok(self.schedule_jobs(&jobs)?)
    }

    fn schedule_jobs(&self, jobs: &[Job]) -> Result<usize, SchedulerError> {
        let cleared = self.timers.clear_prefix(JOB_TIMER_PREFIX);
        if !self.switch.is_enabled() {
            info!(target: "orchestrator", cleared, "job timers are switched off");
            return Ok(0);
        }
        let mut scheduled = 0;
        for job in jobs.iter().filter(|job| job.is_schedulable()) {
            if let Some(due) = job.due_time {
                let first = self.timers.schedule_daily(&job.id.timer_name(), due)?;
                debug!(target: "orchestrator", job_id = %job.id, %due, %first, "job scheduled");
                scheduled += 1;
            }
        }
        info!(target: "orchestrator", cleared, scheduled, "schedule rebuilt");
        Ok(scheduled)
    }

    /// ClearSchedule: switches job timers off and removes them; the resync
    /// timer stays.
    pub async fn clear_schedule(&self) -> Result<usize, anyhow::Error> {
        self.switch.set_enabled(false).await?;
        let cleared = self.timers.clear_prefix(JOB_TIMER_PREFIX);
        info!(target: "orchestrator", cleared, "job timers cleared");
        Ok(cleared)
    }

    pub fn list_timers(&self) -> Vec<TimerInfo> {
        self.timers.list()
    }

    pub fn enable_resync(&self, period: Duration) -> Result<(), SchedulerError> {
        self.timers.schedule_interval(RESYNC_TIMER, period)?;
        Ok(())
    }

    /// ResyncFromSource: sheet, then mirror, then store, then timers.
    #[instrument(skip(self))]
    pub async fn resync(&self) -> Result<ResyncSummary, anyhow::Error> {
        let sheet = self.sheet.as_ref().ok_or(SheetError::NotConfigured)?;
        let jobs = sheet.fetch_jobs().await?;
        if let Err(err) = self.mirror.write_all(&jobs).await {
            warn!(target: "orchestrator", error = %err, "mirror write failed during resync");
        }
        self.store.replace(jobs.clone()).await?;
        let scheduled = self.schedule_jobs(&jobs)?;
        info!(target: "orchestrator", jobs = jobs.len(), scheduled, "resync finished");
        Ok(ResyncSummary {
            jobs: jobs.len(),
            scheduled,
        })
    }

    /// The clear-all operation: empties the store and drops job timers.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let cleared = self.timers.clear_prefix(JOB_TIMER_PREFIX);
        debug!(target: "orchestrator", cleared, "job timers dropped with the store");
        self.store.clear().await
    }

    pub async fn inspect(&self) -> Result<Inspection, anyhow::Error> {
        let session = self.sessions.ensure_session(true).await?;
        let timeout = self.sessions.agent_config().post_timeout();
        Ok(session.agent.inspect(timeout).await?)
    }

    /// Handles fired timers until `shutdown`; each job runs on its own task.
    pub async fn dispatch_timers(
        self: Arc<Self>,
        mut fired: mpsc::UnboundedReceiver<TimerFired>,
        shutdown: CancellationToken,
    ) {
        loop {
            let timer = tokio::select! {
                _ = shutdown.cancelled() => break,
                timer = fired.recv() => match timer {
                    Some(timer) => timer,
                    None => break,
                },
            };
            let this = Arc::clone(&self);
            if timer.name == RESYNC_TIMER {
                tokio::spawn(async move {
                    if let Err(err) = this.resync().await {
                        warn!(target: "orchestrator", error = %err, "scheduled resync failed");
                    }
                });
            } else if let Some(id) = JobId::from_timer_name(&timer.name) {
                if !self.switch.is_enabled() {
                    let cleared = self.timers.clear_prefix(JOB_TIMER_PREFIX);
                    info!(target: "orchestrator", job_id = %id, cleared, "job timers were switched off elsewhere");
                    continue;
                }
                debug!(target: "orchestrator", job_id = %id, scheduled_for = %timer.scheduled_for, "job timer fired");
                tokio::spawn(async move {
                    if let Err(err) = this.run_job(&id).await {
                        error!(target: "orchestrator", job_id = %id, error = %err, "job run aborted by store");
                    }
                });
            } else {
                warn!(target: "orchestrator", timer = %timer.name, "unknown timer fired");
            }
        }
        debug!(target: "orchestrator", "timer dispatcher stopped");
    }

    /// Processes new remote triggers every `period` until `shutdown`.
    pub async fn poll_triggers(self: Arc<Self>, period: Duration, shutdown: CancellationToken) {
        let mut poller = TriggerPoller::new(Arc::clone(&self.mirror));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match poller.poll().await {
                Ok(triggers) => {
                    for trigger in triggers {
                        if self.handle_trigger(&trigger).await == Some(JobOutcome::Contended) {
                            poller.forget(&trigger.key);
                        }
                    }
                }
                Err(err) => warn!(target: "orchestrator", error = %err, "trigger poll failed"),
            }
        }
        debug!(target: "orchestrator", "trigger poller stopped");
    }

    /// Runs a trigger and deletes its record once the post went out.
    ///
    /// A `Contended` outcome leaves the record for a later poll.
    pub async fn handle_trigger(&self, trigger: &PendingTrigger) -> Option<JobOutcome> {
        info!(target: "orchestrator", key = %trigger.key, job_id = %trigger.record.row_id, "processing trigger");
        match self.run_trigger(trigger).await {
            Ok(run) if run.outcome.is_posted() => {
                if let Err(err) = self.mirror.remove_trigger(&trigger.key).await {
                    warn!(target: "orchestrator", key = %trigger.key, error = %err, "trigger removal failed");
                }
                Some(run.outcome)
            }
            Ok(run) => {
                info!(target: "orchestrator", key = %trigger.key, outcome = ?run.outcome, "trigger kept");
                Some(run.outcome)
            }
            Err(err) => {
                error!(target: "orchestrator", key = %trigger.key, error = %err, "trigger run aborted by store");
                None
            }
        }
    }
}
