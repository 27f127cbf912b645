//! The long-lived task that owns one page and answers orchestrator requests.
//!
//! Pings and inspections are answered at any time; a post runs on its own
//! task so the agent stays responsive while it is `Busy`.

use std::sync::Arc;
use std::time::Duration;

use autopost_core_types::now_millis;
use autopost_core_types::protocol::{
    AgentRequest, AgentResponse, AgentState, CandidateSummary, Inspection, MediaSummary, Pong, PostPayload,
    PostReport, PostStage, RejectReason, Rejection, RequestEnvelope, SubmitVerdict,
};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, instrument, warn};

use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::inserter::ContentInserter;
use crate::locator::{diagnose, is_rejected_url, ComposeLocator, LocateOutcome};
use crate::ports::{MediaSource, PagePort};
use crate::scoring::Scored;
use crate::submit::{SubmitOutcome, SubmitResolver};

const INBOX_CAPACITY: usize = 16;
const CANDIDATE_LIMIT: usize = 5;

pub type Envelope = (RequestEnvelope, oneshot::Sender<AgentResponse>);

/// Idle/Busy flag shared between the agent loop and its post tasks.
#[derive(Debug, Default)]
pub struct AgentCell {
    state: Mutex<AgentState>,
}

impl AgentCell {
    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    /// Flips to `Busy` unless a post is already running.
    pub fn try_begin(self: &Arc<Self>) -> Option<BusyGuard> {
        let mut state = self.state.lock();
        if *state == AgentState::Busy {
            return None;
        }
        *state = AgentState::Busy;
        Some(BusyGuard { cell: Arc::clone(self) })
    }
}

/// Returns the cell to `Idle` on every exit path.
pub struct BusyGuard {
    cell: Arc<AgentCell>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        *self.cell.state.lock() = AgentState::Idle;
    }
}

/// Orchestrator-side sender for one agent.
#[derive(Clone, Debug)]
pub struct AgentHandle {
    tx: mpsc::Sender<Envelope>,
}

impl AgentHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Envelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues `envelope` and hands back the reply slot without waiting on it.
    pub async fn enqueue(&self, envelope: RequestEnvelope) -> Result<oneshot::Receiver<AgentResponse>, AgentError> {
        let (reply, answer) = oneshot::channel();
        self.tx
            .send((envelope, reply))
            .await
            .map_err(|_| AgentError::Disconnected)?;
        Ok(answer)
    }

    pub async fn send(&self, envelope: RequestEnvelope, timeout: Duration) -> Result<AgentResponse, AgentError> {
        let name = envelope.request.name();
        let answer = self.enqueue(envelope).await?;
        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(AgentError::Disconnected),
            Err(_) => Err(AgentError::Timeout {
                request: name,
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn request(&self, request: AgentRequest, timeout: Duration) -> Result<AgentResponse, AgentError> {
        self.send(RequestEnvelope::new(request), timeout).await
    }

    pub async fn ping(&self, timeout: Duration) -> Result<Pong, AgentError> {
        match self.request(AgentRequest::Ping, timeout).await? {
            AgentResponse::Pong(pong) => Ok(pong),
            other => Err(unexpected("Pong", &other)),
        }
    }

    /// Either a `PostResult` or a `Rejected` answer.
    pub async fn post(&self, payload: PostPayload, timeout: Duration) -> Result<AgentResponse, AgentError> {
        self.request(AgentRequest::PostRequest(payload), timeout).await
    }

    pub async fn inspect(&self, timeout: Duration) -> Result<Inspection, AgentError> {
        match self.request(AgentRequest::DebugInspect, timeout).await? {
            AgentResponse::Inspection(inspection) => Ok(inspection),
            AgentResponse::Error { message } => Err(AgentError::Page(message)),
            other => Err(unexpected("Inspection", &other)),
        }
    }
}

fn unexpected(wanted: &str, got: &AgentResponse) -> AgentError {
    AgentError::Protocol(format!("expected {wanted}, got {got:?}"))
}

/// Drives one page on behalf of the orchestrator.
pub struct PageAgent {
    page: Arc<dyn PagePort>,
    media: Arc<dyn MediaSource>,
    cfg: Arc<AgentConfig>,
    cell: Arc<AgentCell>,
}

/// How far a post got before it stopped, kept for error reports.
#[derive(Default)]
struct Progress {
    stage: Option<PostStage>,
    media: MediaSummary,
}

impl PageAgent {
    pub fn new(page: Arc<dyn PagePort>, media: Arc<dyn MediaSource>, cfg: Arc<AgentConfig>) -> Self {
        Self::with_cell(page, media, cfg, Arc::new(AgentCell::default()))
    }

    /// Shares `cell` with earlier agents on the same page, so a post that
    /// outlived its handle still counts as in flight.
    pub fn with_cell(
        page: Arc<dyn PagePort>,
        media: Arc<dyn MediaSource>,
        cfg: Arc<AgentConfig>,
        cell: Arc<AgentCell>,
    ) -> Self {
        Self { page, media, cfg, cell }
    }

    pub fn state(&self) -> AgentState {
        self.cell.state()
    }

    pub fn spawn(self) -> AgentHandle {
        let (handle, rx) = AgentHandle::channel(INBOX_CAPACITY);
        tokio::spawn(self.serve(rx));
        handle
    }

    /// Answers envelopes until every handle is dropped.
    pub async fn serve(self, mut rx: mpsc::Receiver<Envelope>) {
        let agent = Arc::new(self);
        while let Some((envelope, reply)) = rx.recv().await {
            Arc::clone(&agent).dispatch(envelope, reply).await;
        }
        debug!(target: "page-agent", "inbox closed");
    }

    async fn dispatch(self: Arc<Self>, envelope: RequestEnvelope, reply: oneshot::Sender<AgentResponse>) {
        let name = envelope.request.name();
        if envelope.is_stale(now_millis()) {
            warn!(target: "page-agent", request = name, timestamp = envelope.timestamp, "dropping stale request");
            let _ = reply.send(AgentResponse::Rejected(Rejection {
                reason: RejectReason::Stale,
                message: format!("{name} request is stale"),
            }));
            return;
        }

        match envelope.request {
            AgentRequest::Ping => {
                let _ = reply.send(AgentResponse::Pong(self.pong().await));
            }
            AgentRequest::DebugInspect => {
                tokio::spawn(async move {
                    let response = match self.inspect().await {
                        Ok(inspection) => AgentResponse::Inspection(inspection),
                        Err(err) => AgentResponse::error(err.to_string()),
                    };
                    let _ = reply.send(response);
                });
            }
            AgentRequest::PostRequest(payload) => {
                let Some(guard) = self.cell.try_begin() else {
                    info!(target: "page-agent", "post already in progress, rejecting");
                    let _ = reply.send(AgentResponse::already_in_progress());
                    return;
                };
                tokio::spawn(async move {
                    let report = self.post(&payload).await;
                    drop(guard);
                    let _ = reply.send(AgentResponse::PostResult(report));
                });
            }
        }
    }

    async fn pong(&self) -> Pong {
        Pong {
            ready: self.page.bridge_installed().await.unwrap_or(false),
            state: self.cell.state(),
            url: self.page.current_url().await.ok(),
        }
    }

    /// Runs the whole post flow; failures come back as a report, never a panic.
    #[instrument(skip_all, fields(len = payload.content.len(), media = payload.media_urls.len()))]
    pub async fn post(&self, payload: &PostPayload) -> PostReport {
        let mut progress = Progress::default();
        match self.run_post(payload, &mut progress).await {
            Ok(report) => {
                info!(
                    target: "page-agent",
                    success = report.success,
                    stage = ?report.stage,
                    verdict = ?report.verdict,
                    "post finished"
                );
                report
            }
            Err(err) => {
                let stage = progress.stage.unwrap_or(PostStage::Preflight);
                error!(target: "page-agent", ?stage, error = %err, "post aborted");
                PostReport {
                    media: progress.media,
                    ..PostReport::failed(stage, err.to_string())
                }
            }
        }
    }

    async fn run_post(&self, payload: &PostPayload, progress: &mut Progress) -> Result<PostReport, AgentError> {
        progress.stage = Some(PostStage::Preflight);
        if !self.page.bridge_installed().await? {
            return Err(AgentError::BridgeMissing);
        }
        let url = self.page.current_url().await?;
        if is_rejected_url(&url) {
            return Ok(PostReport::failed(
                PostStage::Preflight,
                format!("{url} is not a feed view"),
            ));
        }

        progress.stage = Some(PostStage::Compose);
        let surface = match ComposeLocator::new(self.page.as_ref(), &self.cfg).locate().await? {
            LocateOutcome::Found(found) => found.element,
            LocateOutcome::Missing(diagnostic) => {
                return Ok(PostReport {
                    diagnostic: Some(diagnostic),
                    ..PostReport::failed(PostStage::Compose, "compose surface not found")
                });
            }
        };

        progress.stage = Some(PostStage::Content);
        let inserter = ContentInserter::new(self.page.as_ref(), self.media.as_ref(), &self.cfg);
        let editor = inserter.resolve_editor(&surface).await?;
        let text = payload.content.trim();
        if !text.is_empty() {
            let Some(editor) = editor else {
                return Ok(PostReport::failed(PostStage::Content, "compose surface has no editor"));
            };
            if !inserter.insert_content(editor, text).await? {
                return Ok(PostReport::failed(PostStage::Content, "editor did not accept the text"));
            }
        }

        progress.stage = Some(PostStage::Media);
        let media = inserter
            .attach_media(surface.node, editor, &payload.media_urls)
            .await?;
        progress.media = media.clone();
        if !media.is_usable() && text.is_empty() {
            return Ok(PostReport {
                media,
                ..PostReport::failed(PostStage::Media, "none of the media could be attached")
            });
        }

        progress.stage = Some(PostStage::Submit);
        let outcome = SubmitResolver::new(self.page.as_ref(), &self.cfg)
            .submit(surface.node)
            .await?;
        Ok(match outcome {
            SubmitOutcome::Confirmed(signal) => PostReport {
                success: true,
                stage: PostStage::Finished,
                verdict: Some(SubmitVerdict::Confirmed(signal)),
                media,
                message: None,
                diagnostic: None,
            },
            SubmitOutcome::Unverified => PostReport {
                success: true,
                stage: PostStage::Finished,
                verdict: Some(SubmitVerdict::Unverified),
                media,
                message: Some("submit clicked but no confirmation observed".into()),
                diagnostic: None,
            },
            SubmitOutcome::NotFound(diagnostic) => PostReport {
                media,
                diagnostic: Some(diagnostic),
                ..PostReport::failed(PostStage::Submit, "submit control not found")
            },
        })
    }

    /// Current candidates and counts, for tuning from the CLI.
    pub async fn inspect(&self) -> Result<Inspection, AgentError> {
        let compose = ComposeLocator::new(self.page.as_ref(), &self.cfg)
            .candidates()
            .await?;
        let surface = compose
            .first()
            .filter(|top| top.score.total >= self.cfg.compose_threshold)
            .map(|top| top.element.node);
        let submit = SubmitResolver::new(self.page.as_ref(), &self.cfg)
            .candidates(surface)
            .await?;
        Ok(Inspection {
            url: self.page.current_url().await.ok(),
            state: self.cell.state(),
            diagnostic: diagnose(self.page.as_ref(), &compose).await?,
            compose_candidates: summarize(&compose),
            submit_candidates: summarize(&submit),
        })
    }
}

fn summarize(ranked: &[Scored]) -> Vec<CandidateSummary> {
    ranked
        .iter()
        .take(CANDIDATE_LIMIT)
        .map(|scored| CandidateSummary {
            label: scored.element.describe(),
            score: scored.score.total,
            role: scored.element.role.clone(),
        })
        .collect()
}
