use std::time::Duration;

use async_trait::async_trait;
use autopost_core_types::{MediaAsset, MediaFetchResult};
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::errors::AgentError;
use crate::model::{ElementSnapshot, NodeRef, Query, TextMode};

/// DOM operations the agent needs from a live page.
///
/// `scope: None` means the whole document; otherwise descendants of the
/// given element (the element itself excluded).
#[async_trait]
pub trait PagePort: Send + Sync {
    async fn bridge_installed(&self) -> Result<bool, AgentError>;
    async fn current_url(&self) -> Result<String, AgentError>;

    async fn query(&self, scope: Option<NodeRef>, query: Query) -> Result<Vec<ElementSnapshot>, AgentError>;
    async fn count(&self, scope: Option<NodeRef>, query: Query) -> Result<usize, AgentError>;
    async fn snapshot(&self, node: NodeRef) -> Result<Option<ElementSnapshot>, AgentError>;
    /// Up to `depth` ancestors, nearest first.
    async fn ancestors(&self, node: NodeRef, depth: usize) -> Result<Vec<NodeRef>, AgentError>;
    /// Innermost element rendering the same label as `node` (or `node`).
    async fn text_target(&self, node: NodeRef) -> Result<NodeRef, AgentError>;

    async fn click(&self, node: NodeRef) -> Result<(), AgentError>;
    /// Pointer move/press/release at the element's center.
    async fn pointer_click(&self, node: NodeRef) -> Result<(), AgentError>;
    async fn press_enter(&self, node: NodeRef) -> Result<(), AgentError>;

    /// Clears `node` and writes `text`; `true` when the editor shows it afterwards.
    async fn replace_text(&self, node: NodeRef, text: &str, mode: TextMode) -> Result<bool, AgentError>;
    async fn append_text(&self, node: NodeRef, text: &str) -> Result<(), AgentError>;
    /// Assigns `files` to a file input and fires its change events; returns the count it now holds.
    async fn assign_files(&self, input: NodeRef, files: &[MediaAsset]) -> Result<usize, AgentError>;
}

/// Source of media bytes. The page itself cannot fetch cross-origin.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn fetch(&self, url: &str) -> MediaFetchResult;
}

/// One fetch the agent asks the orchestrator to perform.
pub struct MediaRequest {
    pub url: String,
    pub reply: oneshot::Sender<MediaFetchResult>,
}

/// Media source that forwards every fetch over a channel.
#[derive(Clone)]
pub struct ChannelMediaSource {
    tx: mpsc::Sender<MediaRequest>,
    timeout: Duration,
}

pub fn media_channel(capacity: usize, timeout: Duration) -> (ChannelMediaSource, mpsc::Receiver<MediaRequest>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelMediaSource { tx, timeout }, rx)
}

#[async_trait]
impl MediaSource for ChannelMediaSource {
    async fn fetch(&self, url: &str) -> MediaFetchResult {
        let (reply, answer) = oneshot::channel();
        let request = MediaRequest {
            url: url.to_string(),
            reply,
        };
        if self.tx.send(request).await.is_err() {
            return MediaFetchResult::failed(url, "media service is not running");
        }
        match tokio::time::timeout(self.timeout, answer).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => MediaFetchResult::failed(url, "media service dropped the request"),
            Err(_) => {
                warn!(target: "page-agent", url, "media fetch timed out");
                MediaFetchResult::failed(url, format!("no answer within {:?}", self.timeout))
            }
        }
    }
}
