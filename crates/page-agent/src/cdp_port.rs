use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autopost_core_types::MediaAsset;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use cdp_adapter::{CdpAdapter, TargetId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, instrument};

use crate::bridge::{call_expression, probe_expression, unwrap_reply, BRIDGE_SOURCE};
use crate::errors::AgentError;
use crate::model::{normalize, ElementSnapshot, NodeRef, Query, TextMode};
use crate::ports::PagePort;

const POINTER_STEP: Duration = Duration::from_millis(40);
const VERIFY_DELAY: Duration = Duration::from_millis(150);

#[derive(Debug, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

/// Page port backed by a live tab, talking to the injected bridge.
pub struct CdpPagePort {
    adapter: Arc<CdpAdapter>,
    target: TargetId,
}

impl CdpPagePort {
    pub fn new(adapter: Arc<CdpAdapter>, target: TargetId) -> Self {
        Self { adapter, target }
    }

    pub fn target(&self) -> &TargetId {
        &self.target
    }

    /// Registers the bridge for future documents and installs it in the current one.
    #[instrument(skip(self), fields(tab = %self.target))]
    pub async fn install_bridge(&self) -> Result<(), AgentError> {
        self.adapter.add_init_script(&self.target, BRIDGE_SOURCE).await?;
        self.adapter.evaluate(&self.target, BRIDGE_SOURCE).await?;
        debug!(target: "page-agent", "bridge installed");
        Ok(())
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, args: &[Value]) -> Result<T, AgentError> {
        let raw = self
            .adapter
            .evaluate(&self.target, &call_expression(method, args))
            .await?;
        Ok(serde_json::from_value(unwrap_reply(raw)?)?)
    }

    async fn shows(&self, node: NodeRef, text: &str) -> Result<bool, AgentError> {
        sleep(VERIFY_DELAY).await;
        let current: Option<String> = self.call("textOf", &[json!(node)]).await?;
        Ok(current.is_some_and(|current| normalize(&current).contains(&normalize(text))))
    }
}

#[async_trait]
impl PagePort for CdpPagePort {
    async fn bridge_installed(&self) -> Result<bool, AgentError> {
        let value = self.adapter.evaluate(&self.target, &probe_expression()).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn current_url(&self) -> Result<String, AgentError> {
        let value = self.adapter.evaluate(&self.target, "location.href").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn query(&self, scope: Option<NodeRef>, query: Query) -> Result<Vec<ElementSnapshot>, AgentError> {
        self.call("query", &[json!(scope), json!(query.selector())]).await
    }

    async fn count(&self, scope: Option<NodeRef>, query: Query) -> Result<usize, AgentError> {
        self.call("count", &[json!(scope), json!(query.selector())]).await
    }

    async fn snapshot(&self, node: NodeRef) -> Result<Option<ElementSnapshot>, AgentError> {
        self.call("snapshot", &[json!(node)]).await
    }

    async fn ancestors(&self, node: NodeRef, depth: usize) -> Result<Vec<NodeRef>, AgentError> {
        self.call("ancestors", &[json!(node), json!(depth)]).await
    }

    async fn text_target(&self, node: NodeRef) -> Result<NodeRef, AgentError> {
        let target: Option<NodeRef> = self.call("textTarget", &[json!(node)]).await?;
        Ok(target.unwrap_or(node))
    }

    async fn click(&self, node: NodeRef) -> Result<(), AgentError> {
        let clicked: bool = self.call("click", &[json!(node)]).await?;
        if clicked {
            Ok(())
        } else {
            Err(AgentError::Page(format!("node {node} is detached")))
        }
    }

    async fn pointer_click(&self, node: NodeRef) -> Result<(), AgentError> {
        let Some(Point { x, y }) = self.call::<Option<Point>>("center", &[json!(node)]).await? else {
            return Err(AgentError::Page(format!("node {node} is detached")));
        };
        for kind in ["mouseMoved", "mousePressed", "mouseReleased"] {
            self.adapter
                .dispatch_mouse_event(&self.target, kind, x, y, 1)
                .await?;
            sleep(POINTER_STEP).await;
        }
        Ok(())
    }

    async fn press_enter(&self, node: NodeRef) -> Result<(), AgentError> {
        let _focused: bool = self.call("focus", &[json!(node)]).await?;
        self.adapter
            .press_key(&self.target, "Enter", "Enter", 13, Some("\r"))
            .await?;
        Ok(())
    }

    #[instrument(skip(self, text), fields(tab = %self.target, node = %node, len = text.len()))]
    async fn replace_text(&self, node: NodeRef, text: &str, mode: TextMode) -> Result<bool, AgentError> {
        match mode {
            TextMode::PlainUrl => {
                let written: bool = self.call("insertPlain", &[json!(node), json!(text)]).await?;
                Ok(written && self.shows(node, text).await?)
            }
            TextMode::Body => {
                let cleared: bool = self.call("clear", &[json!(node)]).await?;
                if !cleared {
                    return Ok(false);
                }
                // Trusted input first: editor frameworks keep their own model and
                // ignore raw DOM writes.
                self.adapter.insert_text(&self.target, text).await?;
                if self.shows(node, text).await? {
                    return Ok(true);
                }
                debug!(target: "page-agent", "trusted insert not reflected, writing through the DOM");
                let written: bool = self.call("setText", &[json!(node), json!(text)]).await?;
                Ok(written && self.shows(node, text).await?)
            }
        }
    }

    async fn append_text(&self, node: NodeRef, text: &str) -> Result<(), AgentError> {
        let appended: bool = self.call("appendText", &[json!(node), json!(text)]).await?;
        if appended {
            Ok(())
        } else {
            Err(AgentError::Page(format!("node {node} is detached")))
        }
    }

    async fn assign_files(&self, input: NodeRef, files: &[MediaAsset]) -> Result<usize, AgentError> {
        let payload: Vec<Value> = files
            .iter()
            .map(|file| {
                json!({
                    "name": file.filename,
                    "type": file.mime_type,
                    "data": STANDARD.encode(&file.bytes),
                })
            })
            .collect();
        self.call("assignFiles", &[json!(input), Value::Array(payload)]).await
    }
}
