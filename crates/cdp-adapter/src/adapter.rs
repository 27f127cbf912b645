use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::select;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::transport::{CdpTransport, ChromiumTransport, CommandTarget, TransportEvent};

const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetId(pub String);

impl TargetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetInfo {
    pub target_id: TargetId,
    pub kind: String,
    pub url: String,
    pub title: String,
    pub attached: bool,
}

impl TargetInfo {
    fn from_cdp(raw: &Value) -> Option<Self> {
        Some(Self {
            target_id: TargetId::new(raw.get("targetId")?.as_str()?),
            kind: raw.get("type")?.as_str()?.to_string(),
            url: raw.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
            title: raw
                .get("title")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            attached: raw.get("attached").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// Target-level view over a CDP transport.
///
/// Sessions are attached lazily (flattened) and cached per target until the
/// browser reports the target detached or destroyed.
pub struct CdpAdapter {
    cfg: CdpConfig,
    transport: Arc<dyn CdpTransport>,
    sessions: DashMap<TargetId, String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl CdpAdapter {
    pub fn new(cfg: CdpConfig) -> Arc<Self> {
        let transport: Arc<dyn CdpTransport> = Arc::new(ChromiumTransport::new(cfg.clone()));
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: CdpConfig, transport: Arc<dyn CdpTransport>) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            transport,
            sessions: DashMap::new(),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &CdpConfig {
        &self.cfg
    }

    pub async fn start(self: &Arc<Self>) -> Result<(), AdapterError> {
        self.transport.start().await?;
        let adapter = Arc::clone(self);
        let handle = tokio::spawn(async move { adapter.event_loop().await });
        self.tasks.lock().await.push(handle);
        info!(target: "cdp-adapter", "adapter started");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        self.sessions.clear();
    }

    async fn event_loop(self: Arc<Self>) {
        const MIN_BACKOFF: Duration = Duration::from_millis(100);
        const MAX_BACKOFF: Duration = Duration::from_secs(5);
        let mut backoff = MIN_BACKOFF;

        loop {
            select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => match event {
                    Some(event) => {
                        backoff = MIN_BACKOFF;
                        self.on_event(event);
                    }
                    None => {
                        if self.shutdown.is_cancelled() {
                            break;
                        }
                        // Sessions belong to the dead connection.
                        self.sessions.clear();
                        warn!(target: "cdp-adapter", "transport stream ended; restarting");
                        if let Err(err) = self.transport.start().await {
                            warn!(target: "cdp-adapter", ?err, "transport restart failed");
                        }
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
        debug!(target: "cdp-adapter", "event loop exiting");
    }

    fn on_event(&self, event: TransportEvent) {
        match event.method.as_str() {
            "Target.targetDestroyed" | "Target.detachedFromTarget" => {
                if let Some(target) = event.params.get("targetId").and_then(Value::as_str) {
                    if self.sessions.remove(&TargetId::new(target)).is_some() {
                        debug!(target: "cdp-adapter", tab = target, method = %event.method, "session evicted");
                    }
                } else if let Some(session) = event.params.get("sessionId").and_then(Value::as_str) {
                    self.sessions.retain(|_, cached| cached.as_str() != session);
                }
            }
            "Target.targetCrashed" => {
                if let Some(target) = event.params.get("targetId").and_then(Value::as_str) {
                    warn!(target: "cdp-adapter", tab = target, "target crashed");
                    self.sessions.remove(&TargetId::new(target));
                }
            }
            _ => {}
        }
    }

    async fn browser_command(&self, method: &str, params: Value) -> Result<Value, AdapterError> {
        self.transport
            .send_command(CommandTarget::Browser, method, params)
            .await
    }

    /// Open page targets, in the order the browser lists them.
    pub async fn targets(&self) -> Result<Vec<TargetInfo>, AdapterError> {
        let response = self.browser_command("Target.getTargets", json!({})).await?;
        let infos = response
            .get("targetInfos")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(TargetInfo::from_cdp)
                    .filter(|info| info.kind == "page")
                    .collect()
            })
            .unwrap_or_default();
        Ok(infos)
    }

    pub async fn create_target(&self, url: &str) -> Result<TargetId, AdapterError> {
        let response = self
            .browser_command("Target.createTarget", json!({ "url": url }))
            .await?;
        response
            .get("targetId")
            .and_then(Value::as_str)
            .map(TargetId::new)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("createTarget response missing targetId")
                    .with_data(response.clone())
            })
    }

    pub async fn activate_target(&self, target: &TargetId) -> Result<(), AdapterError> {
        self.browser_command("Target.activateTarget", json!({ "targetId": target.as_str() }))
            .await
            .map_err(|err| not_found_if_gone(err, target))?;
        Ok(())
    }

    pub async fn close_target(&self, target: &TargetId) -> Result<(), AdapterError> {
        self.sessions.remove(target);
        self.browser_command("Target.closeTarget", json!({ "targetId": target.as_str() }))
            .await
            .map_err(|err| not_found_if_gone(err, target))?;
        Ok(())
    }

    pub fn has_session(&self, target: &TargetId) -> bool {
        self.sessions.contains_key(target)
    }

    async fn session_for(&self, target: &TargetId) -> Result<String, AdapterError> {
        if let Some(session) = self.sessions.get(target) {
            return Ok(session.value().clone());
        }

        let response = self
            .browser_command(
                "Target.attachToTarget",
                json!({ "targetId": target.as_str(), "flatten": true }),
            )
            .await
            .map_err(|err| not_found_if_gone(err, target))?;
        let session = response
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                AdapterError::new(AdapterErrorKind::Internal)
                    .with_hint("attachToTarget response missing sessionId")
            })?;

        debug!(target: "cdp-adapter", tab = %target, session = %session, "attached to target");
        self.sessions.insert(target.clone(), session.clone());
        Ok(session)
    }

    pub async fn send_target_command(
        &self,
        target: &TargetId,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let session = self.session_for(target).await?;
        match self
            .transport
            .send_command(CommandTarget::Session(session), method, params)
            .await
        {
            Ok(value) => Ok(value),
            Err(err) if err.is_target_gone() => {
                self.sessions.remove(target);
                Err(not_found_if_gone(err, target))
            }
            Err(err) => Err(err),
        }
    }

    /// Evaluates `expression` in the tab's main world and returns the value.
    ///
    /// Promises are awaited and the call carries a user gesture so that
    /// focus and clipboard-adjacent APIs behave as for a real click.
    pub async fn evaluate(&self, target: &TargetId, expression: &str) -> Result<Value, AdapterError> {
        let response = self
            .send_target_command(
                target,
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "awaitPromise": true,
                    "returnByValue": true,
                    "userGesture": true,
                }),
            )
            .await?;

        if let Some(details) = response.get("exceptionDetails") {
            let description = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script raised exception")
                .to_string();
            return Err(AdapterError::new(AdapterErrorKind::ScriptException)
                .with_hint(description)
                .with_data(details.clone()));
        }

        Ok(response
            .pointer("/result/value")
            .cloned()
            .unwrap_or(Value::Null))
    }

    pub async fn ready_state(&self, target: &TargetId) -> Result<String, AdapterError> {
        let value = self.evaluate(target, "document.readyState").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    pub async fn wait_for_load(&self, target: &TargetId, timeout: Duration) -> Result<(), AdapterError> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.ready_state(target).await {
                Ok(state) if state == "complete" => return Ok(()),
                Ok(_) => {}
                // Navigation tears down the execution context mid-evaluate.
                Err(err) if err.kind == AdapterErrorKind::ScriptException => {}
                Err(err) => return Err(err),
            }
            if Instant::now() >= deadline {
                return Err(AdapterError::new(AdapterErrorKind::Timeout)
                    .with_hint(format!("page {target} not loaded within {timeout:?}"))
                    .retriable(true));
            }
            sleep(LOAD_POLL_INTERVAL).await;
        }
    }

    pub async fn navigate(&self, target: &TargetId, url: &str) -> Result<(), AdapterError> {
        let response = self
            .send_target_command(target, "Page.navigate", json!({ "url": url }))
            .await?;
        if let Some(error) = response.get("errorText").and_then(Value::as_str) {
            return Err(AdapterError::new(AdapterErrorKind::CdpIo).with_hint(format!("navigate failed: {error}")));
        }
        Ok(())
    }

    /// Registers `source` to run in every new document of the tab.
    pub async fn add_init_script(&self, target: &TargetId, source: &str) -> Result<String, AdapterError> {
        self.send_target_command(target, "Page.enable", json!({})).await?;
        let response = self
            .send_target_command(
                target,
                "Page.addScriptToEvaluateOnNewDocument",
                json!({ "source": source }),
            )
            .await?;
        Ok(response
            .get("identifier")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    pub async fn dispatch_mouse_event(
        &self,
        target: &TargetId,
        kind: &str,
        x: f64,
        y: f64,
        click_count: u32,
    ) -> Result<(), AdapterError> {
        let mut params = json!({ "type": kind, "x": x, "y": y });
        if kind != "mouseMoved" {
            params["button"] = json!("left");
            params["clickCount"] = json!(click_count);
        }
        self.send_target_command(target, "Input.dispatchMouseEvent", params)
            .await?;
        Ok(())
    }

    pub async fn press_key(
        &self,
        target: &TargetId,
        key: &str,
        code: &str,
        key_code: u32,
        text: Option<&str>,
    ) -> Result<(), AdapterError> {
        let mut down = json!({
            "type": "keyDown",
            "key": key,
            "code": code,
            "windowsVirtualKeyCode": key_code,
            "nativeVirtualKeyCode": key_code,
        });
        if let Some(text) = text {
            down["text"] = json!(text);
        }
        self.send_target_command(target, "Input.dispatchKeyEvent", down)
            .await?;
        self.send_target_command(
            target,
            "Input.dispatchKeyEvent",
            json!({
                "type": "keyUp",
                "key": key,
                "code": code,
                "windowsVirtualKeyCode": key_code,
                "nativeVirtualKeyCode": key_code,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn insert_text(&self, target: &TargetId, text: &str) -> Result<(), AdapterError> {
        self.send_target_command(target, "Input.insertText", json!({ "text": text }))
            .await?;
        Ok(())
    }
}

fn not_found_if_gone(err: AdapterError, target: &TargetId) -> AdapterError {
    if err.is_target_gone() {
        AdapterError::new(AdapterErrorKind::TargetNotFound)
            .with_hint(format!("target {target} is gone"))
            .with_data(json!({ "cause": err.hint }))
    } else {
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::mpsc;

    struct MockTransport {
        started: AtomicBool,
        rx: Mutex<mpsc::Receiver<TransportEvent>>,
        commands: Mutex<Vec<(CommandTarget, String, Value)>>,
        responses: Mutex<VecDeque<Result<Value, AdapterError>>>,
    }

    impl MockTransport {
        fn new_pair() -> (Arc<Self>, mpsc::Sender<TransportEvent>) {
            let (tx, rx) = mpsc::channel(16);
            (
                Arc::new(Self {
                    started: AtomicBool::new(false),
                    rx: Mutex::new(rx),
                    commands: Mutex::new(Vec::new()),
                    responses: Mutex::new(VecDeque::new()),
                }),
                tx,
            )
        }

        async fn respond(&self, value: Value) {
            self.responses.lock().await.push_back(Ok(value));
        }

        async fn fail(&self, err: AdapterError) {
            self.responses.lock().await.push_back(Err(err));
        }

        async fn methods(&self) -> Vec<String> {
            self.commands
                .lock()
                .await
                .iter()
                .map(|(_, method, _)| method.clone())
                .collect()
        }

        async fn last(&self) -> (CommandTarget, String, Value) {
            self.commands.lock().await.last().cloned().expect("a command")
        }
    }

    #[async_trait]
    impl CdpTransport for MockTransport {
        async fn start(&self) -> Result<(), AdapterError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn next_event(&self) -> Option<TransportEvent> {
            self.rx.lock().await.recv().await
        }

        async fn send_command(
            &self,
            target: CommandTarget,
            method: &str,
            params: Value,
        ) -> Result<Value, AdapterError> {
            self.commands
                .lock()
                .await
                .push((target, method.to_string(), params));
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or(Ok(Value::Null))
        }
    }

    fn adapter_with(transport: Arc<MockTransport>) -> Arc<CdpAdapter> {
        CdpAdapter::with_transport(CdpConfig::default(), transport)
    }

    #[tokio::test]
    async fn targets_lists_pages_only() {
        let (transport, _tx) = MockTransport::new_pair();
        transport
            .respond(json!({
                "targetInfos": [
                    { "targetId": "A", "type": "page", "url": "https://www.facebook.com/", "title": "Facebook", "attached": false },
                    { "targetId": "B", "type": "service_worker", "url": "https://www.facebook.com/sw.js", "title": "", "attached": false },
                    { "targetId": "C", "type": "page", "url": "chrome://newtab/", "title": "New Tab", "attached": true }
                ]
            }))
            .await;
        let adapter = adapter_with(transport);

        let targets = adapter.targets().await.unwrap();
        let ids: Vec<_> = targets.iter().map(|t| t.target_id.as_str()).collect();
        assert_eq!(ids, vec!["A", "C"]);
        assert_eq!(targets[0].url, "https://www.facebook.com/");
    }

    #[tokio::test]
    async fn session_is_attached_once_per_target() {
        let (transport, _tx) = MockTransport::new_pair();
        transport.respond(json!({ "sessionId": "S1" })).await;
        transport.respond(json!({ "result": { "type": "number", "value": 2 } })).await;
        transport.respond(json!({ "result": { "type": "number", "value": 3 } })).await;
        let adapter = adapter_with(transport.clone());
        let tab = TargetId::new("T1");

        assert_eq!(adapter.evaluate(&tab, "1 + 1").await.unwrap(), json!(2));
        assert_eq!(adapter.evaluate(&tab, "1 + 2").await.unwrap(), json!(3));

        assert_eq!(
            transport.methods().await,
            vec!["Target.attachToTarget", "Runtime.evaluate", "Runtime.evaluate"]
        );
        let (target, _, params) = transport.last().await;
        assert_eq!(target, CommandTarget::Session("S1".into()));
        assert_eq!(params["awaitPromise"], json!(true));
        assert_eq!(params["returnByValue"], json!(true));
    }

    #[tokio::test]
    async fn script_exception_is_reported() {
        let (transport, _tx) = MockTransport::new_pair();
        transport.respond(json!({ "sessionId": "S1" })).await;
        transport
            .respond(json!({
                "result": { "type": "object" },
                "exceptionDetails": {
                    "text": "Uncaught",
                    "exception": { "description": "ReferenceError: nope is not defined" }
                }
            }))
            .await;
        let adapter = adapter_with(transport);

        let err = adapter.evaluate(&TargetId::new("T1"), "nope()").await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::ScriptException);
        assert!(err.hint.unwrap().contains("ReferenceError"));
    }

    #[tokio::test]
    async fn gone_target_evicts_session() {
        let (transport, _tx) = MockTransport::new_pair();
        transport.respond(json!({ "sessionId": "S1" })).await;
        transport
            .fail(AdapterError::new(AdapterErrorKind::CdpIo).with_hint("cdp error -32001: Session with given id not found."))
            .await;
        let adapter = adapter_with(transport);
        let tab = TargetId::new("T1");

        let err = adapter.insert_text(&tab, "hi").await.unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::TargetNotFound);
        assert!(!adapter.has_session(&tab));
    }

    #[tokio::test]
    async fn detach_event_evicts_cached_session() {
        let (transport, tx) = MockTransport::new_pair();
        transport.respond(json!({ "sessionId": "S1" })).await;
        let adapter = adapter_with(transport.clone());
        adapter.start().await.unwrap();
        assert!(transport.started.load(Ordering::SeqCst));

        let tab = TargetId::new("T1");
        adapter.evaluate(&tab, "1").await.unwrap();
        assert!(adapter.has_session(&tab));

        tx.send(TransportEvent {
            method: "Target.detachedFromTarget".into(),
            params: json!({ "sessionId": "S1", "targetId": "T1" }),
            session_id: None,
        })
        .await
        .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while adapter.has_session(&tab) {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("session evicted");

        adapter.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_load_times_out_while_loading() {
        let (transport, _tx) = MockTransport::new_pair();
        transport.respond(json!({ "sessionId": "S1" })).await;
        let adapter = adapter_with(transport.clone());
        for _ in 0..64 {
            transport.respond(json!({ "result": { "value": "loading" } })).await;
        }

        let err = adapter
            .wait_for_load(&TargetId::new("T1"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::Timeout);
    }

    #[tokio::test]
    async fn wait_for_load_returns_when_complete() {
        let (transport, _tx) = MockTransport::new_pair();
        transport.respond(json!({ "sessionId": "S1" })).await;
        transport.respond(json!({ "result": { "value": "interactive" } })).await;
        transport.respond(json!({ "result": { "value": "complete" } })).await;
        let adapter = adapter_with(transport);

        adapter
            .wait_for_load(&TargetId::new("T1"), Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn press_key_sends_down_then_up() {
        let (transport, _tx) = MockTransport::new_pair();
        transport.respond(json!({ "sessionId": "S1" })).await;
        let adapter = adapter_with(transport.clone());

        adapter
            .press_key(&TargetId::new("T1"), "Enter", "Enter", 13, Some("\r"))
            .await
            .unwrap();

        let commands = transport.commands.lock().await.clone();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[1].2["type"], json!("keyDown"));
        assert_eq!(commands[1].2["text"], json!("\r"));
        assert_eq!(commands[2].2["type"], json!("keyUp"));
    }
}
