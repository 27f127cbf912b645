use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::async_process::Child;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::target::SessionId as CdpSessionId;
use chromiumoxide::cdp::events::CdpEventMessage;
use chromiumoxide::conn::Connection;
use chromiumoxide::error::CdpError;
use chromiumoxide_types::{CallId, CdpJsonEventMessage, Message, MethodId, Response};
use futures::{future::BoxFuture, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::CdpConfig;
use crate::error::{AdapterError, AdapterErrorKind};
use crate::util::extract_ws_url;

#[derive(Clone, Debug)]
pub struct TransportEvent {
    pub method: String,
    pub params: Value,
    pub session_id: Option<String>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandTarget {
    Browser,
    Session(String),
}

/// Raw command/event channel to the browser.
#[async_trait]
pub trait CdpTransport: Send + Sync {
    async fn start(&self) -> Result<(), AdapterError>;
    async fn next_event(&self) -> Option<TransportEvent>;
    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl CdpTransport for NoopTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        None
    }

    async fn send_command(
        &self,
        _target: CommandTarget,
        method: &str,
        _params: Value,
    ) -> Result<Value, AdapterError> {
        Err(AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("transport not available for method {method}")))
    }
}

type LinkFactory =
    Arc<dyn Fn(CdpConfig) -> BoxFuture<'static, Result<Arc<BrowserLink>, AdapterError>> + Send + Sync>;

/// Transport over a chromiumoxide connection.
///
/// The link is created lazily on first use and transparently recreated when
/// the previous one died (browser closed, websocket dropped, heartbeat lost).
#[derive(Clone)]
pub struct ChromiumTransport {
    cfg: CdpConfig,
    link: Arc<OnceCell<Mutex<Option<Arc<BrowserLink>>>>>,
    factory: LinkFactory,
}

impl ChromiumTransport {
    pub fn new(cfg: CdpConfig) -> Self {
        let factory: LinkFactory = Arc::new(|cfg: CdpConfig| {
            Box::pin(async move { Ok(Arc::new(BrowserLink::open(cfg).await?)) })
        });

        Self {
            cfg,
            link: Arc::new(OnceCell::new()),
            factory,
        }
    }

    async fn link(&self) -> Result<Arc<BrowserLink>, AdapterError> {
        let cell = self.link.get_or_init(|| async { Mutex::new(None) }).await;
        let mut guard = cell.lock().await;

        if let Some(link) = guard.as_ref() {
            if link.is_alive() {
                return Ok(link.clone());
            }
            warn!(target: "cdp-transport", "browser link lost, reconnecting");
        }

        let link = (self.factory)(self.cfg.clone()).await?;
        *guard = Some(link.clone());
        Ok(link)
    }

    fn deadline(&self) -> Duration {
        Duration::from_millis(self.cfg.default_deadline_ms)
    }

    #[cfg(test)]
    fn with_factory(cfg: CdpConfig, factory: LinkFactory) -> Self {
        Self {
            cfg,
            link: Arc::new(OnceCell::new()),
            factory,
        }
    }
}

#[async_trait]
impl CdpTransport for ChromiumTransport {
    async fn start(&self) -> Result<(), AdapterError> {
        let link = self.link().await?;
        link.call(
            CommandTarget::Browser,
            "Target.setDiscoverTargets",
            json!({ "discover": true }),
            self.deadline(),
        )
        .await?;
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        match self.link().await {
            Ok(link) => link.next_event().await,
            Err(err) => {
                warn!(target: "cdp-transport", ?err, "transport not ready");
                None
            }
        }
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, AdapterError> {
        let link = self.link().await?;
        link.call(target, method, params, self.deadline()).await
    }
}

struct PendingCommand {
    target: CommandTarget,
    method: String,
    params: Value,
    reply: oneshot::Sender<Result<Value, AdapterError>>,
}

type Inflight = HashMap<CallId, oneshot::Sender<Result<Value, AdapterError>>>;

/// One live websocket connection plus the tasks that pump it.
struct BrowserLink {
    commands: mpsc::Sender<PendingCommand>,
    events: Mutex<mpsc::Receiver<TransportEvent>>,
    pump: JoinHandle<()>,
    heartbeat: Option<JoinHandle<()>>,
    child: Mutex<Option<Child>>,
    alive: Arc<AtomicBool>,
}

impl BrowserLink {
    async fn open(cfg: CdpConfig) -> Result<Self, AdapterError> {
        let (child, ws_url) = match cfg.websocket_url.clone() {
            Some(url) => (None, url),
            None => launch_browser(&cfg).await?,
        };

        let conn = Connection::<CdpEventMessage>::connect(&ws_url)
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        let (command_tx, command_rx) = mpsc::channel(128);
        let (event_tx, event_rx) = mpsc::channel(512);
        let alive = Arc::new(AtomicBool::new(true));

        let pump_alive = alive.clone();
        let pump = tokio::spawn(async move {
            let outcome = pump(conn, command_rx, event_tx).await;
            pump_alive.store(false, Ordering::Relaxed);
            if let Err(err) = outcome {
                error!(target: "cdp-transport", ?err, "browser link terminated with error");
            }
        });

        let heartbeat = spawn_heartbeat(
            command_tx.clone(),
            alive.clone(),
            Duration::from_millis(cfg.heartbeat_interval_ms),
            Duration::from_millis(cfg.default_deadline_ms),
        );

        info!(target: "cdp-transport", url = %ws_url, "browser link established");

        Ok(Self {
            commands: command_tx,
            events: Mutex::new(event_rx),
            pump,
            heartbeat,
            child: Mutex::new(child),
            alive,
        })
    }

    #[cfg(test)]
    fn detached() -> (Arc<Self>, Arc<AtomicBool>) {
        let (commands, _command_rx) = mpsc::channel(8);
        let (_event_tx, event_rx) = mpsc::channel(8);
        let alive = Arc::new(AtomicBool::new(true));
        let pump = tokio::spawn(futures::future::pending::<()>());
        (
            Arc::new(Self {
                commands,
                events: Mutex::new(event_rx),
                pump,
                heartbeat: None,
                child: Mutex::new(None),
                alive: alive.clone(),
            }),
            alive,
        )
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn call(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
        deadline: Duration,
    ) -> Result<Value, AdapterError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(PendingCommand {
                target,
                method: method.to_string(),
                params,
                reply,
            })
            .await
            .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

        match tokio::time::timeout(deadline, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
                .with_hint(format!("{method}: response channel closed"))),
            Err(_) => Err(AdapterError::new(AdapterErrorKind::Timeout)
                .with_hint(format!("{method} timed out"))
                .retriable(true)),
        }
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        self.events.lock().await.recv().await
    }
}

impl Drop for BrowserLink {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        self.pump.abort();
        if let Some(handle) = &self.heartbeat {
            handle.abort();
        }

        let Ok(mut guard) = self.child.try_lock() else {
            return;
        };
        if let Some(mut child) = guard.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(err) = child.kill().await {
                            warn!(target: "cdp-transport", ?err, "failed to kill chromium child");
                        }
                    });
                }
                Err(_) => {
                    debug!(target: "cdp-transport", "no runtime available to kill chromium child");
                }
            }
        }
    }
}

async fn pump(
    mut conn: Connection<CdpEventMessage>,
    mut commands: mpsc::Receiver<PendingCommand>,
    events: mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let mut inflight: Inflight = HashMap::new();

    loop {
        tokio::select! {
            Some(cmd) = commands.recv() => submit(&mut conn, cmd, &mut inflight)?,
            message = conn.next() => match message {
                Some(Ok(Message::Response(resp))) => {
                    if let Some(reply) = inflight.remove(&resp.id) {
                        let _ = reply.send(response_payload(resp));
                    }
                }
                Some(Ok(Message::Event(event))) => {
                    if let Err(err) = forward_event(event, &events).await {
                        warn!(target: "cdp-transport", ?err, "failed to forward event");
                    }
                }
                Some(Err(err)) => {
                    let err = map_cdp_error(err);
                    fail_all(&mut inflight, &err);
                    return Err(err);
                }
                None => {
                    let err = AdapterError::new(AdapterErrorKind::CdpIo).with_hint("cdp connection closed");
                    fail_all(&mut inflight, &err);
                    return Ok(());
                }
            }
        }
    }
}

fn submit(
    conn: &mut Connection<CdpEventMessage>,
    cmd: PendingCommand,
    inflight: &mut Inflight,
) -> Result<(), AdapterError> {
    let session = match cmd.target {
        CommandTarget::Browser => None,
        CommandTarget::Session(id) => Some(CdpSessionId::from(id)),
    };
    let method: MethodId = cmd.method.into();
    match conn.submit_command(method, session, cmd.params) {
        Ok(call_id) => {
            inflight.insert(call_id, cmd.reply);
            Ok(())
        }
        Err(err) => {
            let err = AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string());
            let _ = cmd.reply.send(Err(err.clone()));
            Err(err)
        }
    }
}

fn fail_all(inflight: &mut Inflight, err: &AdapterError) {
    for (_, reply) in inflight.drain() {
        let _ = reply.send(Err(err.clone()));
    }
}

async fn forward_event(
    event: CdpEventMessage,
    events: &mpsc::Sender<TransportEvent>,
) -> Result<(), AdapterError> {
    let raw: CdpJsonEventMessage = event.try_into().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("failed to decode cdp event: {err}"))
    })?;

    events
        .send(TransportEvent {
            method: raw.method.into_owned(),
            params: raw.params,
            session_id: raw.session_id,
        })
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::Internal).with_hint(err.to_string()))
}

fn response_payload(resp: Response) -> Result<Value, AdapterError> {
    match (resp.result, resp.error) {
        (Some(result), _) => Ok(result),
        (None, Some(error)) => Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("cdp error {}: {}", error.code, error.message))
            .retriable(error.code >= 500)),
        (None, None) => Err(AdapterError::new(AdapterErrorKind::Internal).with_hint("empty cdp response")),
    }
}

fn map_cdp_error(err: CdpError) -> AdapterError {
    let hint = err.to_string();
    match err {
        CdpError::Timeout => AdapterError::new(AdapterErrorKind::Timeout)
            .with_hint(hint)
            .retriable(true),
        CdpError::JavascriptException(_) => {
            AdapterError::new(AdapterErrorKind::ScriptException).with_hint(hint)
        }
        CdpError::FrameNotFound(_) | CdpError::Serde(_) => {
            AdapterError::new(AdapterErrorKind::Internal).with_hint(hint)
        }
        _ => AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(hint)
            .retriable(true),
    }
}

fn spawn_heartbeat(
    commands: mpsc::Sender<PendingCommand>,
    alive: Arc<AtomicBool>,
    every: Duration,
    deadline: Duration,
) -> Option<JoinHandle<()>> {
    if every.is_zero() {
        return None;
    }
    let deadline = deadline.min(Duration::from_secs(5));

    Some(tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while alive.load(Ordering::Relaxed) {
            ticker.tick().await;
            let (reply, response) = oneshot::channel();
            let probe = PendingCommand {
                target: CommandTarget::Browser,
                method: "Browser.getVersion".to_string(),
                params: json!({}),
                reply,
            };
            if commands.send(probe).await.is_err() {
                debug!(target: "cdp-transport", "heartbeat channel closed");
                break;
            }
            match tokio::time::timeout(deadline, response).await {
                Ok(Ok(Ok(_))) => {}
                Ok(Ok(Err(err))) => {
                    warn!(target: "cdp-transport", ?err, "heartbeat command error");
                    alive.store(false, Ordering::Relaxed);
                }
                Ok(Err(_)) => {
                    debug!(target: "cdp-transport", "heartbeat response dropped");
                    alive.store(false, Ordering::Relaxed);
                }
                Err(_) => {
                    warn!(target: "cdp-transport", "heartbeat timed out");
                    alive.store(false, Ordering::Relaxed);
                }
            }
        }
    }))
}

async fn launch_browser(cfg: &CdpConfig) -> Result<(Option<Child>, String), AdapterError> {
    let config = browser_config(cfg)?;
    let mut child = config.launch().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("failed to launch chromium: {err}"))
    })?;

    let ws_url = extract_ws_url(&mut child, Duration::from_secs(cfg.launch_timeout_secs))
        .await
        .map_err(|err| AdapterError::new(AdapterErrorKind::CdpIo).with_hint(err.to_string()))?;

    Ok((Some(child), ws_url))
}

fn browser_config(cfg: &CdpConfig) -> Result<BrowserConfig, AdapterError> {
    if !cfg.executable.as_os_str().is_empty() && !cfg.executable.exists() {
        return Err(AdapterError::new(AdapterErrorKind::CdpIo)
            .with_hint(format!("chrome executable not found at {}", cfg.executable.display()))
            .with_data(json!({
                "expected": cfg.executable,
                "hint": "Set AUTOPOST_CHROME to the full path of chrome/chromium."
            })));
    }

    let profile_dir = absolute_profile_dir(&cfg.user_data_dir)?;
    fs::create_dir_all(&profile_dir).map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("failed to ensure user-data-dir: {err}"))
    })?;

    let mut builder = BrowserConfig::builder()
        .request_timeout(Duration::from_millis(cfg.default_deadline_ms))
        .launch_timeout(Duration::from_secs(cfg.launch_timeout_secs));

    if !cfg.headless {
        builder = builder.with_head();
    }

    if std::env::var("AUTOPOST_DISABLE_SANDBOX")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        builder = builder.no_sandbox();
    }

    // Background tabs must keep their timers running while the agent polls.
    let mut args = vec![
        "--disable-background-timer-throttling",
        "--disable-backgrounding-occluded-windows",
        "--disable-renderer-backgrounding",
        "--disable-popup-blocking",
        "--no-first-run",
        "--no-default-browser-check",
        "--remote-allow-origins=*",
    ];
    if cfg.headless {
        args.push("--headless=new");
        args.push("--mute-audio");
    }
    builder = builder.args(args);

    if !cfg.executable.as_os_str().is_empty() {
        builder = builder.chrome_executable(cfg.executable.clone());
    }
    builder = builder.user_data_dir(profile_dir);

    builder.build().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal).with_hint(format!("browser config error: {err}"))
    })
}

fn absolute_profile_dir(dir: &PathBuf) -> Result<PathBuf, AdapterError> {
    if dir.is_absolute() {
        return Ok(dir.clone());
    }
    let cwd = std::env::current_dir().map_err(|err| {
        AdapterError::new(AdapterErrorKind::Internal)
            .with_hint(format!("failed to resolve cwd for user-data-dir: {err}"))
    })?;
    Ok(cwd.join(dir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn reconnects_after_link_dies() {
        let opened = Arc::new(AtomicUsize::new(0));
        let flags: Arc<std::sync::Mutex<Vec<Arc<AtomicBool>>>> = Arc::default();

        let factory: LinkFactory = {
            let opened = opened.clone();
            let flags = flags.clone();
            Arc::new(move |_cfg: CdpConfig| {
                let opened = opened.clone();
                let flags = flags.clone();
                Box::pin(async move {
                    opened.fetch_add(1, Ordering::SeqCst);
                    let (link, alive) = BrowserLink::detached();
                    flags.lock().unwrap().push(alive);
                    Ok(link)
                })
            })
        };

        let transport = ChromiumTransport::with_factory(CdpConfig::default(), factory);

        let first = transport.link().await.expect("first link");
        let again = transport.link().await.expect("cached link");
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(opened.load(Ordering::SeqCst), 1);

        flags.lock().unwrap()[0].store(false, Ordering::SeqCst);

        let second = transport.link().await.expect("second link");
        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cdp_errors_map_to_kinds() {
        let err = response_payload(Response {
            id: CallId::new(1),
            result: None,
            error: Some(chromiumoxide_types::Error {
                code: -32000,
                message: "No target with given id found".into(),
            }),
        })
        .unwrap_err();
        assert_eq!(err.kind, AdapterErrorKind::CdpIo);
        assert!(!err.retriable);
        assert!(err.is_target_gone());
    }
}
