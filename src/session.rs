//! Page Session Controller: a tab on the target site hosting a responsive agent.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use autopost_core_types::protocol::Pong;
use autopost_page_agent::{AgentCell, AgentConfig, AgentHandle, CdpPagePort, MediaSource, PageAgent, PagePort};
use cdp_adapter::{CdpAdapter, TargetId};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::{SessionConfig, TargetConfig};
use crate::errors::SessionError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabInfo {
    pub id: TargetId,
    pub url: String,
}

/// Tab lifecycle operations of the host browser.
#[async_trait]
pub trait HostTabs: Send + Sync {
    async fn tabs(&self) -> Result<Vec<TabInfo>, SessionError>;
    async fn open(&self, url: &str) -> Result<TargetId, SessionError>;
    async fn focus(&self, tab: &TargetId) -> Result<(), SessionError>;
    async fn wait_loaded(&self, tab: &TargetId, timeout: Duration) -> Result<(), SessionError>;
    /// Injects the bridge into `tab` and returns a port over it.
    async fn attach(&self, tab: &TargetId) -> Result<Arc<dyn PagePort>, SessionError>;
}

/// Host tabs of the browser behind a CDP adapter.
pub struct CdpHost {
    adapter: Arc<CdpAdapter>,
}

impl CdpHost {
    pub fn new(adapter: Arc<CdpAdapter>) -> Self {
        Self { adapter }
    }
}

#[async_trait]
impl HostTabs for CdpHost {
    async fn tabs(&self) -> Result<Vec<TabInfo>, SessionError> {
        Ok(self
            .adapter
            .targets()
            .await?
            .into_iter()
            .map(|target| TabInfo {
                id: target.target_id,
                url: target.url,
            })
            .collect())
    }

    async fn open(&self, url: &str) -> Result<TargetId, SessionError> {
        Ok(self.adapter.create_target(url).await?)
    }

    async fn focus(&self, tab: &TargetId) -> Result<(), SessionError> {
        Ok(self.adapter.activate_target(tab).await?)
    }

    async fn wait_loaded(&self, tab: &TargetId, timeout: Duration) -> Result<(), SessionError> {
        Ok(self.adapter.wait_for_load(tab, timeout).await?)
    }

    async fn attach(&self, tab: &TargetId) -> Result<Arc<dyn PagePort>, SessionError> {
        let port = CdpPagePort::new(Arc::clone(&self.adapter), tab.clone());
        port.install_bridge().await?;
        Ok(Arc::new(port))
    }
}

/// A tab with an agent that answered its readiness ping.
#[derive(Clone, Debug)]
pub struct PageSession {
    pub tab: TargetId,
    pub agent: AgentHandle,
    pub pong: Pong,
}

pub struct PageSessionController {
    host: Arc<dyn HostTabs>,
    media: Arc<dyn MediaSource>,
    target: TargetConfig,
    cfg: SessionConfig,
    agent_cfg: Arc<AgentConfig>,
    current: Mutex<Option<PageSession>>,
    /// Busy flags by tab; re-attached agents inherit the tab's flag.
    cells: parking_lot::Mutex<HashMap<TargetId, Arc<AgentCell>>>,
}

impl PageSessionController {
    pub fn new(
        host: Arc<dyn HostTabs>,
        media: Arc<dyn MediaSource>,
        target: TargetConfig,
        cfg: SessionConfig,
        agent_cfg: Arc<AgentConfig>,
    ) -> Self {
        Self {
            host,
            media,
            target,
            cfg,
            agent_cfg,
            current: Mutex::new(None),
            cells: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn agent_config(&self) -> &AgentConfig {
        &self.agent_cfg
    }

    /// Returns the cached session when its agent still answers, otherwise
    /// finds or opens a tab, injects and pings until ready.
    ///
    /// Concurrent callers wait for the same establishment.
    #[instrument(skip(self), fields(domain = %self.target.domain))]
    pub async fn ensure_session(&self, prefer_existing_tab: bool) -> Result<PageSession, SessionError> {
        let mut current = self.current.lock().await;
        if let Some(session) = current.as_ref() {
            match session.agent.ping(self.cfg.ping_timeout()).await {
                Ok(pong) if pong.ready => {
                    debug!(target: "session", tab = %session.tab, state = ?pong.state, "reusing session");
                    return Ok(PageSession {
                        pong,
                        ..session.clone()
                    });
                }
                Ok(_) => debug!(target: "session", tab = %session.tab, "cached agent lost its bridge"),
                Err(err) => debug!(target: "session", tab = %session.tab, error = %err, "cached agent unreachable"),
            }
            *current = None;
        }

        let attempts = self.cfg.max_attempts.max(1);
        let mut last = String::from("no attempt made");
        for attempt in 1..=attempts {
            match self.establish(prefer_existing_tab).await {
                Ok(session) => {
                    info!(target: "session", attempt, tab = %session.tab, "page agent ready");
                    *current = Some(session.clone());
                    return Ok(session);
                }
                Err(err) => {
                    warn!(target: "session", attempt, max = attempts, error = %err, "session not ready");
                    last = err.to_string();
                }
            }
            if attempt < attempts {
                sleep(self.cfg.retry_delay() * attempt).await;
            }
        }
        Err(SessionError::NotReady { attempts, last })
    }

    /// Forgets the cached session so the next call re-injects.
    pub async fn invalidate(&self) {
        *self.current.lock().await = None;
    }

    async fn establish(&self, prefer_existing_tab: bool) -> Result<PageSession, SessionError> {
        let tab = self.find_or_open(prefer_existing_tab).await?;
        self.host.wait_loaded(&tab, self.cfg.load_timeout()).await?;
        let port = self.host.attach(&tab).await?;
        let cell = Arc::clone(self.cells.lock().entry(tab.clone()).or_default());
        let agent = PageAgent::with_cell(port, Arc::clone(&self.media), Arc::clone(&self.agent_cfg), cell).spawn();
        let pong = agent.ping(self.cfg.ping_timeout()).await?;
        if !pong.ready {
            return Err(SessionError::NotReady {
                attempts: 1,
                last: format!("bridge missing in {}", pong.url.as_deref().unwrap_or("unknown page")),
            });
        }
        Ok(PageSession { tab, agent, pong })
    }

    async fn find_or_open(&self, prefer_existing_tab: bool) -> Result<TargetId, SessionError> {
        if prefer_existing_tab {
            let existing = self
                .host
                .tabs()
                .await?
                .into_iter()
                .find(|tab| self.target.matches(&tab.url));
            if let Some(tab) = existing {
                debug!(target: "session", tab = %tab.id, url = %tab.url, "using existing tab");
                self.host.focus(&tab.id).await?;
                return Ok(tab.id);
            }
        }
        info!(target: "session", url = %self.target.home_url, "opening target tab");
        self.host.open(&self.target.home_url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autopost_core_types::protocol::{AgentResponse, AgentState, PostPayload, RejectReason};
    use autopost_page_agent::testing::{FakePage, StaticMedia};
    use autopost_page_agent::AgentError;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashMap;

    /// Host whose tabs are fake pages; the bridge only "takes" after
    /// `failing_injections` attaches.
    #[derive(Default)]
    struct FakeHost {
        tabs: SyncMutex<Vec<TabInfo>>,
        pages: SyncMutex<HashMap<TargetId, Arc<FakePage>>>,
        failing_injections: SyncMutex<u32>,
        opened: SyncMutex<Vec<String>>,
        attaches: SyncMutex<u32>,
    }

    impl FakeHost {
        fn with_tab(self, id: &str, url: &str) -> Self {
            let id = TargetId::new(id);
            self.tabs.lock().push(TabInfo {
                id: id.clone(),
                url: url.to_string(),
            });
            self.pages.lock().insert(id, Arc::new(FakePage::new(url)));
            self
        }
    }

    #[async_trait]
    impl HostTabs for FakeHost {
        async fn tabs(&self) -> Result<Vec<TabInfo>, SessionError> {
            Ok(self.tabs.lock().clone())
        }

        async fn open(&self, url: &str) -> Result<TargetId, SessionError> {
            let id = TargetId::new(format!("opened-{}", self.opened.lock().len() + 1));
            self.opened.lock().push(url.to_string());
            self.tabs.lock().push(TabInfo {
                id: id.clone(),
                url: url.to_string(),
            });
            self.pages.lock().insert(id.clone(), Arc::new(FakePage::new(url)));
            Ok(id)
        }

        async fn focus(&self, _tab: &TargetId) -> Result<(), SessionError> {
            Ok(())
        }

        async fn wait_loaded(&self, _tab: &TargetId, _timeout: Duration) -> Result<(), SessionError> {
            Ok(())
        }

        async fn attach(&self, tab: &TargetId) -> Result<Arc<dyn PagePort>, SessionError> {
            *self.attaches.lock() += 1;
            let page = self
                .pages
                .lock()
                .get(tab)
                .cloned()
                .ok_or_else(|| SessionError::NotReady {
                    attempts: 1,
                    last: format!("no tab {tab}"),
                })?;
            let mut failing = self.failing_injections.lock();
            if *failing > 0 {
                *failing -= 1;
                page.set_bridge(false);
            } else {
                page.set_bridge(true);
            }
            let port: Arc<dyn PagePort> = page;
            Ok(port)
        }
    }

    fn controller(host: Arc<FakeHost>, max_attempts: u32) -> PageSessionController {
        PageSessionController::new(
            host,
            Arc::new(StaticMedia::new()),
            TargetConfig::default(),
            SessionConfig {
                max_attempts,
                ..SessionConfig::default()
            },
            Arc::new(AgentConfig::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn existing_target_tab_is_reused() {
        let host = Arc::new(
            FakeHost::default()
                .with_tab("news", "https://news.example.com/")
                .with_tab("fb", "https://www.facebook.com/groups/1"),
        );
        let session = controller(host.clone(), 3).ensure_session(true).await.unwrap();
        assert_eq!(session.tab, TargetId::new("fb"));
        assert!(session.pong.ready);
        assert!(host.opened.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn home_tab_is_opened_when_none_matches() {
        let host = Arc::new(FakeHost::default().with_tab("news", "https://news.example.com/"));
        let session = controller(host.clone(), 3).ensure_session(true).await.unwrap();
        assert_eq!(session.tab, TargetId::new("opened-1"));
        assert_eq!(host.opened.lock().as_slice(), ["https://www.facebook.com/me".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn injection_is_retried_until_ready() {
        let host = Arc::new(FakeHost::default().with_tab("fb", "https://www.facebook.com/"));
        *host.failing_injections.lock() = 2;
        let session = controller(host.clone(), 5).ensure_session(true).await.unwrap();
        assert!(session.pong.ready);
        assert_eq!(*host.attaches.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_are_reported() {
        let host = Arc::new(FakeHost::default().with_tab("fb", "https://www.facebook.com/"));
        *host.failing_injections.lock() = 10;
        let err = controller(host.clone(), 3).ensure_session(true).await.unwrap_err();
        assert!(matches!(err, SessionError::NotReady { attempts: 3, .. }));
        assert_eq!(*host.attaches.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ready_session_is_cached() {
        let host = Arc::new(FakeHost::default().with_tab("fb", "https://www.facebook.com/"));
        let controller = controller(host.clone(), 3);
        controller.ensure_session(true).await.unwrap();
        controller.ensure_session(true).await.unwrap();
        assert_eq!(*host.attaches.lock(), 1);

        host.pages.lock()[&TargetId::new("fb")].set_bridge(false);
        controller.ensure_session(true).await.unwrap();
        assert_eq!(*host.attaches.lock(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reattached_agent_reports_the_abandoned_post() {
        // No composer: the first post keeps locating after its caller gives up.
        let host = Arc::new(FakeHost::default().with_tab("fb", "https://www.facebook.com/"));
        let controller = controller(host.clone(), 3);
        let first = controller.ensure_session(true).await.unwrap();
        let payload = PostPayload {
            content: "Hello".into(),
            media_urls: Vec::new(),
        };
        let abandoned = first.agent.post(payload.clone(), Duration::from_secs(2)).await;
        assert!(matches!(abandoned, Err(AgentError::Timeout { .. })));

        controller.invalidate().await;
        let second = controller.ensure_session(true).await.unwrap();
        assert_eq!(*host.attaches.lock(), 2);
        assert_eq!(second.pong.state, AgentState::Busy);
        match second.agent.post(payload, Duration::from_secs(2)).await.unwrap() {
            AgentResponse::Rejected(rejection) => assert_eq!(rejection.reason, RejectReason::AlreadyInProgress),
            other => panic!("unexpected {other:?}"),
        }
    }
}
