//! Wires configuration into a ready [`Orchestrator`].

use std::sync::Arc;

use anyhow::{Context, Result};
use autopost_job_store::{FileJobStore, JobStore, NullMirror, RemoteMirror, RestMirror, RestMirrorConfig};
use autopost_page_agent::media_channel;
use autopost_scheduler::{SystemClock, TimerFired, TimerRegistry};
use cdp_adapter::CdpAdapter;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};
use url::Url;

use crate::config::AppConfig;
use crate::media::{serve_media, MediaFetcher};
use crate::orchestrator::{Orchestrator, ScheduleSwitch};
use crate::session::{CdpHost, PageSessionController};
use crate::sheet::CsvSheetSource;

const MEDIA_QUEUE: usize = 16;

pub struct Services {
    pub orchestrator: Arc<Orchestrator>,
    pub adapter: Arc<CdpAdapter>,
    fired: Mutex<Option<mpsc::UnboundedReceiver<TimerFired>>>,
    pub mirror_configured: bool,
    pub sheet_configured: bool,
}

impl Services {
    /// Opens the store and builds every component. The browser is not
    /// contacted until [`Services::start_browser`].
    pub async fn build(cfg: &AppConfig) -> Result<Self> {
        tokio::fs::create_dir_all(&cfg.storage.data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", cfg.storage.data_dir.display()))?;
        let store: Arc<dyn JobStore> = FileJobStore::open(cfg.storage.jobs_path()).await?;
        debug!(path = %cfg.storage.jobs_path().display(), "job store opened");

        let mirror: Arc<dyn RemoteMirror> = match &cfg.mirror.base_url {
            Some(raw) => {
                let base_url = Url::parse(raw).with_context(|| format!("Invalid mirror url '{raw}'"))?;
                let mirror_cfg = RestMirrorConfig {
                    auth_token: cfg.mirror.auth_token.clone(),
                    write_retries: cfg.mirror.write_retries,
                    retry_delay: cfg.mirror.retry_delay(),
                    ..RestMirrorConfig::new(base_url)
                };
                info!(url = %raw, "remote mirror enabled");
                Arc::new(RestMirror::new(mirror_cfg)?)
            }
            None => Arc::new(NullMirror),
        };

        let fetcher = Arc::new(MediaFetcher::new(cfg.media.clone())?);
        let (media, media_rx) = media_channel(MEDIA_QUEUE, cfg.agent.media_fetch_timeout());
        tokio::spawn(serve_media(fetcher, media_rx));

        let adapter = CdpAdapter::new(cfg.browser.clone());
        let sessions = Arc::new(PageSessionController::new(
            Arc::new(CdpHost::new(Arc::clone(&adapter))),
            Arc::new(media),
            cfg.target.clone(),
            cfg.session.clone(),
            Arc::new(cfg.agent.clone()),
        ));

        let (timers, fired) = TimerRegistry::new(Arc::new(SystemClock));
        let mut orchestrator = Orchestrator::new(store, mirror, sessions, timers, cfg.posting.clone())
            .with_schedule_switch(ScheduleSwitch::at(cfg.storage.schedule_marker()));
        if let Some(url) = &cfg.sheet.csv_url {
            let sheet = CsvSheetSource::new(url.clone(), cfg.sheet.request_timeout())?;
            orchestrator = orchestrator.with_sheet(Arc::new(sheet));
        }

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            adapter,
            fired: Mutex::new(Some(fired)),
            mirror_configured: cfg.mirror.base_url.is_some(),
            sheet_configured: cfg.sheet.csv_url.is_some(),
        })
    }

    /// Fired timers, for the one daemon loop that dispatches them.
    pub fn take_fired(&self) -> Option<mpsc::UnboundedReceiver<TimerFired>> {
        self.fired.lock().take()
    }

    pub async fn start_browser(&self) -> Result<()> {
        self.adapter
            .start()
            .await
            .context("Failed to start or attach to the browser")?;
        info!("browser connected");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.adapter.shutdown().await;
    }
}
