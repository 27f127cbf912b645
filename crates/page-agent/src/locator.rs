use std::time::Duration;

use autopost_core_types::protocol::{Diagnostic, NearMiss};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::model::{NodeRef, Query};
use crate::ports::PagePort;
use crate::scoring::{Scored, COMPOSE, OPENER};

/// Views that share container shapes with the composer but never post.
static REJECTED_VIEWS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://[^/]+/(?:[^?#]*/)?(?:live|events|marketplace)(?:[/?#]|$)")
        .expect("rejected view regex")
});

const OPENER_RETRY_GAP: Duration = Duration::from_secs(3);
const NEAR_MISS_LIMIT: usize = 5;

pub fn is_rejected_url(url: &str) -> bool {
    REJECTED_VIEWS.is_match(url)
}

#[derive(Clone, Debug, PartialEq)]
pub enum LocateOutcome {
    Found(Scored),
    Missing(Diagnostic),
}

/// Scored search for the compose surface.
pub struct ComposeLocator<'a> {
    page: &'a dyn PagePort,
    cfg: &'a AgentConfig,
}

impl<'a> ComposeLocator<'a> {
    pub fn new(page: &'a dyn PagePort, cfg: &'a AgentConfig) -> Self {
        Self { page, cfg }
    }

    #[instrument(skip_all, fields(threshold = self.cfg.compose_threshold))]
    pub async fn locate(&self) -> Result<LocateOutcome, AgentError> {
        let deadline = Instant::now() + self.cfg.locate_timeout();
        let mut last_open: Option<Instant> = None;
        let mut opener_clicks = 0;
        let mut ranked;

        loop {
            ranked = self.candidates().await?;
            if let Some(top) = ranked.first() {
                if top.score.total >= self.cfg.compose_threshold {
                    info!(
                        target: "page-agent",
                        node = %top.element.node,
                        score = top.score.total,
                        signals = ?top.score.signals,
                        "compose surface located"
                    );
                    return Ok(LocateOutcome::Found(top.clone()));
                }
            }

            let may_open = opener_clicks < self.cfg.opener_attempts
                && last_open.map_or(true, |at| at.elapsed() >= OPENER_RETRY_GAP);
            if may_open {
                if let Some(opener) = self.open_composer().await? {
                    debug!(target: "page-agent", node = %opener, "clicked composer opener");
                    opener_clicks += 1;
                    last_open = Some(Instant::now());
                }
            }

            if Instant::now() >= deadline {
                break;
            }
            sleep(self.cfg.locate_poll()).await;
        }

        let diagnostic = diagnose(self.page, &ranked).await?;
        warn!(
            target: "page-agent",
            dialogs = diagnostic.dialogs,
            editables = diagnostic.editables,
            near_misses = ?diagnostic.near_misses,
            "compose surface not found"
        );
        Ok(LocateOutcome::Missing(diagnostic))
    }

    pub async fn candidates(&self) -> Result<Vec<Scored>, AgentError> {
        let elements = self.page.query(None, Query::ComposeSurfaces).await?;
        Ok(COMPOSE.rank(elements))
    }

    async fn open_composer(&self) -> Result<Option<NodeRef>, AgentError> {
        let triggers = self.page.query(None, Query::OpenerTriggers).await?;
        let Some(best) = OPENER.best(triggers) else {
            return Ok(None);
        };
        self.page.click(best.element.node).await?;
        Ok(Some(best.element.node))
    }
}

/// Counts plus the best-scoring losers, for tuning after a miss.
pub(crate) async fn diagnose(page: &dyn PagePort, ranked: &[Scored]) -> Result<Diagnostic, AgentError> {
    Ok(Diagnostic {
        dialogs: page.count(None, Query::Dialogs).await?,
        editables: page.count(None, Query::Editables).await?,
        buttons: page.count(None, Query::Buttons).await?,
        near_misses: ranked
            .iter()
            .take(NEAR_MISS_LIMIT)
            .map(|scored| NearMiss {
                label: scored.element.describe(),
                score: scored.score.total,
            })
            .collect(),
    })
}
