//! Finds the publish control, clicks it, and watches the page for proof.
//!
//! No single DOM change reliably means "posted", so each click is followed
//! by a short polling window that accepts any of several side effects. A
//! visible progress overlay suspends the poll budget until its grace period
//! runs out.

use std::time::Duration;

use autopost_core_types::protocol::{Diagnostic, SuccessSignal};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

use crate::config::AgentConfig;
use crate::errors::AgentError;
use crate::locator::diagnose;
use crate::model::{ElementSnapshot, NodeRef, Query};
use crate::ports::PagePort;
use crate::scoring::{Scored, NEXT, SUBMIT};

/// "Next" screens seen in practice never chain more than twice.
const MAX_NEXT_STEPS: usize = 2;
const NEXT_SETTLE: Duration = Duration::from_millis(1_000);

const SUCCESS_PHRASES: &[&str] = &[
    "your post is now published",
    "bài viết của bạn đã được đăng",
    "đã đăng",
    "posted",
    "shared",
];

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    Confirmed(SuccessSignal),
    /// Every click went out but nothing observable changed.
    Unverified,
    NotFound(Diagnostic),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ClickStrategy {
    /// Plain click on the innermost element carrying the label.
    Direct,
    /// Click on the n-th ancestor of the control.
    Ancestor(usize),
    PointerSequence,
    Enter,
}

const STRATEGIES: [ClickStrategy; 5] = [
    ClickStrategy::Direct,
    ClickStrategy::Ancestor(1),
    ClickStrategy::Ancestor(2),
    ClickStrategy::PointerSequence,
    ClickStrategy::Enter,
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Observation {
    Confirmed(SuccessSignal),
    Processing,
    Unchanged,
}

pub struct SubmitResolver<'a> {
    page: &'a dyn PagePort,
    cfg: &'a AgentConfig,
}

impl<'a> SubmitResolver<'a> {
    pub fn new(page: &'a dyn PagePort, cfg: &'a AgentConfig) -> Self {
        Self { page, cfg }
    }

    #[instrument(skip_all, fields(surface = %surface))]
    pub async fn submit(&self, surface: NodeRef) -> Result<SubmitOutcome, AgentError> {
        let deadline = Instant::now() + self.cfg.submit_search();
        let mut next_steps = 0;

        loop {
            let scope = self.live_surface(surface).await?;
            let buttons = self.page.query(scope, Query::Buttons).await?;

            if next_steps < MAX_NEXT_STEPS {
                if let Some(next) = NEXT.best(buttons.clone()) {
                    info!(
                        target: "page-agent",
                        node = %next.element.node,
                        label = %next.element.describe(),
                        "clicking intermediate step"
                    );
                    let target = self.page.text_target(next.element.node).await?;
                    self.page.click(target).await?;
                    next_steps += 1;
                    sleep(NEXT_SETTLE).await;
                    continue;
                }
            }

            let ranked = SUBMIT.rank(buttons);
            if let Some(control) = ranked.first().filter(|top| top.score.total >= SUBMIT.threshold) {
                info!(
                    target: "page-agent",
                    node = %control.element.node,
                    score = control.score.total,
                    signals = ?control.score.signals,
                    "submit control located"
                );
                return self.click_and_verify(scope, control.element.node).await;
            }

            if Instant::now() >= deadline {
                let diagnostic = diagnose(self.page, &ranked).await?;
                warn!(
                    target: "page-agent",
                    buttons = diagnostic.buttons,
                    near_misses = ?diagnostic.near_misses,
                    "submit control not found"
                );
                return Ok(SubmitOutcome::NotFound(diagnostic));
            }
            sleep(self.cfg.submit_poll()).await;
        }
    }

    /// Submit candidates in the live surface, best first.
    pub async fn candidates(&self, surface: Option<NodeRef>) -> Result<Vec<Scored>, AgentError> {
        let scope = match surface {
            Some(surface) => self.live_surface(surface).await?,
            None => None,
        };
        let buttons = self.page.query(scope, Query::Buttons).await?;
        Ok(SUBMIT.rank(buttons))
    }

    /// The original surface while it is shown, else the topmost visible dialog.
    async fn live_surface(&self, surface: NodeRef) -> Result<Option<NodeRef>, AgentError> {
        if self
            .page
            .snapshot(surface)
            .await?
            .is_some_and(|snapshot| snapshot.visible)
        {
            return Ok(Some(surface));
        }
        let dialogs = self.page.query(None, Query::Dialogs).await?;
        Ok(dialogs.iter().rev().find(|dialog| dialog.visible).map(|dialog| dialog.node))
    }

    async fn click_and_verify(&self, watch: Option<NodeRef>, control: NodeRef) -> Result<SubmitOutcome, AgentError> {
        let mut polls = 0;
        let mut overlay_since: Option<Instant> = None;

        for strategy in STRATEGIES.iter().cycle().take(self.cfg.max_clicks) {
            if polls >= self.cfg.max_polls {
                break;
            }
            match self.dispatch(*strategy, control).await {
                Ok(()) => debug!(target: "page-agent", ?strategy, "click dispatched"),
                Err(err @ (AgentError::TargetGone(_) | AgentError::BridgeMissing)) => return Err(err),
                Err(err) => debug!(target: "page-agent", ?strategy, error = %err, "click dispatch failed"),
            }

            let mut window = 0;
            while window < self.cfg.polls_per_click && polls < self.cfg.max_polls {
                sleep(self.cfg.submit_poll()).await;
                match self.observe(watch, control).await? {
                    Observation::Confirmed(signal) => {
                        info!(target: "page-agent", ?signal, ?strategy, "submission confirmed");
                        return Ok(SubmitOutcome::Confirmed(signal));
                    }
                    Observation::Processing => {
                        let since = *overlay_since.get_or_insert_with(Instant::now);
                        if since.elapsed() < self.cfg.overlay_grace() {
                            continue;
                        }
                    }
                    Observation::Unchanged => {}
                }
                window += 1;
                polls += 1;
            }
        }

        warn!(
            target: "page-agent",
            polls,
            "click budget spent without an observable change"
        );
        Ok(SubmitOutcome::Unverified)
    }

    async fn dispatch(&self, strategy: ClickStrategy, control: NodeRef) -> Result<(), AgentError> {
        match strategy {
            ClickStrategy::Direct => {
                let target = self.page.text_target(control).await?;
                self.page.click(target).await
            }
            ClickStrategy::Ancestor(depth) => {
                let ancestors = self.page.ancestors(control, depth).await?;
                let target = ancestors.get(depth.saturating_sub(1)).copied().unwrap_or(control);
                self.page.click(target).await
            }
            ClickStrategy::PointerSequence => self.page.pointer_click(control).await,
            ClickStrategy::Enter => self.page.press_enter(control).await,
        }
    }

    async fn observe(&self, watch: Option<NodeRef>, control: NodeRef) -> Result<Observation, AgentError> {
        if let Some(surface) = watch {
            let shown = self
                .page
                .snapshot(surface)
                .await?
                .is_some_and(|snapshot| snapshot.visible);
            if !shown {
                return Ok(Observation::Confirmed(SuccessSignal::SurfaceGone));
            }
        }

        let Some(state) = self.page.snapshot(control).await?.filter(|snapshot| snapshot.visible) else {
            return Ok(Observation::Confirmed(SuccessSignal::ControlGone));
        };

        let statuses = self.page.query(None, Query::StatusRegions).await?;
        if statuses.iter().any(announces_success) {
            return Ok(Observation::Confirmed(SuccessSignal::SuccessIndicator));
        }

        if state.disabled || state.aria_disabled || state.busy {
            return Ok(Observation::Confirmed(SuccessSignal::ControlBusy));
        }

        let overlays = self.page.query(None, Query::ProgressIndicators).await?;
        if overlays.iter().any(|overlay| overlay.visible) {
            return Ok(Observation::Processing);
        }
        Ok(Observation::Unchanged)
    }
}

fn announces_success(region: &ElementSnapshot) -> bool {
    region.visible
        && region
            .spoken_labels()
            .iter()
            .any(|label| SUCCESS_PHRASES.iter().any(|phrase| label.contains(phrase)))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::testing::{ClickKind, Effect, FakeNode, FakePage};

    fn dialog_with_footer(page: &FakePage) -> (NodeRef, NodeRef) {
        let dialog = page.add(None, FakeNode::dialog("Create post"));
        page.add(Some(dialog), FakeNode::editor("What's on your mind?"));
        let footer = page.add(Some(dialog), FakeNode::element("div"));
        (dialog, footer)
    }

    #[tokio::test(start_paused = true)]
    async fn next_is_clicked_before_post() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, footer) = dialog_with_footer(&page);
        let next = page.add(Some(footer), FakeNode::button("Next"));
        let post = page.add(Some(footer), FakeNode::button("Post"));
        page.on_click(next, vec![Effect::Remove(next)]);
        page.on_click(post, vec![Effect::Remove(dialog)]);

        let cfg = AgentConfig::default();
        let outcome = SubmitResolver::new(&page, &cfg).submit(dialog).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Confirmed(SuccessSignal::SurfaceGone));
        let next_at = page.first_click(next).unwrap();
        let post_at = page.first_click(post).unwrap();
        assert!(next_at < post_at);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_through_click_strategies() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, footer) = dialog_with_footer(&page);
        let post = page.add(Some(footer), FakeNode::button("Post"));
        // Direct and pointer clicks both land on the control; only the second registers.
        page.on_click_nth(post, 2, vec![Effect::Remove(post)]);

        let cfg = AgentConfig::default();
        let outcome = SubmitResolver::new(&page, &cfg).submit(dialog).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Confirmed(SuccessSignal::ControlGone));
        let clicks = page.clicks();
        let kinds: Vec<ClickKind> = clicks.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            vec![ClickKind::Click, ClickKind::Click, ClickKind::Click, ClickKind::Pointer]
        );
        assert_eq!(clicks[1].node, footer);
        assert_eq!(clicks[2].node, dialog);
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_control_counts_as_success() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, footer) = dialog_with_footer(&page);
        let post = page.add(Some(footer), FakeNode::button("Đăng"));
        page.on_click(post, vec![Effect::Disable(post)]);

        let cfg = AgentConfig::default();
        let outcome = SubmitResolver::new(&page, &cfg).submit(dialog).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Confirmed(SuccessSignal::ControlBusy));
    }

    #[tokio::test(start_paused = true)]
    async fn success_toast_confirms() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, footer) = dialog_with_footer(&page);
        let post = page.add(Some(footer), FakeNode::button("Post"));
        page.on_click(
            post,
            vec![Effect::Add {
                parent: None,
                node: FakeNode::status("Your post is now published."),
            }],
        );

        let cfg = AgentConfig::default();
        let outcome = SubmitResolver::new(&page, &cfg).submit(dialog).await.unwrap();
        assert_eq!(outcome, SubmitOutcome::Confirmed(SuccessSignal::SuccessIndicator));
    }

    #[tokio::test(start_paused = true)]
    async fn overlay_pauses_the_poll_budget() {
        let page = Arc::new(FakePage::new("https://www.facebook.com/"));
        let (dialog, footer) = dialog_with_footer(&page);
        let post = page.add(Some(footer), FakeNode::button("Post"));
        page.on_click(
            post,
            vec![Effect::Add {
                parent: None,
                node: FakeNode::progress(),
            }],
        );

        // Longer than five unpaused click windows.
        let slow = page.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(15)).await;
            slow.apply(Effect::Remove(dialog));
        });

        let cfg = AgentConfig::default();
        let outcome = SubmitResolver::new(page.as_ref(), &cfg).submit(dialog).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Confirmed(SuccessSignal::SurfaceGone));
        assert_eq!(page.clicks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_budget_is_unverified() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, footer) = dialog_with_footer(&page);
        page.add(Some(footer), FakeNode::button("Post"));

        let cfg = AgentConfig::default();
        let outcome = SubmitResolver::new(&page, &cfg).submit(dialog).await.unwrap();

        assert_eq!(outcome, SubmitOutcome::Unverified);
        let clicks = page.clicks();
        assert_eq!(clicks.len(), cfg.max_clicks);
        assert_eq!(clicks.last().map(|c| c.kind), Some(ClickKind::Enter));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_control_reports_near_misses() {
        let page = FakePage::new("https://www.facebook.com/");
        let (dialog, footer) = dialog_with_footer(&page);
        page.add(Some(footer), FakeNode::button("Cancel"));

        let cfg = AgentConfig::default();
        match SubmitResolver::new(&page, &cfg).submit(dialog).await.unwrap() {
            SubmitOutcome::NotFound(diagnostic) => {
                assert_eq!(diagnostic.buttons, 1);
                assert_eq!(diagnostic.near_misses[0].label, "Cancel");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(page.clicks().is_empty());
    }
}
