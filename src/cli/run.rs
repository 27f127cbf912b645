use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Do not poll the mirror for immediate triggers
    #[arg(long)]
    pub no_triggers: bool,

    /// Skip the start-up and periodic spreadsheet re-sync
    #[arg(long)]
    pub no_resync: bool,
}

pub async fn cmd_run(args: RunArgs, ctx: &CliContext) -> Result<()> {
    let services = ctx.services_with_browser().await?;
    let orchestrator = Arc::clone(&services.orchestrator);
    let fired = services
        .take_fired()
        .context("Timer dispatcher is already running")?;

    let shutdown = CancellationToken::new();
    let dispatcher = tokio::spawn(Arc::clone(&orchestrator).dispatch_timers(fired, shutdown.clone()));

    if services.sheet_configured && !args.no_resync {
        match orchestrator.resync().await {
            Ok(summary) => info!(jobs = summary.jobs, scheduled = summary.scheduled, "start-up resync done"),
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(error = %reason, "start-up resync failed, scheduling stored jobs");
                orchestrator.rebuild_schedule().await?;
            }
        }
        orchestrator.enable_resync(ctx.config().sheet.resync_interval())?;
    } else {
        orchestrator.rebuild_schedule().await?;
    }
    if !orchestrator.schedule_enabled() {
        warn!("Job timers are switched off; run `autopost schedule` to turn them on");
    }

    let poller = if services.mirror_configured && !args.no_triggers {
        let period = ctx.config().mirror.trigger_poll();
        Some(tokio::spawn(Arc::clone(&orchestrator).poll_triggers(period, shutdown.clone())))
    } else {
        None
    };

    info!("Daemon running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    shutdown.cancel();
    dispatcher.await?;
    if let Some(poller) = poller {
        poller.await?;
    }
    Ok(())
}
