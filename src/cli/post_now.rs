use anyhow::Result;
use autopost_core_types::JobId;
use clap::Args;

use super::context::CliContext;
use crate::orchestrator::{JobOutcome, JobRun};

#[derive(Args, Clone, Debug)]
pub struct PostNowArgs {
    /// Post only this job
    #[arg(long, value_name = "ID")]
    pub job: Option<String>,
}

pub async fn cmd_post_now(args: PostNowArgs, ctx: &CliContext) -> Result<()> {
    let services = ctx.services_with_browser().await?;
    let runs = match args.job {
        Some(id) => vec![services.orchestrator.run_job(&JobId::new(id)).await?],
        None => services.orchestrator.start_posting().await?,
    };

    if ctx.output().emit(&runs)? {
        return Ok(());
    }
    if runs.is_empty() {
        println!("No pending jobs");
    }
    for run in &runs {
        println!("{}", describe(run));
    }
    Ok(())
}

pub(crate) fn describe(run: &JobRun) -> String {
    let detail = match &run.outcome {
        JobOutcome::Contended => "already running, left alone".to_string(),
        JobOutcome::Skipped { status: Some(status) } => format!("skipped, already {status}"),
        JobOutcome::Skipped { status: None } => "skipped, not in the store".to_string(),
        JobOutcome::Posted { status, report } if !report.media.errors.is_empty() => format!(
            "{status} ({} of {} media attached)",
            report.media.attached + report.media.linked,
            report.media.requested
        ),
        JobOutcome::Posted { status, .. } => status.to_string(),
        JobOutcome::Failed { reason, .. } => format!("failed: {reason}"),
    };
    format!("job {}: {detail}", run.job_id)
}
