use anyhow::Result;

use super::context::CliContext;

pub async fn cmd_resync(ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    let summary = services.orchestrator.resync().await?;
    if ctx.output().emit(&summary)? {
        return Ok(());
    }
    println!("Imported {} jobs, {} scheduled", summary.jobs, summary.scheduled);
    Ok(())
}
