use anyhow::Result;
use serde_json::json;

use super::context::CliContext;

pub async fn cmd_clear_schedule(ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    let cleared = services.orchestrator.clear_schedule().await?;
    if ctx.output().emit(&json!({ "enabled": false, "cleared": cleared }))? {
        return Ok(());
    }
    println!("Job timers switched off");
    Ok(())
}
