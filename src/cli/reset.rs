use anyhow::{bail, Result};
use clap::Args;
use serde_json::json;

use super::context::CliContext;

#[derive(Args, Clone, Debug)]
pub struct ResetArgs {
    /// Confirm deleting every stored job
    #[arg(long)]
    pub yes: bool,
}

pub async fn cmd_reset(args: ResetArgs, ctx: &CliContext) -> Result<()> {
    if !args.yes {
        bail!("Refusing to delete stored jobs without --yes");
    }
    let services = ctx.services().await?;
    services.orchestrator.reset().await?;
    if ctx.output().emit(&json!({ "cleared": true }))? {
        return Ok(());
    }
    println!("Stored jobs deleted");
    Ok(())
}
