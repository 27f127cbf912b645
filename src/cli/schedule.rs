use anyhow::Result;
use clap::Args;

use super::context::CliContext;
use super::run::{cmd_run, RunArgs};
use super::timers::print_timers;

#[derive(Args, Clone, Debug)]
pub struct ScheduleArgs {
    /// Only switch timers on and print them; do not start the daemon
    #[arg(long)]
    pub no_wait: bool,

    #[command(flatten)]
    pub run: RunArgs,
}

pub async fn cmd_schedule(args: ScheduleArgs, ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    let scheduled = services.orchestrator.set_schedule().await?;
    let timers = services.orchestrator.list_timers();
    if !ctx.output().emit(&timers)? {
        println!("Job timers switched on, {scheduled} scheduled");
        print_timers(&timers);
    }
    if args.no_wait {
        return Ok(());
    }
    cmd_run(args.run, ctx).await
}
