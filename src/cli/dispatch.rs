use super::clear_schedule::cmd_clear_schedule;
use super::env::CliArgs;
use super::inspect::cmd_inspect;
use super::jobs::cmd_jobs;
use super::post_now::cmd_post_now;
use super::reset::cmd_reset;
use super::resync::cmd_resync;
use super::run::cmd_run;
use super::schedule::cmd_schedule;
use super::status::cmd_status;
use super::timers::cmd_timers;
use crate::cli::commands::Commands;
use crate::cli::context::CliContext;
use anyhow::Result;

pub async fn dispatch(cli: &CliArgs, ctx: &CliContext) -> Result<()> {
    match cli.command.clone() {
        Commands::Run(args) => cmd_run(args, ctx).await,
        Commands::PostNow(args) => cmd_post_now(args, ctx).await,
        Commands::Schedule(args) => cmd_schedule(args, ctx).await,
        Commands::ClearSchedule => cmd_clear_schedule(ctx).await,
        Commands::Timers => cmd_timers(ctx).await,
        Commands::Resync => cmd_resync(ctx).await,
        Commands::Inspect => cmd_inspect(ctx).await,
        Commands::Jobs(args) => cmd_jobs(args, ctx).await,
        Commands::Reset(args) => cmd_reset(args, ctx).await,
        Commands::Status => cmd_status(ctx).await,
    }
}
