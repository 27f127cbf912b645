use clap::Subcommand;

use super::jobs::JobsArgs;
use super::post_now::PostNowArgs;
use super::reset::ResetArgs;
use super::run::RunArgs;
use super::schedule::ScheduleArgs;

#[derive(Subcommand, Clone)]
pub enum Commands {
    /// Run the daemon: job timers, periodic re-sync and remote triggers
    Run(RunArgs),

    /// Post pending jobs right away, ignoring their due times
    PostNow(PostNowArgs),

    /// Switch job timers on, show when each pending job fires and keep them running
    Schedule(ScheduleArgs),

    /// Switch job timers off; the re-sync timer is kept
    ClearSchedule,

    /// Show the timers the daemon would run with the stored jobs
    Timers,

    /// Re-import jobs from the spreadsheet and reschedule them
    Resync,

    /// Attach to the target tab and report what the page agent sees
    Inspect,

    /// List stored jobs
    Jobs(JobsArgs),

    /// Delete every stored job and its timer
    Reset(ResetArgs),

    /// Show build information, paths and posting counters
    Status,
}
