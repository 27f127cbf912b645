use anyhow::Result;
use autopost_scheduler::TimerInfo;

use super::context::CliContext;

pub async fn cmd_timers(ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    let orchestrator = &services.orchestrator;
    orchestrator.rebuild_schedule().await?;
    if services.sheet_configured {
        orchestrator.enable_resync(ctx.config().sheet.resync_interval())?;
    }
    let timers = orchestrator.list_timers();
    if ctx.output().emit(&timers)? {
        return Ok(());
    }
    if !orchestrator.schedule_enabled() {
        println!("Job timers are switched off");
    }
    print_timers(&timers);
    Ok(())
}

pub(crate) fn print_timers(timers: &[TimerInfo]) {
    if timers.is_empty() {
        println!("No timers");
        return;
    }
    println!("{:<28} {:<20} PERIOD", "NAME", "NEXT");
    for timer in timers {
        let period = timer
            .period
            .map(|period| humantime::format_duration(period).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:<20} {}",
            timer.name,
            timer.next_fire.format("%Y-%m-%d %H:%M").to_string(),
            period
        );
    }
}
