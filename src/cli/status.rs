use anyhow::Result;
use autopost_scheduler::metrics;
use serde::Serialize;

use super::context::CliContext;

#[derive(Serialize)]
struct StatusReport {
    version: &'static str,
    build_date: &'static str,
    git_hash: &'static str,
    config_path: String,
    jobs_path: String,
    schedule_enabled: bool,
    sheet: Option<String>,
    mirror: Option<String>,
    counters: metrics::SchedulerMetricsSnapshot,
}

pub async fn cmd_status(ctx: &CliContext) -> Result<()> {
    let config = ctx.config();
    let services = ctx.services().await?;
    let report = StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        build_date: env!("AUTOPOST_BUILD_DATE"),
        git_hash: env!("AUTOPOST_GIT_HASH"),
        config_path: ctx.config_path().display().to_string(),
        jobs_path: config.storage.jobs_path().display().to_string(),
        schedule_enabled: services.orchestrator.schedule_enabled(),
        sheet: config.sheet.csv_url.clone(),
        mirror: config.mirror.base_url.clone(),
        counters: metrics::snapshot(),
    };
    if ctx.output().emit(&report)? {
        return Ok(());
    }

    println!("autopost {}", report.version);
    println!("{}", "=".repeat("autopost ".len() + report.version.len()));
    println!("Build Date: {}", report.build_date);
    println!("Git Commit: {}", report.git_hash);
    println!();
    println!("Configuration: {}", report.config_path);
    println!("Job store: {}", report.jobs_path);
    println!("Job timers: {}", if report.schedule_enabled { "on" } else { "off" });
    println!("Sheet: {}", report.sheet.as_deref().unwrap_or("(not configured)"));
    println!("Mirror: {}", report.mirror.as_deref().unwrap_or("(not configured)"));
    println!();
    println!("Counters (this process):");
    let counters = &report.counters;
    println!("- Timers fired: {}", counters.timers_fired);
    println!("- Lock contended: {}", counters.lock_contended);
    println!("- Started: {}", counters.started);
    println!("- Skipped: {}", counters.skipped);
    println!("- Done: {}", counters.done);
    println!("- Unverified: {}", counters.unverified);
    println!("- Failed: {}", counters.failed);
    Ok(())
}
