use anyhow::Result;
use autopost_core_types::JobStatus;
use clap::{Args, ValueEnum};

use super::context::CliContext;

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum JobStatusFilter {
    Pending,
    Processing,
    Done,
    Failed,
    Unverified,
}

impl From<JobStatusFilter> for JobStatus {
    fn from(value: JobStatusFilter) -> Self {
        match value {
            JobStatusFilter::Pending => JobStatus::Pending,
            JobStatusFilter::Processing => JobStatus::Processing,
            JobStatusFilter::Done => JobStatus::Done,
            JobStatusFilter::Failed => JobStatus::Failed,
            JobStatusFilter::Unverified => JobStatus::Unverified,
        }
    }
}

#[derive(Args, Clone, Debug)]
pub struct JobsArgs {
    /// Only show jobs with this status
    #[arg(long, value_enum)]
    pub status: Option<JobStatusFilter>,
}

pub async fn cmd_jobs(args: JobsArgs, ctx: &CliContext) -> Result<()> {
    let services = ctx.services().await?;
    let wanted = args.status.map(JobStatus::from);
    let jobs: Vec<_> = services
        .orchestrator
        .list_jobs()
        .await?
        .into_iter()
        .filter(|job| wanted.map_or(true, |status| job.status == status))
        .collect();
    if ctx.output().emit(&jobs)? {
        return Ok(());
    }

    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    println!("{:<10} {:<6} {:<11} {:<6} CONTENT", "ID", "TIME", "STATUS", "MEDIA");
    for job in &jobs {
        let time = job
            .due_time
            .map(|due| due.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<10} {:<6} {:<11} {:<6} {}",
            job.id.as_str(),
            time,
            job.status.to_string(),
            job.media_urls.len(),
            preview(&job.content, 60)
        );
    }
    Ok(())
}

fn preview(content: &str, limit: usize) -> String {
    let line = content.lines().next().unwrap_or_default();
    if line.chars().count() > limit || content.lines().nth(1).is_some() {
        let cut: String = line.chars().take(limit).collect();
        format!("{cut}…")
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::preview;

    #[test]
    fn preview_keeps_first_line() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("first\nsecond", 10), "first…");
        assert_eq!(preview("Xin chào các bạn", 8), "Xin chào…");
    }
}
