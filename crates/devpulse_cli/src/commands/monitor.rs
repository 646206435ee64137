//! Read-only monitoring commands.

use chrono::{Duration, Utc};
use console::style;
use devpulse::SyncRuntime;
use devpulse::monitoring::{self, HealthState, RepositoryStats};
use tabled::Tabled;

use super::output::{Detail, OutputFormat, format_time, print_details, print_rows};
use super::sync::JobDisplay;

pub(crate) async fn handle_health(
    runtime: &SyncRuntime,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let report = monitoring::health_check(runtime.database(), runtime.limiter()).await;

    let status = match report.status {
        HealthState::Healthy => style(report.status.to_string()).green().bold(),
        HealthState::Degraded => style(report.status.to_string()).yellow().bold(),
        HealthState::Unhealthy => style(report.status.to_string()).red().bold(),
    };
    let mut details = vec![
        Detail::new("Status", status),
        Detail::new("Database", if report.database_ok { "ok" } else { "unreachable" }),
    ];
    if let Some(error) = &report.database_error {
        details.push(Detail::new("Database Error", error));
    }
    if let Some(running) = report.scheduler_running {
        details.push(Detail::new("Batch Running", running));
    }
    details.extend([
        Detail::new("Last Run", format_time(report.last_run_at)),
        Detail::new("Next Run", format_time(report.next_run_at)),
        Detail::new(
            "Last Error",
            report.last_error.clone().unwrap_or_else(|| "-".to_string()),
        ),
        Detail::new(
            "API Budget",
            format!(
                "{}/{} (full at {})",
                report.rate_limit.remaining,
                report.rate_limit.capacity,
                format_time(Some(report.rate_limit.reset_at))
            ),
        ),
    ]);

    print_details(&report, details, output)?;

    if report.status == HealthState::Unhealthy {
        return Err("Database is unreachable".into());
    }
    Ok(())
}

pub(crate) async fn handle_metrics(
    runtime: &SyncRuntime,
    hours: i64,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let since = Utc::now() - Duration::hours(hours.max(1));
    let metrics = monitoring::sync_metrics(runtime.database(), since).await?;

    let details = vec![
        Detail::new("Since", format_time(metrics.since)),
        Detail::new("Jobs", metrics.total_jobs),
        Detail::new("Completed", metrics.completed),
        Detail::new("Failed", metrics.failed),
        Detail::new("Cancelled", metrics.cancelled),
        Detail::new("Running", metrics.running),
        Detail::new("Records", metrics.records_processed),
        Detail::new(
            "Avg Duration",
            metrics
                .average_duration_seconds
                .map(|s| format!("{:.1}s", s))
                .unwrap_or_else(|| "-".to_string()),
        ),
        Detail::new(
            "Success Rate",
            metrics
                .success_rate
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "-".to_string()),
        ),
    ];
    print_details(&metrics, details, output)
}

/// Display struct for repository statistics.
#[derive(Debug, Clone, serde::Serialize, Tabled)]
struct StatsDisplay {
    #[tabled(rename = "Repository")]
    full_name: String,
    #[tabled(rename = "Enabled")]
    enabled: bool,
    #[tabled(rename = "Last Sync")]
    last_sync_at: String,
    #[tabled(rename = "Last Job")]
    last_job_status: String,
    #[tabled(rename = "PRs")]
    pull_requests: u64,
    #[tabled(rename = "Commits")]
    commits: u64,
    #[tabled(rename = "Failed Jobs")]
    failed_jobs: u64,
}

impl From<&RepositoryStats> for StatsDisplay {
    fn from(stats: &RepositoryStats) -> Self {
        Self {
            full_name: stats.full_name.clone(),
            enabled: stats.enabled,
            last_sync_at: format_time(stats.last_sync_at),
            last_job_status: stats
                .last_job_status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
            pull_requests: stats.pull_requests,
            commits: stats.commits,
            failed_jobs: stats.failed_jobs,
        }
    }
}

pub(crate) async fn handle_stats(
    runtime: &SyncRuntime,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let stats = monitoring::repository_stats(runtime.database()).await?;
    if stats.is_empty() {
        println!("No repositories tracked.");
        return Ok(());
    }

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
        OutputFormat::Table => {
            let rows: Vec<StatsDisplay> = stats.iter().map(StatsDisplay::from).collect();
            print_rows(rows, output)?;
        }
    }
    Ok(())
}

pub(crate) async fn handle_failures(
    runtime: &SyncRuntime,
    limit: u64,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = monitoring::recent_failures(runtime.database(), limit).await?;
    if jobs.is_empty() {
        println!("No failed sync jobs.");
        return Ok(());
    }

    let rows: Vec<JobDisplay> = jobs.iter().map(JobDisplay::from).collect();
    print_rows(rows, output)
}
