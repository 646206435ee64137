//! Manual sync commands: sync, cancel, status and history of one repository.

use console::style;
use devpulse::sync::SyncStatus;
use devpulse::{SyncJobModel, SyncOutcome, SyncRuntime, SyncType, repository};
use tabled::Tabled;
use uuid::Uuid;

use super::output::{
    Detail, OutputFormat, format_duration, format_stored_time, print_details, print_rows,
};
use crate::shutdown;

/// Sync one repository now, cancelling cooperatively on Ctrl+C.
pub(crate) async fn handle_sync(
    runtime: &SyncRuntime,
    repository_id: Uuid,
    full: bool,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let repo = repository::get(runtime.database(), repository_id).await?;
    let sync_type = if full || repo.last_sync_at.is_none() {
        SyncType::Full
    } else {
        SyncType::Incremental
    };

    let orchestrator = runtime.orchestrator();
    let sync = orchestrator.sync_repository(repository_id, sync_type);
    tokio::pin!(sync);

    let result = tokio::select! {
        result = &mut sync => result,
        _ = shutdown::wait_for_shutdown() => {
            orchestrator.cancel_sync(repository_id).await?;
            (&mut sync).await
        }
    };

    if matches!(output, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let elapsed = chrono::Duration::milliseconds(result.duration.as_millis() as i64);
        match result.outcome {
            SyncOutcome::Completed => println!(
                "{} {} sync of '{}' complete: {} records in {}",
                style("✓").green().bold(),
                sync_type,
                style(repo.full_name()).cyan(),
                result.records_processed,
                format_duration(elapsed)
            ),
            SyncOutcome::Deferred => println!(
                "{} '{}' is already being synced, nothing to do",
                style("⚠").yellow().bold(),
                style(repo.full_name()).cyan()
            ),
            SyncOutcome::Cancelled => println!(
                "{} Sync of '{}' cancelled after {} records",
                style("⚠").yellow().bold(),
                style(repo.full_name()).cyan(),
                result.records_processed
            ),
            SyncOutcome::Failed => {}
        }
    }

    if result.outcome == SyncOutcome::Failed {
        return Err(format!(
            "Sync of '{}' failed: {}",
            repo.full_name(),
            result.error.as_deref().unwrap_or("unknown error")
        )
        .into());
    }
    Ok(())
}

/// Request cancellation of a running sync.
pub(crate) async fn handle_cancel(
    runtime: &SyncRuntime,
    repository_id: Uuid,
) -> Result<(), Box<dyn std::error::Error>> {
    if runtime.orchestrator().cancel_sync(repository_id).await? {
        println!(
            "{} Cancellation requested; the sync stops before its next page",
            style("✓").green().bold()
        );
    } else {
        println!("No running sync for repository {}", repository_id);
    }
    Ok(())
}

pub(crate) async fn handle_status(
    runtime: &SyncRuntime,
    repository_id: Uuid,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let repo = repository::get(runtime.database(), repository_id).await?;
    let status: SyncStatus = runtime.orchestrator().get_sync_status(repository_id).await?;

    let mut details = vec![
        Detail::new("Repository", repo.full_name()),
        Detail::new("Enabled", repo.enabled),
        Detail::new("Last Sync", format_stored_time(repo.last_sync_at)),
        Detail::new("Sync Running", status.is_running),
    ];
    if let Some(job) = &status.latest_job {
        details.push(Detail::new("Latest Job", job.id));
        details.push(Detail::new("Job Status", job.status));
        details.push(Detail::new("Job Type", job.sync_type));
        details.push(Detail::new("Records", job.records_processed));
        details.push(Detail::new("Started", format_stored_time(job.started_at)));
        details.push(Detail::new("Completed", format_stored_time(job.completed_at)));
        if let Some(error) = &job.error {
            details.push(Detail::new("Error", error));
        }
    }

    print_details(&status, details, output)
}

/// Display struct for job history.
#[derive(Debug, Clone, serde::Serialize, Tabled)]
pub(crate) struct JobDisplay {
    #[tabled(rename = "Job")]
    id: String,
    #[tabled(rename = "Type")]
    sync_type: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Records")]
    records: i64,
    #[tabled(rename = "Started")]
    started_at: String,
    #[tabled(rename = "Duration")]
    duration: String,
    #[tabled(rename = "Error")]
    error: String,
}

impl From<&SyncJobModel> for JobDisplay {
    fn from(job: &SyncJobModel) -> Self {
        Self {
            id: job.id.to_string(),
            sync_type: job.sync_type.to_string(),
            status: job.status.to_string(),
            records: job.records_processed,
            started_at: format_stored_time(job.started_at),
            duration: job
                .duration()
                .map(format_duration)
                .unwrap_or_else(|| "-".to_string()),
            error: job.error.clone().unwrap_or_default(),
        }
    }
}

pub(crate) async fn handle_history(
    runtime: &SyncRuntime,
    repository_id: Uuid,
    limit: u64,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = runtime
        .orchestrator()
        .get_sync_history(repository_id, limit)
        .await?;

    if jobs.is_empty() {
        println!("No sync jobs recorded for repository {}", repository_id);
        return Ok(());
    }

    let rows: Vec<JobDisplay> = jobs.iter().map(JobDisplay::from).collect();
    print_rows(rows, output)
}
