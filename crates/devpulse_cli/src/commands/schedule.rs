//! Scheduler commands: the `run` daemon, one-off batches, scheduler status
//! and the persisted scheduler configuration.

use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use console::{Term, style};
use devpulse::{BatchSummary, SchedulerConfig, SchedulerStatus, SyncRuntime};

use super::output::{Detail, OutputFormat, format_time, print_details};
use crate::shutdown;

/// Scheduler configuration subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Show the effective scheduler configuration
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Change one setting and persist it
    ///
    /// The stored configuration takes precedence over the config file from
    /// then on. A daemon running in another process picks it up on restart.
    Set {
        /// Setting name (e.g., interval_minutes, notification_recipients)
        key: String,
        /// New value; recipients are comma-separated
        value: String,
    },
}

/// Start the scheduler and block until Ctrl+C, then stop cleanly.
pub(crate) async fn handle_run(
    runtime: &SyncRuntime,
    run_immediately: bool,
    grace: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = runtime.scheduler();
    scheduler.start().await?;

    let status = scheduler.get_status().await?;
    if Term::stdout().is_term() {
        println!(
            "{} Scheduler running every {} minutes, next batch at {}",
            style("✓").green().bold(),
            scheduler.get_config().interval_minutes,
            format_time(status.next_run_at)
        );
        println!("Press Ctrl+C to stop.");
    }

    if run_immediately {
        let scheduler = Arc::clone(scheduler);
        tokio::spawn(async move {
            if let Err(e) = scheduler.run_now().await {
                tracing::warn!(error = %e, "Initial batch did not run");
            }
        });
    }

    shutdown::wait_for_shutdown().await;

    if scheduler.shutdown(grace).await? {
        tracing::info!("Scheduler stopped cleanly");
    } else {
        tracing::warn!(
            grace_secs = grace.as_secs(),
            "Batch still running at exit; its jobs are failed on next start"
        );
    }
    Ok(())
}

/// Execute one batch in the foreground and print its summary.
pub(crate) async fn handle_run_now(
    runtime: &SyncRuntime,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let summary = runtime.scheduler().run_now().await?;
    print_summary(&summary, output)?;

    if summary.failed > 0 && matches!(output, OutputFormat::Table) {
        eprintln!();
        eprintln!(
            "{}",
            style(format!("Failed syncs ({} total):", summary.failed))
                .yellow()
                .bold()
        );
        for error in summary.errors.iter().take(10) {
            eprintln!("  - {}", error);
        }
        if summary.errors.len() > 10 {
            eprintln!("  ... and {} more errors", summary.errors.len() - 10);
        }
    }
    Ok(())
}

fn print_summary(
    summary: &BatchSummary,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let details = vec![
        Detail::new("Batch", summary.batch_id),
        Detail::new("Repositories", summary.total),
        Detail::new("Successful", summary.successful),
        Detail::new("Failed", summary.failed),
        Detail::new("Deferred", summary.deferred),
        Detail::new("Cancelled", summary.cancelled),
        Detail::new("Started", format_time(Some(summary.started_at))),
        Detail::new("Finished", format_time(summary.finished_at)),
    ];
    print_details(summary, details, output)
}

pub(crate) async fn handle_scheduler_status(
    runtime: &SyncRuntime,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let status = runtime.scheduler().get_status().await?;
    print_details(&status, status_details(&status), output)
}

fn status_details(status: &SchedulerStatus) -> Vec<Detail> {
    let optional = |id: Option<uuid::Uuid>| id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string());
    vec![
        Detail::new("Batch Running", status.batch_running),
        Detail::new("Current Batch", optional(status.current_batch_id)),
        Detail::new("Last Batch", optional(status.last_batch_id)),
        Detail::new("Last Run", format_time(status.last_run_at)),
        Detail::new("Next Run", format_time(status.next_run_at)),
        Detail::new("Repos Processed", status.total_repos_processed),
        Detail::new("Successful", status.successful_syncs),
        Detail::new("Failed", status.failed_syncs),
        Detail::new("Deferred", status.deferred_syncs),
        Detail::new(
            "Last Error",
            status.last_error.clone().unwrap_or_else(|| "-".to_string()),
        ),
        Detail::new(
            "API Budget",
            format!(
                "{}/{} ({} per minute)",
                status.rate_limit.remaining, status.rate_limit.capacity, status.rate_limit.per_minute
            ),
        ),
    ]
}

pub(crate) async fn handle_config(
    runtime: &SyncRuntime,
    action: ConfigAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = runtime.scheduler();
    match action {
        ConfigAction::Show { output } => {
            let config = scheduler.get_config();
            print_details(&config, config_details(&config)?, output)?;
        }
        ConfigAction::Set { key, value } => {
            let mut config = scheduler.get_config();
            config.set(&key, &value)?;
            scheduler.update_config(config).await?;
            println!(
                "{} Set {} = {}",
                style("✓").green().bold(),
                style(&key).cyan(),
                value
            );
        }
    }
    Ok(())
}

/// One row per setting, sorted by name.
fn config_details(config: &SchedulerConfig) -> Result<Vec<Detail>, serde_json::Error> {
    let serde_json::Value::Object(fields) = serde_json::to_value(config)? else {
        return Ok(Vec::new());
    };

    Ok(fields
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_json::Value::Array(items) => items
                    .iter()
                    .filter_map(|item| item.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                other => other.to_string(),
            };
            Detail::new(&key, value)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_details_cover_every_setting() {
        let config = SchedulerConfig {
            notification_recipients: vec!["ops@example.com".into(), "lead@example.com".into()],
            ..SchedulerConfig::default()
        };
        let details = config_details(&config).unwrap();

        let recipients = details
            .iter()
            .find(|d| d.property == "notification_recipients")
            .unwrap();
        assert_eq!(recipients.value, "ops@example.com, lead@example.com");

        let interval = details
            .iter()
            .find(|d| d.property == "interval_minutes")
            .unwrap();
        assert_eq!(interval.value, "60");

        // Every key shown can be written back with `config set`.
        let mut copy = config.clone();
        for detail in &details {
            if detail.property == "notification_recipients" {
                continue;
            }
            copy.set(&detail.property, &detail.value).unwrap();
        }
        assert_eq!(copy, config);
    }
}
