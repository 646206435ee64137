//! Devpulse CLI - command-line interface and scheduler daemon.

mod commands;
mod config;
mod progress;
mod shutdown;

use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::commands::access::{AccessAction, NotificationsAction};
use crate::commands::migrate::MigrateAction;
use crate::commands::output::OutputFormat;
use crate::commands::repos::ReposAction;
use crate::commands::schedule::ConfigAction;

#[derive(Parser)]
#[command(name = "devpulse")]
#[command(version)]
#[command(about = "Sync source-control activity from Azure DevOps")]
#[command(
    long_about = "Devpulse ingests pull requests, commits, reviews and comments from Azure \
DevOps repositories into a local database. It runs periodic sync batches under a shared \
API budget and notifies recipients about failed batches."
)]
#[command(after_long_help = r#"EXAMPLES
    Track a repository and sync it once:
        $ devpulse repos add contoso platform api
        $ devpulse sync <repository-id>

    Run the scheduler until Ctrl+C:
        $ devpulse run

    Change the batch interval:
        $ devpulse config set interval_minutes 30

CONFIGURATION
    Devpulse reads configuration from:
      1. ~/.config/devpulse/config.toml (or $XDG_CONFIG_HOME/devpulse/config.toml)
      2. ./devpulse.toml
      3. Environment variables (DEVPULSE_* prefix, e.g., DEVPULSE_AZURE_TOKEN)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    DEVPULSE_DATABASE_URL     Database connection string (default: ~/.local/state/devpulse/devpulse.db)
    DEVPULSE_AZURE_TOKEN      Azure DevOps personal access token
    RUST_LOG                  Log filter (default: devpulse=info,devpulse_cli=info)
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run database migrations
    Migrate {
        #[command(subcommand)]
        action: MigrateAction,
    },
    /// Manage tracked repositories
    Repos {
        #[command(subcommand)]
        action: ReposAction,
    },
    /// Sync one repository now
    Sync {
        /// Repository id
        repository_id: Uuid,

        /// Sync everything instead of the changes since the last sync
        #[arg(short, long)]
        full: bool,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Cancel a running sync
    Cancel {
        /// Repository id
        repository_id: Uuid,
    },
    /// Show sync status of a repository, or of the scheduler without an id
    Status {
        /// Repository id
        repository_id: Option<Uuid>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Show recent sync jobs of a repository
    History {
        /// Repository id
        repository_id: Uuid,

        /// Number of jobs to show
        #[arg(short, long, default_value_t = 10)]
        limit: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Run the scheduler until Ctrl+C
    Run {
        /// Also start a batch right away instead of one interval from now
        #[arg(long)]
        now: bool,

        /// Seconds to wait for a running batch on shutdown
        #[arg(long, default_value_t = 30)]
        grace_seconds: u64,
    },
    /// Run one batch over all enabled repositories and print the summary
    RunNow {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Show or change the scheduler configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Check database, scheduler and API budget
    Health {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Aggregate sync job metrics
    Metrics {
        /// Look-back window in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Per-repository activity counts
    Stats {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Most recent failed sync jobs
    Failures {
        /// Number of jobs to show
        #[arg(short, long, default_value_t = 20)]
        limit: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Read notifications
    Notifications {
        #[command(subcommand)]
        action: NotificationsAction,
    },
    /// Request and resolve access through notifications
    Access {
        #[command(subcommand)]
        action: AccessAction,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("devpulse=info,devpulse_cli=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Load configuration (config file -> env vars -> defaults)
    let config = config::Config::load();

    let cli = Cli::parse();

    let database_url = config
        .database_url()
        .ok_or("Could not determine a database URL; set DEVPULSE_DATABASE_URL")?;

    // Ensure the database directory exists for SQLite
    if database_url.starts_with("sqlite://") {
        let db_path = database_url.trim_start_matches("sqlite://");
        // Strip query parameters (e.g., ?mode=rwc) before path operations
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        let db_path = std::path::Path::new(db_path);

        if db_path.is_relative() && !db_path.as_os_str().is_empty() {
            tracing::warn!(
                "Database path '{}' is relative - behavior depends on current directory. \
                 Consider using an absolute path.",
                db_path.display()
            );
        }

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
    }

    // Migrations run before the runtime, which would otherwise apply them itself.
    let command = match cli.command {
        Commands::Migrate { action } => {
            return commands::migrate::handle_migrate(action, &database_url).await;
        }
        other => other,
    };

    shutdown::setup_shutdown_handler();
    let runtime = commands::shared::build_runtime(&config, &database_url).await?;

    match command {
        Commands::Migrate { .. } => {}
        Commands::Repos { action } => {
            commands::repos::handle_repos(action, &config, runtime.database()).await?;
        }
        Commands::Sync {
            repository_id,
            full,
            output,
        } => {
            commands::sync::handle_sync(&runtime, repository_id, full, output).await?;
        }
        Commands::Cancel { repository_id } => {
            commands::sync::handle_cancel(&runtime, repository_id).await?;
        }
        Commands::Status {
            repository_id: Some(repository_id),
            output,
        } => {
            commands::sync::handle_status(&runtime, repository_id, output).await?;
        }
        Commands::Status {
            repository_id: None,
            output,
        } => {
            commands::schedule::handle_scheduler_status(&runtime, output).await?;
        }
        Commands::History {
            repository_id,
            limit,
            output,
        } => {
            commands::sync::handle_history(&runtime, repository_id, limit, output).await?;
        }
        Commands::Run { now, grace_seconds } => {
            commands::schedule::handle_run(&runtime, now, Duration::from_secs(grace_seconds))
                .await?;
        }
        Commands::RunNow { output } => {
            commands::schedule::handle_run_now(&runtime, output).await?;
        }
        Commands::Config { action } => {
            commands::schedule::handle_config(&runtime, action).await?;
        }
        Commands::Health { output } => {
            commands::monitor::handle_health(&runtime, output).await?;
        }
        Commands::Metrics { hours, output } => {
            commands::monitor::handle_metrics(&runtime, hours, output).await?;
        }
        Commands::Stats { output } => {
            commands::monitor::handle_stats(&runtime, output).await?;
        }
        Commands::Failures { limit, output } => {
            commands::monitor::handle_failures(&runtime, limit, output).await?;
        }
        Commands::Notifications { action } => {
            commands::access::handle_notifications(&runtime, action).await?;
        }
        Commands::Access { action } => {
            commands::access::handle_access(&runtime, action).await?;
        }
    }

    Ok(())
}
