//! Tracked repository commands.
//!
//! Commands for registering repositories and toggling them in and out of
//! scheduled batches.

use clap::Subcommand;
use console::style;
use devpulse::TrackedRepositoryModel;
use devpulse::repository::{self, NewRepository, Pagination};
use sea_orm::DatabaseConnection;
use tabled::Tabled;
use uuid::Uuid;

use super::output::{OutputFormat, format_stored_time, print_rows};
use crate::config::Config;

/// Repository management subcommands.
#[derive(Subcommand)]
pub(crate) enum ReposAction {
    /// List tracked repositories
    List {
        /// Page number (0-indexed)
        #[arg(short, long, default_value_t = 0)]
        page: u64,

        /// Repositories per page
        #[arg(long, default_value_t = 50)]
        per_page: u64,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Register a repository
    Add {
        /// Organization name
        organization: String,
        /// Project name
        project: String,
        /// Repository name
        name: String,

        /// Organization host (default from config: https://dev.azure.com)
        #[arg(short = 'b', long)]
        base_url: Option<String>,

        /// Platform repository id, used in API paths instead of the name
        #[arg(long)]
        external_id: Option<String>,
    },
    /// Include a repository in scheduled batches
    Enable {
        /// Repository id
        id: Uuid,
    },
    /// Exclude a repository from scheduled batches
    Disable {
        /// Repository id
        id: Uuid,
    },
    /// Remove a repository and its sync history
    Remove {
        /// Repository id
        id: Uuid,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

/// Display struct for repository listing.
#[derive(Debug, Clone, serde::Serialize, Tabled)]
struct RepositoryDisplay {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Repository")]
    full_name: String,
    #[tabled(rename = "Host")]
    base_url: String,
    #[tabled(rename = "Enabled")]
    enabled: bool,
    #[tabled(rename = "Last Sync")]
    last_sync_at: String,
}

impl From<&TrackedRepositoryModel> for RepositoryDisplay {
    fn from(repo: &TrackedRepositoryModel) -> Self {
        Self {
            id: repo.id.to_string(),
            full_name: repo.full_name(),
            base_url: repo.base_url.clone(),
            enabled: repo.enabled,
            last_sync_at: format_stored_time(repo.last_sync_at),
        }
    }
}

/// Handle repository management commands.
pub(crate) async fn handle_repos(
    action: ReposAction,
    config: &Config,
    db: &DatabaseConnection,
) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ReposAction::List {
            page,
            per_page,
            output,
        } => {
            let result = repository::find_all(db, Pagination::new(page, per_page)).await?;
            if result.total == 0 {
                println!("No repositories tracked.");
                println!();
                println!("Add one with:");
                println!("  devpulse repos add <organization> <project> <name>");
                return Ok(());
            }

            let rows: Vec<RepositoryDisplay> =
                result.items.iter().map(RepositoryDisplay::from).collect();
            print_rows(rows, output)?;
            if matches!(output, OutputFormat::Table) && result.total_pages > 1 {
                println!(
                    "Page {} of {} ({} repositories)",
                    result.page + 1,
                    result.total_pages,
                    result.total
                );
            }
        }
        ReposAction::Add {
            organization,
            project,
            name,
            base_url,
            external_id,
        } => {
            let repo = repository::insert(
                db,
                NewRepository {
                    name,
                    organization,
                    project,
                    base_url: base_url.unwrap_or_else(|| config.azure.base_url.clone()),
                    external_id,
                    credential: None,
                },
            )
            .await?;

            println!(
                "{} Tracking '{}' ({})",
                style("✓").green().bold(),
                style(repo.full_name()).cyan(),
                repo.id
            );
        }
        ReposAction::Enable { id } => set_enabled(db, id, true).await?,
        ReposAction::Disable { id } => set_enabled(db, id, false).await?,
        ReposAction::Remove { id, yes } => remove_repository(db, id, yes).await?,
    }
    Ok(())
}

async fn set_enabled(
    db: &DatabaseConnection,
    id: Uuid,
    enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let repo = repository::set_enabled(db, id, enabled).await?;
    println!(
        "{} {} '{}'",
        style("✓").green().bold(),
        if enabled { "Enabled" } else { "Disabled" },
        style(repo.full_name()).cyan()
    );
    Ok(())
}

async fn remove_repository(
    db: &DatabaseConnection,
    id: Uuid,
    skip_confirm: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let repo = repository::get(db, id).await?;

    if !skip_confirm {
        println!(
            "{} About to remove '{}' with its sync history and activity",
            style("⚠").yellow().bold(),
            style(repo.full_name()).cyan()
        );

        print!("Continue? [y/N] ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    repository::delete(db, id).await?;
    println!(
        "{} Removed '{}'",
        style("✓").green().bold(),
        style(repo.full_name()).cyan()
    );
    Ok(())
}
