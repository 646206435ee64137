use std::io::{self, Write};

use clap::Subcommand;
use console::style;
use devpulse::db;
use devpulse::migration::{Migrator, MigratorTrait};

#[derive(Subcommand)]
pub(crate) enum MigrateAction {
    /// Apply all pending migrations
    Up,
    /// Roll back the most recent migration
    Down {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// List applied and pending migrations
    Status,
    /// Drop every table and apply all migrations again
    Fresh {
        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
}

pub(crate) async fn handle_migrate(
    action: MigrateAction,
    database_url: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = db::connect(database_url).await?;

    match action {
        MigrateAction::Up => {
            let pending = Migrator::get_pending_migrations(&db).await?.len();
            if pending == 0 {
                println!("Schema is up to date.");
                return Ok(());
            }
            Migrator::up(&db, None).await?;
            println!(
                "{} Applied {} migration{}",
                style("✓").green().bold(),
                pending,
                if pending == 1 { "" } else { "s" }
            );
        }
        MigrateAction::Down { yes } => {
            if !yes && !confirm("Roll back the most recent migration? Its tables are dropped.")? {
                println!("Aborted.");
                return Ok(());
            }
            Migrator::down(&db, Some(1)).await?;
            println!("{} Rolled back one migration", style("✓").green().bold());
        }
        MigrateAction::Status => {
            Migrator::status(&db).await?;
        }
        MigrateAction::Fresh { yes } => {
            if !yes && !confirm("Drop ALL devpulse tables, including sync history and activity?")? {
                println!("Aborted.");
                return Ok(());
            }
            Migrator::fresh(&db).await?;
            println!("{} Recreated the schema from scratch", style("✓").green().bold());
        }
    }

    Ok(())
}

fn confirm(question: &str) -> io::Result<bool> {
    print!("{} {} [y/N] ", style("⚠").yellow().bold(), question);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}
