//! Database connection utilities.

use std::time::Duration;

use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Statement};

/// Configure SQLite-specific pragmas for better performance and concurrency.
///
/// This sets:
/// - `journal_mode=WAL` - Write-ahead logging for better concurrent access
/// - `busy_timeout=5000` - Wait up to 5 seconds for locks instead of failing immediately
/// - `synchronous=NORMAL` - Good balance of safety and performance with WAL
async fn configure_sqlite(db: &DatabaseConnection) -> Result<(), DbErr> {
    for pragma in [
        "PRAGMA journal_mode=WAL",
        "PRAGMA busy_timeout=5000",
        "PRAGMA synchronous=NORMAL",
    ] {
        db.execute(Statement::from_string(
            db.get_database_backend(),
            pragma.to_string(),
        ))
        .await?;
    }

    Ok(())
}

fn is_sqlite_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite:") && database_url.contains(":memory:")
}

/// Build connection options for a database URL.
///
/// An in-memory SQLite database only exists for the lifetime of its connection,
/// so the pool is pinned to exactly one connection that is never recycled.
fn connect_options(database_url: &str) -> ConnectOptions {
    let mut options = ConnectOptions::new(database_url.to_string());
    options.sqlx_logging(false);

    if is_sqlite_memory(database_url) {
        options
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(24 * 60 * 60))
            .max_lifetime(Duration::from_secs(24 * 60 * 60));
    }

    options
}

/// Establish a connection to the database.
///
/// For file-backed SQLite databases, this automatically configures:
/// - WAL journal mode for better concurrency
/// - 5 second busy timeout to handle lock contention
/// - NORMAL synchronous mode for better performance
///
/// # Arguments
/// * `database_url` - Database connection string (e.g., `sqlite:///path/to/db` or `postgres:///devpulse`)
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established.
pub async fn connect(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    let db = Database::connect(connect_options(database_url)).await?;

    if database_url.starts_with("sqlite://") {
        configure_sqlite(&db).await?;
    }

    Ok(db)
}

/// Establish a connection to the database and run all pending migrations.
///
/// # Errors
/// Returns `DbErr` if the connection cannot be established or migrations fail.
///
/// # Example
/// ```ignore
/// let db = devpulse::connect_and_migrate("sqlite::memory:").await?;
/// ```
#[cfg(feature = "migrate")]
pub async fn connect_and_migrate(database_url: &str) -> Result<DatabaseConnection, DbErr> {
    use sea_orm_migration::MigratorTrait;

    let db = connect(database_url).await?;
    crate::migration::Migrator::up(&db, None).await?;
    Ok(db)
}

/// Cheap liveness probe used by health checks.
pub async fn ping(db: &DatabaseConnection) -> Result<(), DbErr> {
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "SELECT 1".to_string(),
    ))
    .await?;
    Ok(())
}

/// Whether a database error is worth retrying (lock contention, timeouts, dropped connections).
pub fn is_retryable_db_error(err: &DbErr) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("locked")
        || msg.contains("busy")
        || msg.contains("timeout")
        || msg.contains("timed out")
        || msg.contains("connection")
}

/// Whether a database error is a unique-constraint violation.
pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(
        err.sql_err(),
        Some(sea_orm::SqlErr::UniqueConstraintViolation(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DatabaseBackend, MockDatabase, MockExecResult};

    #[tokio::test]
    async fn configure_sqlite_runs_all_pragmas() {
        let db = MockDatabase::new(DatabaseBackend::Sqlite)
            .append_exec_results([
                MockExecResult {
                    rows_affected: 0,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 0,
                    last_insert_id: 0,
                },
                MockExecResult {
                    rows_affected: 0,
                    last_insert_id: 0,
                },
            ])
            .into_connection();

        configure_sqlite(&db)
            .await
            .expect("mock sqlite pragma execs should succeed");
    }

    #[tokio::test]
    async fn connect_returns_error_for_invalid_database_url() {
        let err = connect("this-is-not-a-db-url")
            .await
            .expect_err("invalid URL should error");
        let msg = err.to_string().to_ascii_lowercase();
        assert!(
            msg.contains("error") || msg.contains("invalid"),
            "unexpected error message: {err}"
        );
    }

    #[test]
    fn memory_urls_are_detected() {
        assert!(is_sqlite_memory("sqlite::memory:"));
        assert!(!is_sqlite_memory("sqlite:///tmp/devpulse.db"));
        assert!(!is_sqlite_memory("postgres:///devpulse"));
    }

    #[test]
    fn retryable_db_errors_are_classified() {
        assert!(is_retryable_db_error(&DbErr::Custom(
            "database is locked".to_string()
        )));
        assert!(is_retryable_db_error(&DbErr::Custom(
            "pool timed out while waiting for an open connection".to_string()
        )));
        assert!(!is_retryable_db_error(&DbErr::Custom(
            "no such column".to_string()
        )));
    }

    #[cfg(all(feature = "sqlite", feature = "migrate"))]
    #[tokio::test]
    async fn migrated_memory_database_answers_ping() {
        let db = connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate");
        ping(&db).await.expect("ping should succeed");
    }
}
