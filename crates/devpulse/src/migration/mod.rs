//! Database migrations for the devpulse schema.
//!
//! This module is only available when the `migrate` feature is enabled.

pub use sea_orm_migration::prelude::*;

mod m20261001_000001_create_sync_schema;
mod m20261001_000002_create_activity_schema;
mod m20261005_000001_create_notification_schema;

/// The migrator that runs all migrations.
pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20261001_000001_create_sync_schema::Migration),
            Box::new(m20261001_000002_create_activity_schema::Migration),
            Box::new(m20261005_000001_create_notification_schema::Migration),
        ]
    }

    fn migration_table_name() -> SeaRc<dyn Iden> {
        SeaRc::new(Alias::new("devpulse_migrations"))
    }
}
