//! Create the sync bookkeeping tables: tracked repositories, jobs, leases and
//! the scheduler state singleton.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_tracked_repositories(manager).await?;
        self.create_sync_jobs(manager).await?;
        self.create_sync_leases(manager).await?;
        self.create_scheduler_state(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SchedulerState::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncLeases::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TrackedRepositories::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_tracked_repositories(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TrackedRepositories::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TrackedRepositories::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    // Naming
                    .col(
                        ColumnDef::new(TrackedRepositories::Name)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackedRepositories::Organization)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackedRepositories::Project)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackedRepositories::ExternalId)
                            .string()
                            .null(),
                    )
                    // Access
                    .col(
                        ColumnDef::new(TrackedRepositories::BaseUrl)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(TrackedRepositories::EncryptedCredential)
                            .text()
                            .null(),
                    )
                    // Sync state
                    .col(
                        ColumnDef::new(TrackedRepositories::LastSyncAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(TrackedRepositories::Enabled)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(TrackedRepositories::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(TrackedRepositories::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Natural key
        manager
            .create_index(
                Index::create()
                    .name("idx_tracked_repos_natural_key")
                    .table(TrackedRepositories::Table)
                    .col(TrackedRepositories::BaseUrl)
                    .col(TrackedRepositories::Organization)
                    .col(TrackedRepositories::Project)
                    .col(TrackedRepositories::Name)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_tracked_repos_enabled")
                    .table(TrackedRepositories::Table)
                    .col(TrackedRepositories::Enabled)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_sync_jobs(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::RepositoryId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobs::BatchId).uuid().null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SyncJobs::SyncType).string().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::Error).text().null())
                    .col(
                        ColumnDef::new(SyncJobs::RecordsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CancelRequested)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_jobs_repository")
                            .from(SyncJobs::Table, SyncJobs::RepositoryId)
                            .to(TrackedRepositories::Table, TrackedRepositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // History lookups: newest jobs of one repository
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_repo_created")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::RepositoryId)
                    .col((SyncJobs::CreatedAt, IndexOrder::Desc))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_status")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_sync_leases(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncLeases::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncLeases::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncLeases::Holder).string().not_null())
                    .col(
                        ColumnDef::new(SyncLeases::AcquiredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncLeases::ExpiresAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_scheduler_state(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SchedulerState::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchedulerState::Id)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SchedulerState::IsRunning)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SchedulerState::LastRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SchedulerState::NextRunAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SchedulerState::CurrentBatchId).uuid().null())
                    .col(ColumnDef::new(SchedulerState::LastBatchId).uuid().null())
                    .col(
                        ColumnDef::new(SchedulerState::TotalReposProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SchedulerState::SuccessfulSyncs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SchedulerState::FailedSyncs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SchedulerState::DeferredSyncs)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SchedulerState::LastError).text().null())
                    .col(ColumnDef::new(SchedulerState::Config).json().null())
                    .col(
                        ColumnDef::new(SchedulerState::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
pub(super) enum TrackedRepositories {
    Table,
    Id,
    Name,
    Organization,
    Project,
    ExternalId,
    BaseUrl,
    EncryptedCredential,
    LastSyncAt,
    Enabled,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    RepositoryId,
    BatchId,
    Status,
    SyncType,
    StartedAt,
    CompletedAt,
    Error,
    RecordsProcessed,
    CancelRequested,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SyncLeases {
    Table,
    Key,
    Holder,
    AcquiredAt,
    ExpiresAt,
}

#[derive(DeriveIden)]
#[sea_orm(iden = "scheduler_state")]
enum SchedulerState {
    Table,
    Id,
    IsRunning,
    LastRunAt,
    NextRunAt,
    CurrentBatchId,
    LastBatchId,
    TotalReposProcessed,
    SuccessfulSyncs,
    FailedSyncs,
    DeferredSyncs,
    LastError,
    Config,
    UpdatedAt,
}
