//! Create developer identities and activity record tables, and seed the
//! reserved "Unknown Developer" row.

use sea_orm_migration::prelude::*;

use super::m20261001_000001_create_sync_schema::TrackedRepositories;

/// Must match `entity::developer::UNKNOWN_DEVELOPER_ID`.
const UNKNOWN_DEVELOPER_ID: uuid::Uuid =
    uuid::Uuid::from_u128(0x00000000_0000_4000_8000_0000_0000_0001);

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        self.create_developers(manager).await?;
        self.create_pull_requests(manager).await?;
        self.create_commits(manager).await?;
        self.create_reviews(manager).await?;
        self.create_comments(manager).await?;
        self.seed_unknown_developer(manager).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(PullRequestComments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PullRequestReviews::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Commits::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PullRequests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Developers::Table).to_owned())
            .await?;
        Ok(())
    }
}

impl Migration {
    async fn create_developers(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Developers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Developers::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Developers::DisplayName).string().not_null())
                    .col(ColumnDef::new(Developers::Email).string().null())
                    .col(ColumnDef::new(Developers::Login).string().null())
                    .col(ColumnDef::new(Developers::ExternalId).string().null())
                    .col(
                        ColumnDef::new(Developers::IsSentinel)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Developers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Developers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_developers_external_id", Developers::ExternalId),
            ("idx_developers_email", Developers::Email),
            ("idx_developers_login", Developers::Login),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(Developers::Table)
                        .col(column)
                        .unique()
                        .to_owned(),
                )
                .await?;
        }

        // Exactly one sentinel row
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_developers_sentinel \
                 ON developers (is_sentinel) WHERE is_sentinel",
            )
            .await?;

        Ok(())
    }

    async fn create_pull_requests(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PullRequests::Table)
                    .if_not_exists()
                    // Identity
                    .col(
                        ColumnDef::new(PullRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(PullRequests::RepositoryId).uuid().not_null())
                    .col(ColumnDef::new(PullRequests::ExternalId).string().not_null())
                    .col(ColumnDef::new(PullRequests::AuthorId).uuid().not_null())
                    // Content
                    .col(ColumnDef::new(PullRequests::Title).string().not_null())
                    .col(ColumnDef::new(PullRequests::Description).text().null())
                    .col(ColumnDef::new(PullRequests::State).string().not_null())
                    .col(ColumnDef::new(PullRequests::SourceBranch).string().not_null())
                    .col(ColumnDef::new(PullRequests::TargetBranch).string().not_null())
                    .col(
                        ColumnDef::new(PullRequests::IsDraft)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    // Platform timestamps
                    .col(
                        ColumnDef::new(PullRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::ClosedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::MergedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::FirstCommitAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequests::FirstReviewAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    // Derived metrics
                    .col(ColumnDef::new(PullRequests::CycleTimeDays).double().null())
                    .col(ColumnDef::new(PullRequests::ReviewTimeDays).double().null())
                    .col(ColumnDef::new(PullRequests::LeadTimeDays).double().null())
                    // Bookkeeping
                    .col(
                        ColumnDef::new(PullRequests::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PullRequests::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_pull_requests_repository")
                            .from(PullRequests::Table, PullRequests::RepositoryId)
                            .to(TrackedRepositories::Table, TrackedRepositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_natural_key")
                    .table(PullRequests::Table)
                    .col(PullRequests::RepositoryId)
                    .col(PullRequests::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_pull_requests_author")
                    .table(PullRequests::Table)
                    .col(PullRequests::AuthorId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_commits(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Commits::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Commits::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Commits::RepositoryId).uuid().not_null())
                    .col(ColumnDef::new(Commits::Sha).string().not_null())
                    .col(ColumnDef::new(Commits::AuthorId).uuid().not_null())
                    .col(ColumnDef::new(Commits::Message).text().not_null())
                    .col(
                        ColumnDef::new(Commits::AuthoredAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Commits::CommittedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Commits::Additions)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Commits::Edits).integer().not_null().default(0))
                    .col(
                        ColumnDef::new(Commits::Deletions)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Commits::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Commits::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_commits_repository")
                            .from(Commits::Table, Commits::RepositoryId)
                            .to(TrackedRepositories::Table, TrackedRepositories::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_commits_natural_key")
                    .table(Commits::Table)
                    .col(Commits::RepositoryId)
                    .col(Commits::Sha)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_reviews(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PullRequestReviews::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PullRequestReviews::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PullRequestReviews::PullRequestId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestReviews::ExternalId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestReviews::ReviewerId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PullRequestReviews::State).string().not_null())
                    .col(
                        ColumnDef::new(PullRequestReviews::Vote)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(PullRequestReviews::IsRequired)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(PullRequestReviews::SubmittedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestReviews::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PullRequestReviews::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_reviews_pull_request")
                            .from(PullRequestReviews::Table, PullRequestReviews::PullRequestId)
                            .to(PullRequests::Table, PullRequests::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_reviews_natural_key")
                    .table(PullRequestReviews::Table)
                    .col(PullRequestReviews::PullRequestId)
                    .col(PullRequestReviews::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn create_comments(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(PullRequestComments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(PullRequestComments::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(PullRequestComments::PullRequestId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestComments::ExternalId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestComments::ThreadId)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestComments::AuthorId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(PullRequestComments::Content).text().not_null())
                    .col(
                        ColumnDef::new(PullRequestComments::PublishedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestComments::EditedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(PullRequestComments::FirstSeenAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(PullRequestComments::SyncedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_comments_pull_request")
                            .from(
                                PullRequestComments::Table,
                                PullRequestComments::PullRequestId,
                            )
                            .to(PullRequests::Table, PullRequests::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_comments_natural_key")
                    .table(PullRequestComments::Table)
                    .col(PullRequestComments::PullRequestId)
                    .col(PullRequestComments::ExternalId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn seed_unknown_developer(&self, manager: &SchemaManager<'_>) -> Result<(), DbErr> {
        let now = chrono::Utc::now().fixed_offset();
        let insert = Query::insert()
            .into_table(Developers::Table)
            .columns([
                Developers::Id,
                Developers::DisplayName,
                Developers::IsSentinel,
                Developers::CreatedAt,
                Developers::UpdatedAt,
            ])
            .values([
                UNKNOWN_DEVELOPER_ID.into(),
                "Unknown Developer".into(),
                true.into(),
                now.into(),
                now.into(),
            ])
            .map_err(|e| DbErr::Migration(e.to_string()))?
            .on_conflict(OnConflict::column(Developers::Id).do_nothing().to_owned())
            .to_owned();

        manager.exec_stmt(insert).await
    }
}

#[derive(DeriveIden)]
enum Developers {
    Table,
    Id,
    DisplayName,
    Email,
    Login,
    ExternalId,
    IsSentinel,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum PullRequests {
    Table,
    Id,
    RepositoryId,
    ExternalId,
    AuthorId,
    Title,
    Description,
    State,
    SourceBranch,
    TargetBranch,
    IsDraft,
    CreatedAt,
    ClosedAt,
    MergedAt,
    FirstCommitAt,
    FirstReviewAt,
    CycleTimeDays,
    ReviewTimeDays,
    LeadTimeDays,
    FirstSeenAt,
    SyncedAt,
}

#[derive(DeriveIden)]
enum Commits {
    Table,
    Id,
    RepositoryId,
    Sha,
    AuthorId,
    Message,
    AuthoredAt,
    CommittedAt,
    Additions,
    Edits,
    Deletions,
    FirstSeenAt,
    SyncedAt,
}

#[derive(DeriveIden)]
enum PullRequestReviews {
    Table,
    Id,
    PullRequestId,
    ExternalId,
    ReviewerId,
    State,
    Vote,
    IsRequired,
    SubmittedAt,
    FirstSeenAt,
    SyncedAt,
}

#[derive(DeriveIden)]
enum PullRequestComments {
    Table,
    Id,
    PullRequestId,
    ExternalId,
    ThreadId,
    AuthorId,
    Content,
    PublishedAt,
    EditedAt,
    FirstSeenAt,
    SyncedAt,
}
