//! Create notifications and access requests.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Notifications::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Notifications::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Notifications::Kind).string().not_null())
                    .col(
                        ColumnDef::new(Notifications::Status)
                            .string()
                            .not_null()
                            .default("unread"),
                    )
                    .col(
                        ColumnDef::new(Notifications::TargetEntityId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Notifications::RecipientId).string().not_null())
                    .col(ColumnDef::new(Notifications::Title).string().not_null())
                    .col(ColumnDef::new(Notifications::Message).text().not_null())
                    .col(
                        ColumnDef::new(Notifications::Metadata)
                            .json()
                            .not_null()
                            .default(Expr::cust("'{}'")),
                    )
                    .col(
                        ColumnDef::new(Notifications::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Notifications::ReadAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Notifications::ActionTakenAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Notifications::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // At most one unread notification per (kind, target, recipient)
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_notifications_unread_dedup \
                 ON notifications (kind, target_entity_id, recipient_id) \
                 WHERE status = 'unread'",
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_notifications_recipient_status")
                    .table(Notifications::Table)
                    .col(Notifications::RecipientId)
                    .col(Notifications::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AccessRequests::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AccessRequests::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(AccessRequests::RequesterId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(AccessRequests::Resource).string().not_null())
                    .col(ColumnDef::new(AccessRequests::Reason).text().null())
                    .col(
                        ColumnDef::new(AccessRequests::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(AccessRequests::ResolvedBy).string().null())
                    .col(
                        ColumnDef::new(AccessRequests::ResolvedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(AccessRequests::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(AccessRequests::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Notifications::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Notifications {
    Table,
    Id,
    Kind,
    Status,
    TargetEntityId,
    RecipientId,
    Title,
    Message,
    Metadata,
    CreatedAt,
    ReadAt,
    ActionTakenAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum AccessRequests {
    Table,
    Id,
    RequesterId,
    Resource,
    Reason,
    Status,
    ResolvedBy,
    ResolvedAt,
    CreatedAt,
}
