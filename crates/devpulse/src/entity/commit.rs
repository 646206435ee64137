//! Commit entity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Natural key: (`repository_id`, `sha`).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "commits")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repository_id: Uuid,
    pub sha: String,
    pub author_id: Uuid,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    pub authored_at: DateTimeWithTimeZone,
    pub committed_at: Option<DateTimeWithTimeZone>,
    pub additions: i32,
    pub edits: i32,
    pub deletions: i32,
    pub first_seen_at: DateTimeWithTimeZone,
    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tracked_repository::Entity",
        from = "Column::RepositoryId",
        to = "super::tracked_repository::Column::Id",
        on_delete = "Cascade"
    )]
    Repository,
}

impl Related<super::tracked_repository::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Repository.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
