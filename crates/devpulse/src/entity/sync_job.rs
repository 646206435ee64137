//! SyncJob entity - one orchestrator run against one repository.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::entity::job_status::{JobStatus, SyncType};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub repository_id: Uuid,
    /// Scheduler batch that dispatched this job, if any.
    pub batch_id: Option<Uuid>,

    pub status: JobStatus,
    pub sync_type: SyncType,

    /// Set when the job transitions to running. Becomes the repository's
    /// `last_sync_at` when the job completes with new data.
    pub started_at: Option<DateTimeWithTimeZone>,
    pub completed_at: Option<DateTimeWithTimeZone>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
    pub records_processed: i64,
    /// Cooperative cancellation flag, observed between pages.
    #[sea_orm(default_value = false)]
    pub cancel_requested: bool,

    pub created_at: DateTimeWithTimeZone,
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

impl Model {
    /// Wall-clock duration of the job, when both ends are known.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
