//! SchedulerState entity - the persisted singleton describing batch activity.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Primary key of the single scheduler state row.
pub const SINGLETON_ID: i32 = 1;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "scheduler_state")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i32,

    /// A batch is currently executing.
    pub is_running: bool,
    pub last_run_at: Option<DateTimeWithTimeZone>,
    pub next_run_at: Option<DateTimeWithTimeZone>,
    pub current_batch_id: Option<Uuid>,
    pub last_batch_id: Option<Uuid>,

    // ─── Counters (cumulative) ───────────────────────────────────────────────
    pub total_repos_processed: i64,
    pub successful_syncs: i64,
    pub failed_syncs: i64,
    pub deferred_syncs: i64,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    /// Persisted scheduler configuration, absent until first saved.
    #[sea_orm(column_type = "Json", nullable)]
    pub config: Option<serde_json::Value>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
