//! PullRequest entity - a pull request with its derived time metrics.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Platform state of a pull request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    #[sea_orm(string_value = "active")]
    Active,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "abandoned")]
    Abandoned,
}

impl std::str::FromStr for PullRequestState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" | "open" => Ok(Self::Active),
            "completed" | "merged" => Ok(Self::Completed),
            "abandoned" | "closed" => Ok(Self::Abandoned),
            _ => Err(format!("Unknown pull request state: {}", s)),
        }
    }
}

/// Natural key: (`repository_id`, `external_id`).
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pull_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Identity ────────────────────────────────────────────────────────────
    pub repository_id: Uuid,
    pub external_id: String,
    pub author_id: Uuid,

    // ─── Content ─────────────────────────────────────────────────────────────
    pub title: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub description: Option<String>,
    pub state: PullRequestState,
    pub source_branch: String,
    pub target_branch: String,
    #[sea_orm(default_value = false)]
    pub is_draft: bool,

    // ─── Platform Timestamps ─────────────────────────────────────────────────
    pub created_at: DateTimeWithTimeZone,
    pub closed_at: Option<DateTimeWithTimeZone>,
    pub merged_at: Option<DateTimeWithTimeZone>,
    pub first_commit_at: Option<DateTimeWithTimeZone>,
    pub first_review_at: Option<DateTimeWithTimeZone>,

    // ─── Derived Metrics (days) ──────────────────────────────────────────────
    pub cycle_time_days: Option<f64>,
    pub review_time_days: Option<f64>,
    pub lead_time_days: Option<f64>,

    // ─── Bookkeeping ─────────────────────────────────────────────────────────
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
    #[sea_orm(has_many = "super::review::Entity")]
    Reviews,
    #[sea_orm(has_many = "super::comment::Entity")]
    Comments,
}

impl Related<super::tracked_repository::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Repository.def()
    }
}

impl Related<super::review::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Reviews.def()
    }
}

impl Related<super::comment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Comments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
