//! Review entity - a reviewer's vote on a pull request.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Reviewer verdict.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum ReviewState {
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "approved_with_suggestions")]
    ApprovedWithSuggestions,
    #[sea_orm(string_value = "no_vote")]
    NoVote,
    #[sea_orm(string_value = "waiting_for_author")]
    WaitingForAuthor,
    #[sea_orm(string_value = "rejected")]
    Rejected,
}

impl ReviewState {
    /// Map an Azure DevOps reviewer vote to a state.
    pub fn from_vote(vote: i32) -> Self {
        match vote {
            v if v >= 10 => Self::Approved,
            v if v > 0 => Self::ApprovedWithSuggestions,
            0 => Self::NoVote,
            v if v > -10 => Self::WaitingForAuthor,
            _ => Self::Rejected,
        }
    }

    /// Whether the reviewer actually cast a vote.
    pub fn has_voted(self) -> bool {
        self != Self::NoVote
    }
}

/// Natural key: (`pull_request_id`, `external_id`).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "pull_request_reviews")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub pull_request_id: Uuid,
    pub external_id: String,
    pub reviewer_id: Uuid,
    pub state: ReviewState,
    pub vote: i32,
    #[sea_orm(default_value = false)]
    pub is_required: bool,
    pub submitted_at: Option<DateTimeWithTimeZone>,
    pub first_seen_at: DateTimeWithTimeZone,
    pub synced_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::pull_request::Entity",
        from = "Column::PullRequestId",
        to = "super::pull_request::Column::Id",
        on_delete = "Cascade"
    )]
    PullRequest,
}

impl Related<super::pull_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PullRequest.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
