//! Notification entity with dedup-friendly status lifecycle.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Resolution state of a notification. `Unread` is the only unresolved state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    #[sea_orm(string_value = "unread")]
    Unread,
    #[sea_orm(string_value = "read")]
    Read,
    #[sea_orm(string_value = "action_taken")]
    ActionTaken,
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Unread => write!(f, "unread"),
            NotificationStatus::Read => write!(f, "read"),
            NotificationStatus::ActionTaken => write!(f, "action_taken"),
        }
    }
}

/// What a notification is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Digest of failed repository syncs in one batch.
    #[sea_orm(string_value = "sync_failure")]
    SyncFailure,
    /// A batch finished without failures.
    #[sea_orm(string_value = "sync_success")]
    SyncSuccess,
    /// An access request waiting for a single approver.
    #[sea_orm(string_value = "access_request")]
    AccessRequest,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::SyncFailure => write!(f, "sync_failure"),
            NotificationKind::SyncSuccess => write!(f, "sync_success"),
            NotificationKind::AccessRequest => write!(f, "access_request"),
        }
    }
}

/// At most one `Unread` row exists per (`kind`, `target_entity_id`, `recipient_id`).
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "notifications")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub kind: NotificationKind,
    pub status: NotificationStatus,
    pub target_entity_id: String,
    pub recipient_id: String,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub message: String,
    #[sea_orm(column_type = "Json")]
    pub metadata: serde_json::Value,
    pub created_at: DateTimeWithTimeZone,
    pub read_at: Option<DateTimeWithTimeZone>,
    pub action_taken_at: Option<DateTimeWithTimeZone>,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
