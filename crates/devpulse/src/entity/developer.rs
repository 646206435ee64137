//! Developer entity - internal identity that activity records are attributed to.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Fixed id of the reserved "Unknown Developer" row.
pub const UNKNOWN_DEVELOPER_ID: Uuid = Uuid::from_u128(0x00000000_0000_4000_8000_0000_0000_0001);

/// Display name of the reserved "Unknown Developer" row.
pub const UNKNOWN_DEVELOPER_NAME: &str = "Unknown Developer";

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "developers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub display_name: String,
    /// Lower-cased email, unique when present.
    pub email: Option<String>,
    /// Lower-cased login / unique name, unique when present.
    pub login: Option<String>,
    /// Platform user id, unique when present.
    pub external_id: Option<String>,
    /// Marks the reserved "Unknown Developer" row.
    #[sea_orm(default_value = false)]
    pub is_sentinel: bool,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
