//! SyncLease entity - exclusive, expiring claim on a repository's sync slot.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "sync_leases")]
pub struct Model {
    /// Lease key (the repository id in string form).
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,
    /// Opaque owner token of the current holder.
    pub holder: String,
    pub acquired_at: DateTimeWithTimeZone,
    pub expires_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
