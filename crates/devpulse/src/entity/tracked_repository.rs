//! TrackedRepository entity - a source-control repository whose activity is synced.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A repository registered for activity sync.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tracked_repositories")]
pub struct Model {
    /// Internal UUID primary key.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    // ─── Naming ──────────────────────────────────────────────────────────────
    /// Repository name as shown by the platform.
    pub name: String,
    /// Organization (Azure DevOps collection/organization).
    pub organization: String,
    /// Project the repository lives in.
    pub project: String,
    /// Platform-side repository id, when known.
    pub external_id: Option<String>,

    // ─── Access ──────────────────────────────────────────────────────────────
    /// API base URL (e.g. `https://dev.azure.com`).
    pub base_url: String,
    /// Encrypted access token. Decryption is owned by the credential provider.
    #[sea_orm(column_type = "Text", nullable)]
    #[serde(skip_serializing)]
    pub encrypted_credential: Option<String>,

    // ─── Sync State ──────────────────────────────────────────────────────────
    /// Lower bound of the next incremental window.
    ///
    /// Only advanced by a completed job that processed at least one record.
    pub last_sync_at: Option<DateTimeWithTimeZone>,
    /// Whether scheduled batches include this repository.
    #[sea_orm(default_value = true)]
    pub enabled: bool,

    // ─── Timestamps ──────────────────────────────────────────────────────────
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_job::Entity")]
    SyncJobs,
    #[sea_orm(has_many = "super::pull_request::Entity")]
    PullRequests,
    #[sea_orm(has_many = "super::commit::Entity")]
    Commits,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJobs.def()
    }
}

impl Related<super::pull_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PullRequests.def()
    }
}

impl Related<super::commit::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Commits.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Human-readable `organization/project/name` path.
    pub fn full_name(&self) -> String {
        format!("{}/{}/{}", self.organization, self.project, self.name)
    }

    /// Platform identifier used in API paths: the external id when known, else the name.
    pub fn api_identifier(&self) -> &str {
        self.external_id.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_model(external_id: Option<&str>) -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: Uuid::new_v4(),
            name: "api".to_string(),
            organization: "contoso".to_string(),
            project: "platform".to_string(),
            external_id: external_id.map(str::to_string),
            base_url: "https://dev.azure.com".to_string(),
            encrypted_credential: None,
            last_sync_at: None,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_full_name() {
        assert_eq!(make_model(None).full_name(), "contoso/platform/api");
    }

    #[test]
    fn test_api_identifier_prefers_external_id() {
        assert_eq!(make_model(Some("6f1c")).api_identifier(), "6f1c");
        assert_eq!(make_model(None).api_identifier(), "api");
    }

    #[test]
    fn test_credential_is_not_serialized() {
        let mut model = make_model(None);
        model.encrypted_credential = Some("cipher".to_string());
        let json = serde_json::to_value(&model).unwrap();
        assert!(json.get("encrypted_credential").is_none());
    }
}
