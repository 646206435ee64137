use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Condition, Expr};
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entity::tracked_repository::{
    ActiveModel, Column, Entity as TrackedRepository, Model,
};

use super::errors::{RepositoryError, Result};

/// Input for registering a repository.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub name: String,
    pub organization: String,
    pub project: String,
    pub base_url: String,
    pub external_id: Option<String>,
    /// Encrypted credential, stored as given.
    pub credential: Option<String>,
}

impl NewRepository {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("name", &self.name),
            ("organization", &self.organization),
            ("project", &self.project),
            ("base_url", &self.base_url),
        ] {
            if value.trim().is_empty() {
                return Err(RepositoryError::InvalidInput {
                    message: format!("Missing required field: {}", field),
                });
            }
        }
        Ok(())
    }
}

// ─── Single Record Operations ────────────────────────────────────────────────

/// Register a new repository.
///
/// # Errors
/// Returns `RepositoryError::Duplicate` if the natural key
/// (base_url, organization, project, name) is already registered.
pub async fn insert(db: &DatabaseConnection, new: NewRepository) -> Result<Model> {
    new.validate()?;

    let now = Utc::now().fixed_offset();
    let model = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(new.name.clone()),
        organization: Set(new.organization.clone()),
        project: Set(new.project.clone()),
        external_id: Set(new.external_id),
        base_url: Set(new.base_url.trim_end_matches('/').to_string()),
        encrypted_credential: Set(new.credential),
        last_sync_at: Set(None),
        enabled: Set(true),
        created_at: Set(now),
        updated_at: Set(now),
    };

    model.insert(db).await.map_err(|err| {
        if is_unique_violation(&err) {
            RepositoryError::Duplicate {
                organization: new.organization,
                project: new.project,
                name: new.name,
            }
        } else {
            RepositoryError::from(err)
        }
    })
}

/// Find a repository by its UUID.
pub async fn find_by_id(db: &DatabaseConnection, id: Uuid) -> Result<Option<Model>> {
    TrackedRepository::find_by_id(id)
        .one(db)
        .await
        .map_err(RepositoryError::from)
}

/// Find a repository by its UUID, failing when it does not exist.
pub async fn get(db: &DatabaseConnection, id: Uuid) -> Result<Model> {
    find_by_id(db, id)
        .await?
        .ok_or_else(|| RepositoryError::not_found_by_id(id))
}

/// Find a repository by its natural key.
pub async fn find_by_natural_key(
    db: &DatabaseConnection,
    base_url: &str,
    organization: &str,
    project: &str,
    name: &str,
) -> Result<Option<Model>> {
    TrackedRepository::find()
        .filter(Column::BaseUrl.eq(base_url.trim_end_matches('/')))
        .filter(Column::Organization.eq(organization))
        .filter(Column::Project.eq(project))
        .filter(Column::Name.eq(name))
        .one(db)
        .await
        .map_err(RepositoryError::from)
}

/// Include or exclude a repository from scheduled batches.
pub async fn set_enabled(db: &DatabaseConnection, id: Uuid, enabled: bool) -> Result<Model> {
    let existing = get(db, id).await?;
    let mut model: ActiveModel = existing.into();
    model.enabled = Set(enabled);
    model.updated_at = Set(Utc::now().fixed_offset());
    model.update(db).await.map_err(RepositoryError::from)
}

/// Move `last_sync_at` forward to `at`.
///
/// The column never moves backwards: a job that started earlier than the
/// currently stored value leaves it untouched. Returns whether the row changed.
pub async fn advance_last_sync_at(
    db: &DatabaseConnection,
    id: Uuid,
    at: DateTime<Utc>,
) -> Result<bool> {
    let at = at.fixed_offset();
    let result = TrackedRepository::update_many()
        .col_expr(Column::LastSyncAt, Expr::value(at))
        .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
        .filter(Column::Id.eq(id))
        .filter(
            Condition::any()
                .add(Column::LastSyncAt.is_null())
                .add(Column::LastSyncAt.lt(at)),
        )
        .exec(db)
        .await?;
    Ok(result.rows_affected > 0)
}

/// Delete a repository by its UUID. Jobs and activity cascade.
///
/// Returns the number of rows deleted (0 or 1).
pub async fn delete(db: &DatabaseConnection, id: Uuid) -> Result<u64> {
    let result = TrackedRepository::delete_by_id(id).exec(db).await?;
    Ok(result.rows_affected)
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use chrono::Duration;

    use crate::connect_and_migrate;

    use super::*;

    async fn setup_db() -> DatabaseConnection {
        connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate")
    }

    fn new_repo(name: &str) -> NewRepository {
        NewRepository {
            name: name.to_string(),
            organization: "contoso".to_string(),
            project: "platform".to_string(),
            base_url: "https://dev.azure.com/".to_string(),
            external_id: None,
            credential: None,
        }
    }

    #[tokio::test]
    async fn test_insert_rejects_missing_required_field() {
        let db = setup_db().await;
        let mut item = new_repo("api");
        item.organization = " ".to_string();

        let err = insert(&db, item).await.expect_err("insert should fail");
        match err {
            RepositoryError::InvalidInput { message } => {
                assert!(message.contains("organization"));
            }
            other => panic!("expected invalid input error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_insert_detects_duplicates() {
        let db = setup_db().await;
        let first = insert(&db, new_repo("api")).await.expect("first insert");
        assert_eq!(first.base_url, "https://dev.azure.com");
        assert!(first.enabled);

        let err = insert(&db, new_repo("api"))
            .await
            .expect_err("duplicate should fail");
        assert!(matches!(err, RepositoryError::Duplicate { .. }), "{err:?}");

        let found = find_by_natural_key(&db, "https://dev.azure.com", "contoso", "platform", "api")
            .await
            .expect("lookup should succeed")
            .expect("repo should exist");
        assert_eq!(found.id, first.id);
    }

    #[tokio::test]
    async fn test_set_enabled_and_get() {
        let db = setup_db().await;
        let repo = insert(&db, new_repo("api")).await.unwrap();

        let disabled = set_enabled(&db, repo.id, false).await.unwrap();
        assert!(!disabled.enabled);

        let missing = get(&db, Uuid::new_v4()).await.expect_err("missing id");
        assert!(matches!(missing, RepositoryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_last_sync_at_only_moves_forward() {
        let db = setup_db().await;
        let repo = insert(&db, new_repo("api")).await.unwrap();
        let t1 = Utc::now();
        let t0 = t1 - Duration::hours(1);

        assert!(advance_last_sync_at(&db, repo.id, t1).await.unwrap());
        assert!(!advance_last_sync_at(&db, repo.id, t0).await.unwrap());

        let stored = get(&db, repo.id).await.unwrap();
        assert_eq!(
            stored.last_sync_at.map(|t| t.timestamp_micros()),
            Some(t1.timestamp_micros())
        );
    }

    #[tokio::test]
    async fn test_delete_removes_row() {
        let db = setup_db().await;
        let repo = insert(&db, new_repo("api")).await.unwrap();
        assert_eq!(delete(&db, repo.id).await.unwrap(), 1);
        assert_eq!(delete(&db, repo.id).await.unwrap(), 0);
    }
}
