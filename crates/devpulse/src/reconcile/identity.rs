//! Actor to developer resolution.
//!
//! Order: platform id, then email, then login, then a new row. Any failure
//! along the way lands on the "Unknown Developer" sentinel; identity problems
//! never fail the surrounding job.

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entity::developer::{
    ActiveModel, Column, Entity as Developer, Model, UNKNOWN_DEVELOPER_ID, UNKNOWN_DEVELOPER_NAME,
};
use crate::platform::{ActorRef, RawIdentity};

use super::{ReconcileError, Reconciler};

/// Identity fields after trimming and lower-casing.
#[derive(Debug, Default, PartialEq, Eq)]
struct NormalizedIdentity {
    external_id: Option<String>,
    email: Option<String>,
    login: Option<String>,
    display_name: Option<String>,
}

impl NormalizedIdentity {
    fn from_raw(raw: &RawIdentity) -> Self {
        fn clean(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Self {
            external_id: clean(&raw.external_id),
            email: clean(&raw.email).map(|e| e.to_lowercase()),
            login: clean(&raw.login).map(|l| l.to_lowercase()),
            display_name: clean(&raw.display_name),
        }
    }

    fn is_matchable(&self) -> bool {
        self.external_id.is_some() || self.email.is_some() || self.login.is_some()
    }

    fn display_name(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.login.clone())
            .or_else(|| self.email.clone())
            .or_else(|| self.external_id.clone())
            .unwrap_or_else(|| UNKNOWN_DEVELOPER_NAME.to_string())
    }
}

impl Reconciler {
    /// Make sure the sentinel developer row exists.
    pub async fn ensure_sentinel(&self) -> Result<Uuid, ReconcileError> {
        if Developer::find_by_id(UNKNOWN_DEVELOPER_ID)
            .one(self.db())
            .await?
            .is_some()
        {
            return Ok(UNKNOWN_DEVELOPER_ID);
        }

        let now = Utc::now().fixed_offset();
        let sentinel = ActiveModel {
            id: Set(UNKNOWN_DEVELOPER_ID),
            display_name: Set(UNKNOWN_DEVELOPER_NAME.to_string()),
            email: Set(None),
            login: Set(None),
            external_id: Set(None),
            is_sentinel: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match Developer::insert(sentinel)
            .exec_without_returning(self.db())
            .await
        {
            Ok(_) => {
                tracing::info!("Created sentinel developer");
                Ok(UNKNOWN_DEVELOPER_ID)
            }
            Err(e) if is_unique_violation(&e) => Ok(UNKNOWN_DEVELOPER_ID),
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve an actor reference to a developer id. Never fails.
    pub async fn resolve_actor(&self, actor: &ActorRef) -> Uuid {
        let resolved = match actor {
            ActorRef::Resolved(id) => self.verify_developer(*id).await,
            ActorRef::External(raw) => self.resolve_identity(raw).await,
        };

        resolved.unwrap_or_else(|err| {
            tracing::warn!(error = %err, "Identity resolution failed, using sentinel developer");
            UNKNOWN_DEVELOPER_ID
        })
    }

    async fn verify_developer(&self, id: Uuid) -> Result<Uuid, ReconcileError> {
        Developer::find_by_id(id)
            .one(self.db())
            .await?
            .map(|d| d.id)
            .ok_or(ReconcileError::NotFound {
                entity: "developer",
                id,
            })
    }

    /// Match or create a developer for a raw platform identity.
    pub async fn resolve_identity(&self, raw: &RawIdentity) -> Result<Uuid, ReconcileError> {
        let identity = NormalizedIdentity::from_raw(raw);
        if !identity.is_matchable() {
            return Err(ReconcileError::EmptyIdentity);
        }

        if let Some(existing) = self.find_match(&identity).await? {
            return Ok(existing);
        }

        match self.create_developer(&identity).await {
            Ok(id) => Ok(id),
            // Another writer created the same developer concurrently.
            Err(ReconcileError::Database(e)) if is_unique_violation(&e) => self
                .find_match(&identity)
                .await?
                .ok_or(ReconcileError::Database(e)),
            Err(e) => Err(e),
        }
    }

    async fn find_match(&self, identity: &NormalizedIdentity) -> Result<Option<Uuid>, ReconcileError> {
        if let Some(external_id) = &identity.external_id
            && let Some(found) = Developer::find()
                .filter(Column::ExternalId.eq(external_id.as_str()))
                .one(self.db())
                .await?
        {
            return Ok(Some(found.id));
        }

        let mut found = None;
        if let Some(email) = &identity.email {
            found = Developer::find()
                .filter(Column::Email.eq(email.as_str()))
                .one(self.db())
                .await?;
        }
        if found.is_none()
            && let Some(login) = &identity.login
        {
            found = Developer::find()
                .filter(Column::Login.eq(login.as_str()))
                .one(self.db())
                .await?;
        }

        match found {
            Some(developer) => {
                let id = developer.id;
                self.link_external_id(developer, identity).await;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Attach the platform id to a developer matched by email or login.
    async fn link_external_id(&self, developer: Model, identity: &NormalizedIdentity) {
        let Some(external_id) = identity.external_id.clone() else {
            return;
        };
        if developer.external_id.is_some() || developer.is_sentinel {
            return;
        }

        let id = developer.id;
        let mut model: ActiveModel = developer.into();
        model.external_id = Set(Some(external_id));
        model.updated_at = Set(Utc::now().fixed_offset());
        if let Err(e) = model.update(self.db()).await {
            tracing::warn!(developer_id = %id, error = %e, "Failed to link external id");
        }
    }

    async fn create_developer(&self, identity: &NormalizedIdentity) -> Result<Uuid, ReconcileError> {
        let now = Utc::now().fixed_offset();
        let id = Uuid::new_v4();
        ActiveModel {
            id: Set(id),
            display_name: Set(identity.display_name()),
            email: Set(identity.email.clone()),
            login: Set(identity.login.clone()),
            external_id: Set(identity.external_id.clone()),
            is_sentinel: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db())
        .await?;

        tracing::debug!(developer_id = %id, "Created developer");
        Ok(id)
    }
}
