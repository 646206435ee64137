//! Idempotent notifications and single-resolution approvals.
//!
//! At most one unread notification exists per (kind, target, recipient). A
//! batch produces one digest per recipient, never one row per failed
//! repository. Access requests are resolved by exactly one approver: the
//! winning transaction marks every sibling notification `action_taken`, and
//! later attempts get [`NotificationError::Conflict`].

mod access;
mod notifier;

use std::sync::Arc;

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use thiserror::Error;
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entity::prelude::*;

pub use notifier::{Notifier, TracingNotifier};

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The target was already resolved by someone else.
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Delivery failed: {message}")]
    Delivery { message: String },
}

impl NotificationError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, NotificationError::Conflict { .. })
    }
}

/// A notification to create.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub kind: NotificationKind,
    pub target_entity_id: String,
    pub recipient_id: String,
    pub title: String,
    pub message: String,
    pub metadata: serde_json::Value,
}

/// Stores notifications and hands new ones to a [`Notifier`].
#[derive(Clone)]
pub struct NotificationService {
    db: Arc<DatabaseConnection>,
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    /// Service delivering through [`TracingNotifier`].
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self::with_notifier(db, Arc::new(TracingNotifier))
    }

    pub fn with_notifier(db: Arc<DatabaseConnection>, notifier: Arc<dyn Notifier>) -> Self {
        Self { db, notifier }
    }

    fn db(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    /// Create a notification unless an unread one already exists for the same
    /// kind, target and recipient.
    ///
    /// Returns the stored row and whether it was created by this call.
    pub async fn create_if_absent(
        &self,
        new: NewNotification,
    ) -> Result<(NotificationModel, bool), NotificationError> {
        if let Some(existing) = self.find_unread(&new).await? {
            return Ok((existing, false));
        }

        let now = Utc::now().fixed_offset();
        let model = NotificationActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(new.kind),
            status: Set(NotificationStatus::Unread),
            target_entity_id: Set(new.target_entity_id.clone()),
            recipient_id: Set(new.recipient_id.clone()),
            title: Set(new.title.clone()),
            message: Set(new.message.clone()),
            metadata: Set(new.metadata.clone()),
            created_at: Set(now),
            read_at: Set(None),
            action_taken_at: Set(None),
            updated_at: Set(now),
        };

        let created = match model.insert(self.db()).await {
            Ok(created) => created,
            // Lost the race against a concurrent creator; theirs is the one.
            Err(e) if is_unique_violation(&e) => {
                let existing = self.find_unread(&new).await?.ok_or(NotificationError::Database(e))?;
                return Ok((existing, false));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.notifier.deliver(&created).await {
            tracing::warn!(
                notification_id = %created.id,
                recipient = %created.recipient_id,
                error = %e,
                "Notification delivery failed"
            );
        }

        Ok((created, true))
    }

    async fn find_unread(&self, new: &NewNotification) -> Result<Option<NotificationModel>, DbErr> {
        Notification::find()
            .filter(NotificationColumn::Kind.eq(new.kind))
            .filter(NotificationColumn::TargetEntityId.eq(new.target_entity_id.as_str()))
            .filter(NotificationColumn::RecipientId.eq(new.recipient_id.as_str()))
            .filter(NotificationColumn::Status.eq(NotificationStatus::Unread))
            .one(self.db.as_ref())
            .await
    }

    pub async fn get(&self, id: Uuid) -> Result<NotificationModel, NotificationError> {
        Notification::find_by_id(id)
            .one(self.db())
            .await?
            .ok_or_else(|| NotificationError::NotFound {
                entity: "notification",
                id: id.to_string(),
            })
    }

    /// Move an unread notification to `read`.
    ///
    /// Returns `false` when the notification was already read or resolved.
    pub async fn mark_as_read(&self, id: Uuid) -> Result<bool, NotificationError> {
        let now = Utc::now().fixed_offset();
        let result = Notification::update_many()
            .col_expr(NotificationColumn::Status, Expr::value(NotificationStatus::Read))
            .col_expr(NotificationColumn::ReadAt, Expr::value(now))
            .col_expr(NotificationColumn::UpdatedAt, Expr::value(now))
            .filter(NotificationColumn::Id.eq(id))
            .filter(NotificationColumn::Status.eq(NotificationStatus::Unread))
            .exec(self.db())
            .await?;

        if result.rows_affected == 0 {
            // Distinguish "already read" from "no such notification".
            self.get(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Resolve a notification. Returns `false` when it was already resolved.
    pub async fn mark_as_action_taken(&self, id: Uuid) -> Result<bool, NotificationError> {
        let now = Utc::now().fixed_offset();
        let result = Notification::update_many()
            .col_expr(
                NotificationColumn::Status,
                Expr::value(NotificationStatus::ActionTaken),
            )
            .col_expr(NotificationColumn::ActionTakenAt, Expr::value(now))
            .col_expr(NotificationColumn::UpdatedAt, Expr::value(now))
            .filter(NotificationColumn::Id.eq(id))
            .filter(NotificationColumn::Status.ne(NotificationStatus::ActionTaken))
            .exec(self.db())
            .await?;

        if result.rows_affected == 0 {
            self.get(id).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Unread notifications of a recipient, newest first.
    pub async fn list_unread(&self, recipient_id: &str) -> Result<Vec<NotificationModel>, NotificationError> {
        Ok(Notification::find()
            .filter(NotificationColumn::RecipientId.eq(recipient_id))
            .filter(NotificationColumn::Status.eq(NotificationStatus::Unread))
            .order_by_desc(NotificationColumn::CreatedAt)
            .all(self.db())
            .await?)
    }

    /// Send one failure digest per recipient for a batch.
    ///
    /// Returns the number of notifications created. Re-sending the digest of
    /// the same batch is a no-op while the previous one is unread.
    pub async fn send_failure_notification(
        &self,
        batch_id: Uuid,
        failure_count: usize,
        total_processed: usize,
        recipients: &[String],
    ) -> Result<usize, NotificationError> {
        let title = format!("Sync batch finished with {failure_count} failure(s)");
        let message = format!(
            "{failure_count} of {total_processed} repositories failed to sync in batch {batch_id}."
        );
        let metadata = serde_json::json!({
            "batch_id": batch_id,
            "failure_count": failure_count,
            "total_processed": total_processed,
        });

        self.send_digest(NotificationKind::SyncFailure, batch_id, &title, &message, metadata, recipients)
            .await
    }

    /// Send one success notification per recipient for a batch.
    pub async fn send_success_notification(
        &self,
        batch_id: Uuid,
        total_processed: usize,
        recipients: &[String],
    ) -> Result<usize, NotificationError> {
        let title = "Sync batch completed".to_string();
        let message = format!("All {total_processed} repositories synced in batch {batch_id}.");
        let metadata = serde_json::json!({
            "batch_id": batch_id,
            "total_processed": total_processed,
        });

        self.send_digest(NotificationKind::SyncSuccess, batch_id, &title, &message, metadata, recipients)
            .await
    }

    async fn send_digest(
        &self,
        kind: NotificationKind,
        batch_id: Uuid,
        title: &str,
        message: &str,
        metadata: serde_json::Value,
        recipients: &[String],
    ) -> Result<usize, NotificationError> {
        let mut created = 0;
        for recipient in recipients {
            let (_, was_created) = self
                .create_if_absent(NewNotification {
                    kind,
                    target_entity_id: batch_id.to_string(),
                    recipient_id: recipient.clone(),
                    title: title.to_string(),
                    message: message.to_string(),
                    metadata: metadata.clone(),
                })
                .await?;
            if was_created {
                created += 1;
            }
        }

        tracing::info!(%batch_id, %kind, recipients = recipients.len(), created, "Batch digest sent");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_recognized() {
        let err = NotificationError::Conflict {
            message: "already approved".into(),
        };
        assert!(err.is_conflict());
        assert_eq!(err.to_string(), "Conflict: already approved");

        let err = NotificationError::NotFound {
            entity: "notification",
            id: "x".into(),
        };
        assert!(!err.is_conflict());
    }

    #[cfg(all(feature = "sqlite", feature = "migrate"))]
    mod db {
        use std::sync::Mutex;

        use async_trait::async_trait;

        use super::*;

        #[derive(Default)]
        struct RecordingNotifier {
            delivered: Mutex<Vec<Uuid>>,
        }

        #[async_trait]
        impl Notifier for RecordingNotifier {
            async fn deliver(&self, notification: &NotificationModel) -> Result<(), NotificationError> {
                self.delivered.lock().unwrap().push(notification.id);
                Ok(())
            }
        }

        struct FailingNotifier;

        #[async_trait]
        impl Notifier for FailingNotifier {
            async fn deliver(&self, _: &NotificationModel) -> Result<(), NotificationError> {
                Err(NotificationError::Delivery {
                    message: "smtp down".into(),
                })
            }
        }

        async fn db() -> Arc<DatabaseConnection> {
            Arc::new(
                crate::db::connect_and_migrate("sqlite::memory:")
                    .await
                    .expect("test db should migrate"),
            )
        }

        fn new_notification(recipient: &str) -> NewNotification {
            NewNotification {
                kind: NotificationKind::SyncFailure,
                target_entity_id: "batch-1".into(),
                recipient_id: recipient.into(),
                title: "t".into(),
                message: "m".into(),
                metadata: serde_json::json!({}),
            }
        }

        #[tokio::test]
        async fn create_if_absent_deduplicates_unread() {
            let notifier = Arc::new(RecordingNotifier::default());
            let service = NotificationService::with_notifier(db().await, notifier.clone());

            let (first, created) = service.create_if_absent(new_notification("ops")).await.unwrap();
            assert!(created);
            let (again, created) = service.create_if_absent(new_notification("ops")).await.unwrap();
            assert!(!created);
            assert_eq!(first.id, again.id);
            assert_eq!(notifier.delivered.lock().unwrap().len(), 1);

            // Once read, a new notification for the same target may be created.
            assert!(service.mark_as_read(first.id).await.unwrap());
            assert!(!service.mark_as_read(first.id).await.unwrap());
            let (third, created) = service.create_if_absent(new_notification("ops")).await.unwrap();
            assert!(created);
            assert_ne!(third.id, first.id);
        }

        #[tokio::test]
        async fn delivery_failure_keeps_the_row() {
            let service = NotificationService::with_notifier(db().await, Arc::new(FailingNotifier));
            let (stored, created) = service.create_if_absent(new_notification("ops")).await.unwrap();
            assert!(created);
            assert_eq!(service.list_unread("ops").await.unwrap()[0].id, stored.id);
        }

        #[tokio::test]
        async fn digest_is_one_per_recipient() {
            let service = NotificationService::new(db().await);
            let batch_id = Uuid::new_v4();
            let recipients = vec!["lead".to_string(), "ops".to_string()];

            let created = service
                .send_failure_notification(batch_id, 3, 10, &recipients)
                .await
                .unwrap();
            assert_eq!(created, 2);

            let repeated = service
                .send_failure_notification(batch_id, 3, 10, &recipients)
                .await
                .unwrap();
            assert_eq!(repeated, 0);

            let unread = service.list_unread("lead").await.unwrap();
            assert_eq!(unread.len(), 1);
            assert_eq!(unread[0].kind, NotificationKind::SyncFailure);
            assert_eq!(unread[0].metadata["failure_count"], 3);
        }

        #[tokio::test]
        async fn action_taken_is_terminal() {
            let service = NotificationService::new(db().await);
            let (stored, _) = service.create_if_absent(new_notification("ops")).await.unwrap();

            assert!(service.mark_as_action_taken(stored.id).await.unwrap());
            assert!(!service.mark_as_action_taken(stored.id).await.unwrap());
            assert!(!service.mark_as_read(stored.id).await.unwrap());
            assert_eq!(service.get(stored.id).await.unwrap().status, NotificationStatus::ActionTaken);

            assert!(matches!(
                service.mark_as_read(Uuid::new_v4()).await,
                Err(NotificationError::NotFound { .. })
            ));
        }
    }
}
