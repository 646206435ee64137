//! Access requests resolved by a single approver.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::entity::prelude::*;

use super::{NewNotification, NotificationError, NotificationService};

impl NotificationService {
    /// Record a pending access request and notify every approver.
    pub async fn create_access_request(
        &self,
        requester_id: &str,
        resource: &str,
        reason: Option<&str>,
        approvers: &[String],
    ) -> Result<(AccessRequestModel, Vec<NotificationModel>), NotificationError> {
        let now = Utc::now().fixed_offset();
        let request = AccessRequestActiveModel {
            id: Set(Uuid::new_v4()),
            requester_id: Set(requester_id.to_string()),
            resource: Set(resource.to_string()),
            reason: Set(reason.map(str::to_string)),
            status: Set(AccessRequestStatus::Pending),
            resolved_by: Set(None),
            resolved_at: Set(None),
            created_at: Set(now),
        }
        .insert(self.db())
        .await?;

        let mut notifications = Vec::with_capacity(approvers.len());
        for approver in approvers {
            let (notification, _) = self
                .create_if_absent(NewNotification {
                    kind: NotificationKind::AccessRequest,
                    target_entity_id: request.id.to_string(),
                    recipient_id: approver.clone(),
                    title: format!("Access requested to {resource}"),
                    message: format!("{requester_id} requests access to {resource}."),
                    metadata: serde_json::json!({
                        "request_id": request.id,
                        "requester_id": requester_id,
                        "resource": resource,
                    }),
                })
                .await?;
            notifications.push(notification);
        }

        tracing::info!(request_id = %request.id, %resource, approvers = approvers.len(), "Access request created");
        Ok((request, notifications))
    }

    /// Approve a pending access request from one of its notifications.
    ///
    /// # Errors
    /// [`NotificationError::Conflict`] when the request was already resolved,
    /// including by a concurrent approver.
    pub async fn approve_access_request(
        &self,
        request_id: Uuid,
        notification_id: Uuid,
        approver_id: &str,
    ) -> Result<AccessRequestModel, NotificationError> {
        self.resolve_access_request(request_id, notification_id, approver_id, AccessRequestStatus::Approved)
            .await
    }

    /// Reject a pending access request. Same rules as approval.
    pub async fn reject_access_request(
        &self,
        request_id: Uuid,
        notification_id: Uuid,
        approver_id: &str,
    ) -> Result<AccessRequestModel, NotificationError> {
        self.resolve_access_request(request_id, notification_id, approver_id, AccessRequestStatus::Rejected)
            .await
    }

    async fn resolve_access_request(
        &self,
        request_id: Uuid,
        notification_id: Uuid,
        approver_id: &str,
        outcome: AccessRequestStatus,
    ) -> Result<AccessRequestModel, NotificationError> {
        let txn = self.db().begin().await?;
        let target = request_id.to_string();

        let notification = Notification::find_by_id(notification_id)
            .one(&txn)
            .await?
            .filter(|n| n.kind == NotificationKind::AccessRequest && n.target_entity_id == target)
            .ok_or_else(|| NotificationError::NotFound {
                entity: "access request notification",
                id: notification_id.to_string(),
            })?;

        if notification.status == NotificationStatus::ActionTaken {
            return Err(NotificationError::Conflict {
                message: format!("access request {request_id} was already resolved"),
            });
        }

        let now = Utc::now().fixed_offset();
        let updated = AccessRequest::update_many()
            .col_expr(AccessRequestColumn::Status, Expr::value(outcome))
            .col_expr(
                AccessRequestColumn::ResolvedBy,
                Expr::value(Some(approver_id.to_string())),
            )
            .col_expr(AccessRequestColumn::ResolvedAt, Expr::value(now))
            .filter(AccessRequestColumn::Id.eq(request_id))
            .filter(AccessRequestColumn::Status.eq(AccessRequestStatus::Pending))
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            return Err(
                match AccessRequest::find_by_id(request_id).one(&txn).await? {
                    None => NotificationError::NotFound {
                        entity: "access request",
                        id: target,
                    },
                    Some(_) => NotificationError::Conflict {
                        message: format!("access request {request_id} was already resolved"),
                    },
                },
            );
        }

        mark_action_taken(
            &txn,
            Notification::update_many()
                .filter(NotificationColumn::Id.eq(notification_id))
                .filter(NotificationColumn::Status.ne(NotificationStatus::ActionTaken)),
            now,
        )
        .await?;

        let siblings = mark_action_taken(
            &txn,
            Notification::update_many()
                .filter(NotificationColumn::Kind.eq(NotificationKind::AccessRequest))
                .filter(NotificationColumn::TargetEntityId.eq(target.as_str()))
                .filter(NotificationColumn::Status.eq(NotificationStatus::Unread)),
            now,
        )
        .await?;

        let request = AccessRequest::find_by_id(request_id)
            .one(&txn)
            .await?
            .ok_or_else(|| NotificationError::NotFound {
                entity: "access request",
                id: target.clone(),
            })?;

        txn.commit().await?;

        tracing::info!(
            %request_id,
            approver = %approver_id,
            outcome = ?outcome,
            siblings_resolved = siblings,
            "Access request resolved"
        );
        Ok(request)
    }
}

async fn mark_action_taken<C: ConnectionTrait>(
    db: &C,
    update: sea_orm::UpdateMany<Notification>,
    now: chrono::DateTime<chrono::FixedOffset>,
) -> Result<u64, NotificationError> {
    let result = update
        .col_expr(
            NotificationColumn::Status,
            Expr::value(NotificationStatus::ActionTaken),
        )
        .col_expr(NotificationColumn::ActionTakenAt, Expr::value(now))
        .col_expr(NotificationColumn::UpdatedAt, Expr::value(now))
        .exec(db)
        .await?;
    Ok(result.rows_affected)
}

#[cfg(all(test, feature = "sqlite", feature = "migrate"))]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn service() -> NotificationService {
        let db = crate::db::connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate");
        NotificationService::new(Arc::new(db))
    }

    #[tokio::test]
    async fn approval_resolves_every_sibling() {
        let service = service().await;
        let approvers = vec!["alice".to_string(), "bob".to_string(), "carol".to_string()];
        let (request, notifications) = service
            .create_access_request("dave", "repo:payments", Some("on-call"), &approvers)
            .await
            .unwrap();
        assert_eq!(notifications.len(), 3);

        let approved = service
            .approve_access_request(request.id, notifications[1].id, "bob")
            .await
            .unwrap();
        assert_eq!(approved.status, AccessRequestStatus::Approved);
        assert_eq!(approved.resolved_by.as_deref(), Some("bob"));

        for n in &notifications {
            assert_eq!(service.get(n.id).await.unwrap().status, NotificationStatus::ActionTaken);
        }

        let err = service
            .reject_access_request(request.id, notifications[0].id, "alice")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn notification_must_belong_to_the_request() {
        let service = service().await;
        let approvers = vec!["alice".to_string()];
        let (first, _) = service
            .create_access_request("dave", "repo:a", None, &approvers)
            .await
            .unwrap();
        let (_, other) = service
            .create_access_request("erin", "repo:b", None, &approvers)
            .await
            .unwrap();

        let err = service
            .approve_access_request(first.id, other[0].id, "alice")
            .await
            .unwrap_err();
        assert!(matches!(err, NotificationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn read_notification_can_still_approve() {
        let service = service().await;
        let approvers = vec!["alice".to_string()];
        let (request, notifications) = service
            .create_access_request("dave", "repo:a", None, &approvers)
            .await
            .unwrap();
        service.mark_as_read(notifications[0].id).await.unwrap();

        let rejected = service
            .reject_access_request(request.id, notifications[0].id, "alice")
            .await
            .unwrap();
        assert_eq!(rejected.status, AccessRequestStatus::Rejected);
    }
}
