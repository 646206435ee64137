//! Delivery of notifications outside the database.

use async_trait::async_trait;

use crate::entity::notification::Model as NotificationModel;

use super::NotificationError;

/// Pushes a stored notification to its recipient (mail, chat, log).
///
/// Delivery failures are logged by the caller and never undo the stored row.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, notification: &NotificationModel) -> Result<(), NotificationError>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn deliver(&self, notification: &NotificationModel) -> Result<(), NotificationError> {
        tracing::info!(
            notification_id = %notification.id,
            kind = %notification.kind,
            recipient = %notification.recipient_id,
            target = %notification.target_entity_id,
            title = %notification.title,
            "{}",
            notification.message
        );
        Ok(())
    }
}
