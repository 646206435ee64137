//! Notification inbox and single-approver access request commands.

use clap::Subcommand;
use console::style;
use devpulse::{AccessRequestModel, NotificationModel, SyncRuntime};
use tabled::Tabled;
use uuid::Uuid;

use super::output::{OutputFormat, format_stored_time, print_rows};

#[derive(Subcommand)]
pub(crate) enum NotificationsAction {
    /// List unread notifications of a recipient
    List {
        /// Recipient id (e.g., an email address)
        recipient: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
    /// Mark a notification as read
    Read {
        /// Notification id
        id: Uuid,
    },
}

#[derive(Subcommand)]
pub(crate) enum AccessAction {
    /// Ask the given approvers for access; the first decision wins
    Request {
        /// Who needs access
        requester: String,
        /// What access is requested for
        resource: String,

        /// Approver to notify (repeatable)
        #[arg(short, long = "approver", required = true)]
        approvers: Vec<String>,

        /// Reason shown to approvers
        #[arg(short, long)]
        reason: Option<String>,
    },
    /// Approve a pending request through one of its notifications
    Approve {
        request_id: Uuid,
        notification_id: Uuid,
        approver: String,
    },
    /// Reject a pending request through one of its notifications
    Reject {
        request_id: Uuid,
        notification_id: Uuid,
        approver: String,
    },
}

/// Display struct for notification listing.
#[derive(Debug, Clone, serde::Serialize, Tabled)]
struct NotificationDisplay {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Created")]
    created_at: String,
}

impl From<&NotificationModel> for NotificationDisplay {
    fn from(notification: &NotificationModel) -> Self {
        Self {
            id: notification.id.to_string(),
            kind: notification.kind.to_string(),
            target: notification.target_entity_id.clone(),
            title: notification.title.clone(),
            created_at: format_stored_time(Some(notification.created_at)),
        }
    }
}

pub(crate) async fn handle_notifications(
    runtime: &SyncRuntime,
    action: NotificationsAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = runtime.notifications();
    match action {
        NotificationsAction::List { recipient, output } => {
            let unread = service.list_unread(&recipient).await?;
            if unread.is_empty() {
                println!("No unread notifications for {}", recipient);
                return Ok(());
            }

            match output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&unread)?),
                OutputFormat::Table => {
                    let rows: Vec<NotificationDisplay> =
                        unread.iter().map(NotificationDisplay::from).collect();
                    print_rows(rows, output)?;
                }
            }
        }
        NotificationsAction::Read { id } => {
            if service.mark_as_read(id).await? {
                println!("{} Marked {} as read", style("✓").green().bold(), id);
            } else {
                let current = service.get(id).await?;
                println!("Notification {} is already {}", id, current.status);
            }
        }
    }
    Ok(())
}

pub(crate) async fn handle_access(
    runtime: &SyncRuntime,
    action: AccessAction,
) -> Result<(), Box<dyn std::error::Error>> {
    let service = runtime.notifications();
    match action {
        AccessAction::Request {
            requester,
            resource,
            approvers,
            reason,
        } => {
            let (request, notifications) = service
                .create_access_request(&requester, &resource, reason.as_deref(), &approvers)
                .await?;
            println!(
                "{} Access request {} sent to {} approver{}",
                style("✓").green().bold(),
                style(request.id).cyan(),
                notifications.len(),
                if notifications.len() == 1 { "" } else { "s" }
            );
        }
        AccessAction::Approve {
            request_id,
            notification_id,
            approver,
        } => {
            let request = service
                .approve_access_request(request_id, notification_id, &approver)
                .await?;
            print_resolution(&request);
        }
        AccessAction::Reject {
            request_id,
            notification_id,
            approver,
        } => {
            let request = service
                .reject_access_request(request_id, notification_id, &approver)
                .await?;
            print_resolution(&request);
        }
    }
    Ok(())
}

fn print_resolution(request: &AccessRequestModel) {
    println!(
        "{} Request {} for '{}' {} by {}",
        style("✓").green().bold(),
        request.id,
        request.resource,
        request.status,
        request.resolved_by.as_deref().unwrap_or("-")
    );
}
