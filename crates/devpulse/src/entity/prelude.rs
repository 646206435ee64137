//! Common re-exports for convenient entity usage.

pub use super::access_request::{
    AccessRequestStatus, ActiveModel as AccessRequestActiveModel, Column as AccessRequestColumn,
    Entity as AccessRequest, Model as AccessRequestModel,
};
pub use super::comment::{
    ActiveModel as CommentActiveModel, Column as CommentColumn, Entity as Comment,
    Model as CommentModel,
};
pub use super::commit::{
    ActiveModel as CommitActiveModel, Column as CommitColumn, Entity as Commit,
    Model as CommitModel,
};
pub use super::developer::{
    ActiveModel as DeveloperActiveModel, Column as DeveloperColumn, Entity as Developer,
    Model as DeveloperModel, UNKNOWN_DEVELOPER_ID, UNKNOWN_DEVELOPER_NAME,
};
pub use super::job_status::{JobStatus, SyncType};
pub use super::notification::{
    ActiveModel as NotificationActiveModel, Column as NotificationColumn, Entity as Notification,
    Model as NotificationModel, NotificationKind, NotificationStatus,
};
pub use super::pull_request::{
    ActiveModel as PullRequestActiveModel, Column as PullRequestColumn, Entity as PullRequest,
    Model as PullRequestModel, PullRequestState,
};
pub use super::review::{
    ActiveModel as ReviewActiveModel, Column as ReviewColumn, Entity as Review,
    Model as ReviewModel, ReviewState,
};
pub use super::scheduler_state::{
    ActiveModel as SchedulerStateActiveModel, Column as SchedulerStateColumn,
    Entity as SchedulerState, Model as SchedulerStateModel,
};
pub use super::sync_job::{
    ActiveModel as SyncJobActiveModel, Column as SyncJobColumn, Entity as SyncJob,
    Model as SyncJobModel,
};
pub use super::sync_lease::{
    ActiveModel as SyncLeaseActiveModel, Column as SyncLeaseColumn, Entity as SyncLease,
    Model as SyncLeaseModel,
};
pub use super::tracked_repository::{
    ActiveModel as TrackedRepositoryActiveModel, Column as TrackedRepositoryColumn,
    Entity as TrackedRepository, Model as TrackedRepositoryModel,
};
