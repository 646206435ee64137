//! SeaORM entity definitions for the devpulse database schema.

pub mod access_request;
pub mod comment;
pub mod commit;
pub mod developer;
pub mod job_status;
pub mod notification;
pub mod prelude;
pub mod pull_request;
pub mod review;
pub mod scheduler_state;
pub mod sync_job;
pub mod sync_lease;
pub mod tracked_repository;
