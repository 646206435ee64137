//! CRUD operations for tracked repositories.
//!
//! This module provides functions for registering, reading, toggling and
//! deleting the repositories whose activity is synced.

mod errors;
mod query;
mod single;

pub use errors::{RepositoryError, Result};
pub use query::{PaginatedResult, Pagination, count, count_enabled, find_all, list_enabled};
pub use single::{
    NewRepository, advance_last_sync_at, delete, find_by_id, find_by_natural_key, get, insert,
    set_enabled,
};
