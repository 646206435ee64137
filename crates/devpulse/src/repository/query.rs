use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
};

use crate::entity::tracked_repository::{Column, Entity as TrackedRepository, Model};

use super::errors::Result;

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    /// Page number (0-indexed).
    pub page: u64,
    /// Items per page.
    pub per_page: u64,
}

impl Pagination {
    /// Create a new pagination with the given page and per_page values.
    pub fn new(page: u64, per_page: u64) -> Self {
        Self {
            page,
            per_page: per_page.max(MIN_PER_PAGE),
        }
    }
}

const MIN_PER_PAGE: u64 = 1;

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 0,
            per_page: MIN_PER_PAGE,
        }
    }
}

/// Result of a paginated query.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    /// The items for the current page.
    pub items: Vec<T>,
    /// Total number of items across all pages.
    pub total: u64,
    /// Current page number (0-indexed).
    pub page: u64,
    /// Items per page.
    pub per_page: u64,
    /// Total number of pages.
    pub total_pages: u64,
}

// ─── Query Operations ────────────────────────────────────────────────────────

/// Find all repositories with pagination, ordered by path.
pub async fn find_all(
    db: &DatabaseConnection,
    pagination: Pagination,
) -> Result<PaginatedResult<Model>> {
    let paginator = TrackedRepository::find()
        .order_by_asc(Column::Organization)
        .order_by_asc(Column::Project)
        .order_by_asc(Column::Name)
        .paginate(db, pagination.per_page);

    let total = paginator.num_items().await?;
    let total_pages = paginator.num_pages().await?;
    let items = paginator.fetch_page(pagination.page).await?;

    Ok(PaginatedResult {
        items,
        total,
        page: pagination.page,
        per_page: pagination.per_page,
        total_pages,
    })
}

/// Repositories included in scheduled batches.
///
/// Never-synced repositories come first, then the least recently synced.
pub async fn list_enabled(db: &DatabaseConnection) -> Result<Vec<Model>> {
    let mut repos = TrackedRepository::find()
        .filter(Column::Enabled.eq(true))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?;
    repos.sort_by_key(|r| r.last_sync_at);
    Ok(repos)
}

/// Count all repositories.
pub async fn count(db: &DatabaseConnection) -> Result<u64> {
    Ok(TrackedRepository::find().count(db).await?)
}

/// Count repositories included in scheduled batches.
pub async fn count_enabled(db: &DatabaseConnection) -> Result<u64> {
    Ok(TrackedRepository::find()
        .filter(Column::Enabled.eq(true))
        .count(db)
        .await?)
}
