use sea_orm::DbErr;
use thiserror::Error;
use uuid::Uuid;

/// Errors of tracked repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    #[error("Tracked repository not found: {context}")]
    NotFound { context: String },

    /// The (base_url, organization, project, name) key is already registered.
    #[error("Repository {organization}/{project}/{name} is already tracked")]
    Duplicate {
        organization: String,
        project: String,
        name: String,
    },

    #[error("Invalid repository: {message}")]
    InvalidInput { message: String },
}

impl RepositoryError {
    pub fn not_found_by_id(id: Uuid) -> Self {
        Self::NotFound {
            context: format!("id={}", id),
        }
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
