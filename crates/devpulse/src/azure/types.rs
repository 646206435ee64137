//! Azure DevOps REST payloads.
//!
//! Only the fields the sync needs are declared, so unrelated API changes do
//! not break decoding.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `{ "count": n, "value": [...] }` envelope of list endpoints.
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
}

/// `IdentityRef`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureIdentity {
    pub id: Option<String>,
    pub display_name: Option<String>,
    /// Usually the sign-in address.
    pub unique_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzurePullRequest {
    pub pull_request_id: i64,
    #[serde(default)]
    pub title: String,
    pub description: Option<String>,
    /// `active`, `completed` or `abandoned`.
    pub status: String,
    #[serde(default)]
    pub created_by: AzureIdentity,
    pub creation_date: DateTime<Utc>,
    pub closed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_ref_name: String,
    #[serde(default)]
    pub target_ref_name: String,
    #[serde(default)]
    pub is_draft: bool,
}

/// `GitUserDate`: git author or committer.
#[derive(Debug, Clone, Deserialize)]
pub struct AzureGitUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AzureChangeCounts {
    #[serde(default)]
    pub add: i32,
    #[serde(default)]
    pub edit: i32,
    #[serde(default)]
    pub delete: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureCommit {
    pub commit_id: String,
    pub author: AzureGitUser,
    pub committer: Option<AzureGitUser>,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub change_counts: AzureChangeCounts,
}

/// `IdentityRefWithVote`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureReviewer {
    pub id: String,
    pub display_name: Option<String>,
    pub unique_name: Option<String>,
    #[serde(default)]
    pub vote: i32,
    #[serde(default)]
    pub is_required: bool,
    /// Set when the reviewer is a group rather than a person.
    #[serde(default)]
    pub is_container: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureThread {
    pub id: i64,
    #[serde(default)]
    pub comments: Vec<AzureComment>,
    #[serde(default)]
    pub is_deleted: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AzureComment {
    pub id: i64,
    #[serde(default)]
    pub author: AzureIdentity,
    pub content: Option<String>,
    pub published_date: DateTime<Utc>,
    pub last_updated_date: Option<DateTime<Utc>>,
    /// `text`, `codeChange` or `system`.
    pub comment_type: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

impl AzureComment {
    /// System comments are generated by Azure DevOps (votes, pushes, status).
    pub fn is_system(&self) -> bool {
        self.comment_type.as_deref() == Some("system")
    }
}
