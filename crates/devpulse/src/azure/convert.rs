//! Conversion of Azure DevOps payloads to platform records.

use crate::platform::{ActorRef, RawComment, RawCommit, RawIdentity, RawPullRequest, RawReview};

use super::types::{AzureCommit, AzureIdentity, AzurePullRequest, AzureReviewer, AzureThread};

fn strip_ref(name: &str) -> String {
    name.strip_prefix("refs/heads/").unwrap_or(name).to_string()
}

/// `uniqueName` doubles as the email when it looks like one.
fn identity(id: Option<&str>, display_name: Option<&str>, unique_name: Option<&str>) -> ActorRef {
    let unique_name = unique_name.filter(|u| !u.is_empty());
    ActorRef::External(RawIdentity {
        external_id: id.filter(|i| !i.is_empty()).map(str::to_string),
        display_name: display_name.map(str::to_string),
        email: unique_name.filter(|u| u.contains('@')).map(str::to_string),
        login: unique_name.map(str::to_string),
    })
}

fn identity_ref(identity_ref: &AzureIdentity) -> ActorRef {
    identity(
        identity_ref.id.as_deref(),
        identity_ref.display_name.as_deref(),
        identity_ref.unique_name.as_deref(),
    )
}

pub fn to_raw_pull_request(pr: AzurePullRequest) -> RawPullRequest {
    let status = pr.status.to_lowercase();
    let merged_at = if status == "completed" { pr.closed_date } else { None };
    let closed_at = if status == "active" { None } else { pr.closed_date };

    RawPullRequest {
        external_id: pr.pull_request_id.to_string(),
        author: identity_ref(&pr.created_by),
        title: pr.title,
        description: pr.description.filter(|d| !d.is_empty()),
        state: status,
        source_branch: strip_ref(&pr.source_ref_name),
        target_branch: strip_ref(&pr.target_ref_name),
        is_draft: pr.is_draft,
        created_at: pr.creation_date,
        closed_at,
        merged_at,
        first_commit_at: None,
    }
}

pub fn to_raw_commit(commit: AzureCommit) -> RawCommit {
    RawCommit {
        author: ActorRef::External(RawIdentity {
            external_id: None,
            display_name: commit.author.name.clone(),
            email: commit.author.email.clone().filter(|e| !e.is_empty()),
            login: None,
        }),
        sha: commit.commit_id,
        message: commit.comment,
        authored_at: commit.author.date,
        committed_at: commit.committer.map(|c| c.date),
        additions: commit.change_counts.add,
        edits: commit.change_counts.edit,
        deletions: commit.change_counts.delete,
    }
}

pub fn to_raw_review(reviewer: AzureReviewer) -> RawReview {
    RawReview {
        reviewer: identity(
            Some(&reviewer.id),
            reviewer.display_name.as_deref(),
            reviewer.unique_name.as_deref(),
        ),
        external_id: reviewer.id,
        vote: reviewer.vote,
        is_required: reviewer.is_required,
        // The reviewers endpoint carries no vote timestamp.
        submitted_at: None,
    }
}

/// Human comments of a thread. System and deleted comments are skipped.
pub fn thread_comments(thread: AzureThread) -> Vec<RawComment> {
    if thread.is_deleted {
        return Vec::new();
    }

    let thread_id = thread.id.to_string();
    thread
        .comments
        .into_iter()
        .filter(|c| !c.is_system() && !c.is_deleted)
        .map(|c| RawComment {
            external_id: format!("{}:{}", thread_id, c.id),
            thread_id: thread_id.clone(),
            author: identity_ref(&c.author),
            content: c.content.unwrap_or_default(),
            published_at: c.published_date,
            edited_at: c.last_updated_date.filter(|at| *at > c.published_date),
        })
        .collect()
}
