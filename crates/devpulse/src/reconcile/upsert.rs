//! Natural-key upserts.
//!
//! Each upsert looks the record up by its natural key, updates it in place
//! when found and inserts it otherwise. When a concurrent writer inserts the
//! same key first, the unique index rejects our insert and the write is
//! retried once as an update.

use chrono::{DateTime, FixedOffset, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, EntityTrait, IntoActiveModel, QueryFilter,
    QueryOrder, Select, Set,
};
use uuid::Uuid;

use crate::db::is_unique_violation;
use crate::entity::prelude::*;
use crate::platform::{RawComment, RawCommit, RawPullRequest, RawReview};

use super::metrics::DerivedMetrics;
use super::{ReconcileError, Reconciler, UpsertOutcome};

fn to_db(at: DateTime<Utc>) -> DateTime<FixedOffset> {
    at.fixed_offset()
}

fn to_utc(at: DateTime<FixedOffset>) -> DateTime<Utc> {
    at.with_timezone(&Utc)
}

impl Reconciler {
    /// Write the row `build` produces for the match of `lookup`.
    ///
    /// `build` receives the stored row, if any, and the write time, and
    /// returns the row's id with its full active model.
    async fn write_by_key<E, A, F>(
        &self,
        entity: &'static str,
        key: &str,
        lookup: Select<E>,
        build: F,
    ) -> Result<UpsertOutcome, ReconcileError>
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<A>,
        A: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
        F: Fn(Option<&E::Model>, DateTime<FixedOffset>) -> (Uuid, A),
    {
        let mut retried = false;
        loop {
            let existing = lookup.clone().one(self.db()).await?;
            let (id, model) = build(existing.as_ref(), Utc::now().fixed_offset());

            let written = if existing.is_some() {
                model.update(self.db()).await.map(|_| ())
            } else {
                model.insert(self.db()).await.map(|_| ())
            };

            match written {
                Ok(()) => {
                    return Ok(UpsertOutcome {
                        id,
                        created: existing.is_none(),
                    });
                }
                Err(e) if is_unique_violation(&e) && !retried => {
                    retried = true;
                    tracing::debug!(entity, key, "Written concurrently, retrying as update");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn upsert_pull_request(
        &self,
        repository_id: Uuid,
        raw: &RawPullRequest,
    ) -> Result<UpsertOutcome, ReconcileError> {
        let state: PullRequestState = raw.state.parse().map_err(|message| ReconcileError::Invalid {
            field: "state",
            message,
        })?;
        let author_id = self.resolve_actor(&raw.author).await;

        let lookup = PullRequest::find()
            .filter(PullRequestColumn::RepositoryId.eq(repository_id))
            .filter(PullRequestColumn::ExternalId.eq(raw.external_id.as_str()));

        self.write_by_key("pull request", &raw.external_id, lookup, |existing, now| {
            // Reviews arrive on later pages; keep what they established.
            let first_review_at = existing.and_then(|e| e.first_review_at);
            let metrics = DerivedMetrics::compute(
                raw.created_at,
                raw.closed_at,
                raw.merged_at,
                first_review_at.map(to_utc),
                raw.first_commit_at,
            );
            let id = existing.map_or_else(Uuid::new_v4, |e| e.id);

            let model = PullRequestActiveModel {
                id: Set(id),
                repository_id: Set(repository_id),
                external_id: Set(raw.external_id.clone()),
                author_id: Set(author_id),
                title: Set(raw.title.clone()),
                description: Set(raw.description.clone()),
                state: Set(state),
                source_branch: Set(raw.source_branch.clone()),
                target_branch: Set(raw.target_branch.clone()),
                is_draft: Set(raw.is_draft),
                created_at: Set(to_db(raw.created_at)),
                closed_at: Set(raw.closed_at.map(to_db)),
                merged_at: Set(raw.merged_at.map(to_db)),
                first_commit_at: Set(raw.first_commit_at.map(to_db)),
                first_review_at: Set(first_review_at),
                cycle_time_days: Set(metrics.cycle_time_days),
                review_time_days: Set(metrics.review_time_days),
                lead_time_days: Set(metrics.lead_time_days),
                first_seen_at: Set(existing.map_or(now, |e| e.first_seen_at)),
                synced_at: Set(now),
            };
            (id, model)
        })
        .await
    }

    pub async fn upsert_commit(
        &self,
        repository_id: Uuid,
        raw: &RawCommit,
    ) -> Result<UpsertOutcome, ReconcileError> {
        let author_id = self.resolve_actor(&raw.author).await;

        let lookup = Commit::find()
            .filter(CommitColumn::RepositoryId.eq(repository_id))
            .filter(CommitColumn::Sha.eq(raw.sha.as_str()));

        self.write_by_key("commit", &raw.sha, lookup, |existing, now| {
            let id = existing.map_or_else(Uuid::new_v4, |e| e.id);
            let model = CommitActiveModel {
                id: Set(id),
                repository_id: Set(repository_id),
                sha: Set(raw.sha.clone()),
                author_id: Set(author_id),
                message: Set(raw.message.clone()),
                authored_at: Set(to_db(raw.authored_at)),
                committed_at: Set(raw.committed_at.map(to_db)),
                additions: Set(raw.additions),
                edits: Set(raw.edits),
                deletions: Set(raw.deletions),
                first_seen_at: Set(existing.map_or(now, |e| e.first_seen_at)),
                synced_at: Set(now),
            };
            (id, model)
        })
        .await
    }

    pub async fn upsert_review(
        &self,
        pull_request_id: Uuid,
        raw: &RawReview,
    ) -> Result<UpsertOutcome, ReconcileError> {
        let reviewer_id = self.resolve_actor(&raw.reviewer).await;

        let lookup = Review::find()
            .filter(ReviewColumn::PullRequestId.eq(pull_request_id))
            .filter(ReviewColumn::ExternalId.eq(raw.external_id.as_str()));

        self.write_by_key("review", &raw.external_id, lookup, |existing, now| {
            let id = existing.map_or_else(Uuid::new_v4, |e| e.id);
            let model = ReviewActiveModel {
                id: Set(id),
                pull_request_id: Set(pull_request_id),
                external_id: Set(raw.external_id.clone()),
                reviewer_id: Set(reviewer_id),
                state: Set(ReviewState::from_vote(raw.vote)),
                vote: Set(raw.vote),
                is_required: Set(raw.is_required),
                submitted_at: Set(raw.submitted_at.map(to_db)),
                first_seen_at: Set(existing.map_or(now, |e| e.first_seen_at)),
                synced_at: Set(now),
            };
            (id, model)
        })
        .await
    }

    pub async fn upsert_comment(
        &self,
        pull_request_id: Uuid,
        raw: &RawComment,
    ) -> Result<UpsertOutcome, ReconcileError> {
        let author_id = self.resolve_actor(&raw.author).await;

        let lookup = Comment::find()
            .filter(CommentColumn::PullRequestId.eq(pull_request_id))
            .filter(CommentColumn::ExternalId.eq(raw.external_id.as_str()));

        self.write_by_key("comment", &raw.external_id, lookup, |existing, now| {
            let id = existing.map_or_else(Uuid::new_v4, |e| e.id);
            let model = CommentActiveModel {
                id: Set(id),
                pull_request_id: Set(pull_request_id),
                external_id: Set(raw.external_id.clone()),
                thread_id: Set(raw.thread_id.clone()),
                author_id: Set(author_id),
                content: Set(raw.content.clone()),
                published_at: Set(to_db(raw.published_at)),
                edited_at: Set(raw.edited_at.map(to_db)),
                first_seen_at: Set(existing.map_or(now, |e| e.first_seen_at)),
                synced_at: Set(now),
            };
            (id, model)
        })
        .await
    }

    /// Recompute `first_review_at` and the derived metrics of a pull request.
    ///
    /// The first review is the earliest vote submission; without one, the
    /// earliest comment by someone other than the author counts.
    pub async fn refresh_review_metrics(&self, pull_request_id: Uuid) -> Result<(), ReconcileError> {
        let pr = PullRequest::find_by_id(pull_request_id)
            .one(self.db())
            .await?
            .ok_or(ReconcileError::NotFound {
                entity: "pull request",
                id: pull_request_id,
            })?;

        let first_vote = Review::find()
            .filter(ReviewColumn::PullRequestId.eq(pull_request_id))
            .filter(ReviewColumn::Vote.ne(0))
            .filter(ReviewColumn::SubmittedAt.is_not_null())
            .order_by_asc(ReviewColumn::SubmittedAt)
            .one(self.db())
            .await?
            .and_then(|r| r.submitted_at);

        let first_review_at = match first_vote {
            Some(at) => Some(at),
            None => Comment::find()
                .filter(CommentColumn::PullRequestId.eq(pull_request_id))
                .filter(CommentColumn::AuthorId.ne(pr.author_id))
                .order_by_asc(CommentColumn::PublishedAt)
                .one(self.db())
                .await?
                .map(|c| c.published_at),
        };

        let metrics = DerivedMetrics::compute(
            to_utc(pr.created_at),
            pr.closed_at.map(to_utc),
            pr.merged_at.map(to_utc),
            first_review_at.map(to_utc),
            pr.first_commit_at.map(to_utc),
        );

        PullRequest::update_many()
            .col_expr(PullRequestColumn::FirstReviewAt, Expr::value(first_review_at))
            .col_expr(PullRequestColumn::CycleTimeDays, Expr::value(metrics.cycle_time_days))
            .col_expr(PullRequestColumn::ReviewTimeDays, Expr::value(metrics.review_time_days))
            .col_expr(PullRequestColumn::LeadTimeDays, Expr::value(metrics.lead_time_days))
            .filter(PullRequestColumn::Id.eq(pull_request_id))
            .exec(self.db())
            .await?;

        Ok(())
    }
}
