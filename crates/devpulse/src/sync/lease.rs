//! Exclusive, expiring claims on a repository's sync slot.
//!
//! A lease guarantees at most one running sync per repository across every
//! process sharing the database. Leases expire on their own, so a crashed
//! holder cannot block a repository forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, Set};
use thiserror::Error;

use crate::entity::sync_lease::{ActiveModel, Column, Entity as SyncLease};

/// Default lease lifetime. Renewed between pages while a job runs.
pub const DEFAULT_LEASE_TTL_MINUTES: i64 = 60;

#[derive(Debug, Error)]
pub enum LeaseError {
    #[error("Database error: {0}")]
    Database(#[from] DbErr),

    /// The lease expired and was taken over, or was never held by `holder`.
    #[error("Lease {key} is not held by {holder}")]
    NotHeld { key: String, holder: String },
}

/// An acquired lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub key: String,
    pub holder: String,
    pub acquired_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Lease {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Check that `holder` owns this lease.
    pub fn verify_owner(&self, holder: &str) -> Result<(), LeaseError> {
        if self.holder == holder {
            Ok(())
        } else {
            Err(LeaseError::NotHeld {
                key: self.key.clone(),
                holder: holder.to_string(),
            })
        }
    }
}

/// Storage for leases. Every operation takes `now` explicitly.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Try to take `key` for `holder`.
    ///
    /// Succeeds when no lease exists or the existing one has expired.
    /// Returns `None` when another holder has a live lease.
    async fn acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, LeaseError>;

    /// Push the expiry of a held lease to `now + ttl`.
    ///
    /// # Errors
    /// [`LeaseError::NotHeld`] when the lease was lost.
    async fn renew(&self, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease, LeaseError>;

    /// Release a lease. Returns `false` if it was no longer held by this holder.
    async fn release(&self, lease: &Lease) -> Result<bool, LeaseError>;

    /// The live lease on `key`, if any.
    async fn current(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Lease>, LeaseError>;
}

/// Lease store backed by the `sync_leases` table.
///
/// Acquisition is one `INSERT .. ON CONFLICT DO UPDATE .. WHERE expires_at <= now`,
/// so two processes racing for the same key cannot both win.
pub struct DbLeaseStore {
    db: Arc<DatabaseConnection>,
}

impl DbLeaseStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl LeaseStore for DbLeaseStore {
    async fn acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, LeaseError> {
        let lease = Lease {
            key: key.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };

        let model = ActiveModel {
            key: Set(lease.key.clone()),
            holder: Set(lease.holder.clone()),
            acquired_at: Set(lease.acquired_at.fixed_offset()),
            expires_at: Set(lease.expires_at.fixed_offset()),
        };

        let rows = SyncLease::insert(model)
            .on_conflict(
                OnConflict::column(Column::Key)
                    .update_columns([Column::Holder, Column::AcquiredAt, Column::ExpiresAt])
                    .action_and_where(Column::ExpiresAt.lte(now.fixed_offset()))
                    .to_owned(),
            )
            .exec_without_returning(self.db.as_ref())
            .await?;

        Ok((rows > 0).then_some(lease))
    }

    async fn renew(&self, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease, LeaseError> {
        let expires_at = now + ttl;
        let result = SyncLease::update_many()
            .col_expr(
                Column::ExpiresAt,
                sea_orm::sea_query::Expr::value(expires_at.fixed_offset()),
            )
            .filter(Column::Key.eq(lease.key.as_str()))
            .filter(Column::Holder.eq(lease.holder.as_str()))
            .exec(self.db.as_ref())
            .await?;

        if result.rows_affected == 0 {
            return Err(LeaseError::NotHeld {
                key: lease.key.clone(),
                holder: lease.holder.clone(),
            });
        }

        Ok(Lease {
            expires_at,
            ..lease.clone()
        })
    }

    async fn release(&self, lease: &Lease) -> Result<bool, LeaseError> {
        let result = SyncLease::delete_many()
            .filter(Column::Key.eq(lease.key.as_str()))
            .filter(Column::Holder.eq(lease.holder.as_str()))
            .exec(self.db.as_ref())
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn current(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Lease>, LeaseError> {
        let row = SyncLease::find_by_id(key.to_string())
            .filter(Column::ExpiresAt.gt(now.fixed_offset()))
            .one(self.db.as_ref())
            .await?;

        Ok(row.map(|m| Lease {
            key: m.key,
            holder: m.holder,
            acquired_at: m.acquired_at.with_timezone(&Utc),
            expires_at: m.expires_at.with_timezone(&Utc),
        }))
    }
}

/// Process-local lease store, for tests and single-process setups.
#[derive(Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<HashMap<String, Lease>>,
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn acquire(
        &self,
        key: &str,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, LeaseError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = leases.get(key)
            && !existing.is_expired(now)
        {
            return Ok(None);
        }

        let lease = Lease {
            key: key.to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + ttl,
        };
        leases.insert(key.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn renew(&self, lease: &Lease, ttl: Duration, now: DateTime<Utc>) -> Result<Lease, LeaseError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let Some(held) = leases.get_mut(&lease.key) else {
            return Err(LeaseError::NotHeld {
                key: lease.key.clone(),
                holder: lease.holder.clone(),
            });
        };
        held.verify_owner(&lease.holder)?;
        held.expires_at = now + ttl;
        Ok(held.clone())
    }

    async fn release(&self, lease: &Lease) -> Result<bool, LeaseError> {
        let mut leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        let owned = leases
            .get(&lease.key)
            .is_some_and(|held| held.verify_owner(&lease.holder).is_ok());
        if owned {
            leases.remove(&lease.key);
        }
        Ok(owned)
    }

    async fn current(&self, key: &str, now: DateTime<Utc>) -> Result<Option<Lease>, LeaseError> {
        let leases = self.leases.lock().unwrap_or_else(|e| e.into_inner());
        Ok(leases.get(key).filter(|l| !l.is_expired(now)).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercise_store(store: &dyn LeaseStore) {
        let now = Utc::now();
        let ttl = Duration::minutes(5);

        let first = store
            .acquire("repo-1", "worker-a", ttl, now)
            .await
            .unwrap()
            .expect("free key is acquired");
        assert_eq!(first.expires_at, now + ttl);

        assert!(
            store
                .acquire("repo-1", "worker-b", ttl, now + Duration::minutes(1))
                .await
                .unwrap()
                .is_none(),
            "live lease blocks another holder"
        );

        // A different key is independent.
        assert!(
            store
                .acquire("repo-2", "worker-b", ttl, now)
                .await
                .unwrap()
                .is_some()
        );

        let renewed = store
            .renew(&first, ttl, now + Duration::minutes(4))
            .await
            .unwrap();
        assert_eq!(renewed.expires_at, now + Duration::minutes(9));
        assert!(
            store
                .acquire("repo-1", "worker-b", ttl, now + Duration::minutes(6))
                .await
                .unwrap()
                .is_none(),
            "renewal keeps the lease alive"
        );

        let taken = store
            .acquire("repo-1", "worker-b", ttl, now + Duration::minutes(10))
            .await
            .unwrap()
            .expect("expired lease can be taken over");
        assert_eq!(taken.holder, "worker-b");

        assert!(matches!(
            store.renew(&first, ttl, now + Duration::minutes(10)).await,
            Err(LeaseError::NotHeld { .. })
        ));
        assert!(!store.release(&first).await.unwrap(), "old holder cannot release");

        let current = store
            .current("repo-1", now + Duration::minutes(11))
            .await
            .unwrap()
            .expect("live lease is visible");
        assert_eq!(current.holder, "worker-b");

        assert!(store.release(&taken).await.unwrap());
        assert!(
            store
                .current("repo-1", now + Duration::minutes(11))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn in_memory_store_semantics() {
        exercise_store(&InMemoryLeaseStore::new()).await;
    }

    #[cfg(all(feature = "sqlite", feature = "migrate"))]
    #[tokio::test]
    async fn database_store_semantics() {
        let db = crate::db::connect_and_migrate("sqlite::memory:")
            .await
            .expect("test db should migrate");
        exercise_store(&DbLeaseStore::new(Arc::new(db))).await;
    }

    #[test]
    fn verify_owner_rejects_other_holders() {
        let now = Utc::now();
        let lease = Lease {
            key: "k".into(),
            holder: "a".into(),
            acquired_at: now,
            expires_at: now + Duration::minutes(1),
        };
        assert!(lease.verify_owner("a").is_ok());
        assert!(lease.verify_owner("b").is_err());
        assert!(!lease.is_expired(now));
        assert!(lease.is_expired(now + Duration::minutes(1)));
    }
}
