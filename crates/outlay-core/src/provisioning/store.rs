//! Storage abstraction for user provisioning.
//!
//! The webhook handler, the provisioner and the retry worker only see
//! `ProvisioningStore`. Production wraps the Postgres `Storage`; tests use
//! `MemoryProvisioningStore`, so the whole ingress path runs without a
//! database.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Utc};

use crate::{
    error::Result,
    models::{FailureId, NewUser, ProvisioningFailure, User, UserId},
    storage::Storage,
};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Storage operations required by provisioning.
pub trait ProvisioningStore: Send + Sync + 'static {
    /// Inserts a user row.
    ///
    /// Must fail with `CoreError::Duplicate` when a user with the
    /// same external id exists.
    fn create_user(&self, id: UserId, new_user: NewUser) -> StoreFuture<'_, User>;

    /// Adds a failed insert to the retry queue as `pending`.
    fn record_failure(
        &self,
        new_user: NewUser,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, FailureId>;

    /// Claims up to `limit` pending entries due at `now`, leasing them until
    /// `lease_until`.
    fn claim_due_failures(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ProvisioningFailure>>;

    /// Marks an entry resolved.
    fn resolve_failure(&self, id: FailureId) -> StoreFuture<'_, ()>;

    /// Records another failed attempt and the time of the next one.
    fn reschedule_failure(
        &self,
        id: FailureId,
        attempts: i32,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()>;

    /// Marks an entry abandoned.
    fn abandon_failure(&self, id: FailureId, attempts: i32, error: String) -> StoreFuture<'_, ()>;

    /// Verifies the backing store is reachable.
    fn health_check(&self) -> StoreFuture<'_, ()>;
}

/// Production store backed by PostgreSQL repositories.
pub struct PostgresProvisioningStore {
    storage: Arc<Storage>,
}

impl PostgresProvisioningStore {
    /// Creates a new PostgreSQL store adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl ProvisioningStore for PostgresProvisioningStore {
    fn create_user(&self, id: UserId, new_user: NewUser) -> StoreFuture<'_, User> {
        Box::pin(async move { self.storage.users.create(id, &new_user).await })
    }

    fn record_failure(
        &self,
        new_user: NewUser,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, FailureId> {
        Box::pin(async move {
            self.storage.provisioning_failures.record(&new_user, &error, next_retry_at).await
        })
    }

    fn claim_due_failures(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ProvisioningFailure>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Box::pin(async move {
            self.storage.provisioning_failures.claim_due(now, lease_until, limit).await
        })
    }

    fn resolve_failure(&self, id: FailureId) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.provisioning_failures.mark_resolved(id).await })
    }

    fn reschedule_failure(
        &self,
        id: FailureId,
        attempts: i32,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.storage
                .provisioning_failures
                .schedule_retry(id, attempts, &error, next_retry_at)
                .await
        })
    }

    fn abandon_failure(&self, id: FailureId, attempts: i32, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.storage.provisioning_failures.mark_abandoned(id, attempts, &error).await
        })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.health_check().await })
    }
}
