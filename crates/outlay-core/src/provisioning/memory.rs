//! In-memory `ProvisioningStore` for tests and local experiments.
//!
//! Enforces the same uniqueness rule as the `users` table and can be told
//! to fail inserts, which is how the retry path gets exercised without a
//! database.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
    Mutex, MutexGuard, PoisonError,
};

use chrono::{DateTime, Utc};

use super::store::{ProvisioningStore, StoreFuture};
use crate::{
    error::CoreError,
    models::{FailureId, FailureStatus, NewUser, ProvisioningFailure, User, UserId},
};

#[derive(Debug, Default)]
struct State {
    users: Vec<User>,
    failures: Vec<ProvisioningFailure>,
}

/// Store that keeps users and retry-queue entries in process memory.
#[derive(Debug, Default)]
pub struct MemoryProvisioningStore {
    state: Mutex<State>,
    create_user_calls: AtomicUsize,
    failing_inserts: AtomicU32,
    failure_queue_down: AtomicBool,
    unreachable: AtomicBool,
}

impl MemoryProvisioningStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` user inserts fail with a database error.
    pub fn fail_next_inserts(&self, count: u32) {
        self.failing_inserts.store(count, Ordering::SeqCst);
    }

    /// Makes recording retry-queue entries fail until reset.
    pub fn set_failure_queue_down(&self, down: bool) {
        self.failure_queue_down.store(down, Ordering::SeqCst);
    }

    /// Makes health checks fail until reset.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Number of `create_user` calls, successful or not.
    pub fn create_user_calls(&self) -> usize {
        self.create_user_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of stored users in insertion order.
    pub fn users(&self) -> Vec<User> {
        self.lock().users.clone()
    }

    /// Snapshot of retry-queue entries in insertion order.
    pub fn failures(&self) -> Vec<ProvisioningFailure> {
        self.lock().failures.clone()
    }

    /// Finds a stored user by identity-provider id.
    pub fn find_by_external_id(&self, external_id: &str) -> Option<User> {
        self.lock().users.iter().find(|user| user.external_id == external_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_injected_failure(&self) -> bool {
        self.failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn update_failure(
        &self,
        id: FailureId,
        apply: impl FnOnce(&mut ProvisioningFailure),
    ) -> Result<(), CoreError> {
        let mut state = self.lock();
        let failure = state
            .failures
            .iter_mut()
            .find(|failure| failure.id == id)
            .ok_or_else(|| CoreError::NotFound(format!("provisioning failure {id}")))?;

        apply(failure);
        failure.updated_at = Utc::now();
        Ok(())
    }
}

impl ProvisioningStore for MemoryProvisioningStore {
    fn create_user(&self, id: UserId, new_user: NewUser) -> StoreFuture<'_, User> {
        Box::pin(async move {
            self.create_user_calls.fetch_add(1, Ordering::SeqCst);

            if self.take_injected_failure() {
                return Err(CoreError::Database("connection refused".to_string()));
            }

            let mut state = self.lock();
            if state.users.iter().any(|user| user.external_id == new_user.external_id) {
                return Err(CoreError::Duplicate(format!(
                    "unique constraint violation: users_external_id_key ({})",
                    new_user.external_id
                )));
            }

            let user = User {
                id,
                email: new_user.email,
                external_id: new_user.external_id,
                created_at: Utc::now(),
            };
            state.users.push(user.clone());
            Ok(user)
        })
    }

    fn record_failure(
        &self,
        new_user: NewUser,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, FailureId> {
        Box::pin(async move {
            if self.failure_queue_down.load(Ordering::SeqCst) {
                return Err(CoreError::Database("connection refused".to_string()));
            }

            let now = Utc::now();
            let id = FailureId::new();
            self.lock().failures.push(ProvisioningFailure {
                id,
                external_id: new_user.external_id,
                email: new_user.email,
                first_name: new_user.first_name,
                last_name: new_user.last_name,
                attempts: 1,
                last_error: error,
                status: FailureStatus::Pending,
                next_retry_at,
                created_at: now,
                updated_at: now,
            });
            Ok(id)
        })
    }

    fn claim_due_failures(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<ProvisioningFailure>> {
        Box::pin(async move {
            let mut state = self.lock();
            let mut due: Vec<&mut ProvisioningFailure> = state
                .failures
                .iter_mut()
                .filter(|failure| {
                    failure.status == FailureStatus::Pending && failure.next_retry_at <= now
                })
                .collect();
            due.sort_by_key(|failure| failure.next_retry_at);

            Ok(due
                .into_iter()
                .take(limit)
                .map(|failure| {
                    failure.next_retry_at = lease_until;
                    failure.clone()
                })
                .collect())
        })
    }

    fn resolve_failure(&self, id: FailureId) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.update_failure(id, |failure| failure.status = FailureStatus::Resolved)
        })
    }

    fn reschedule_failure(
        &self,
        id: FailureId,
        attempts: i32,
        error: String,
        next_retry_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.update_failure(id, |failure| {
                failure.attempts = attempts;
                failure.last_error = error;
                failure.next_retry_at = next_retry_at;
            })
        })
    }

    fn abandon_failure(&self, id: FailureId, attempts: i32, error: String) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.update_failure(id, |failure| {
                failure.status = FailureStatus::Abandoned;
                failure.attempts = attempts;
                failure.last_error = error;
            })
        })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if self.unreachable.load(Ordering::SeqCst) {
                return Err(CoreError::Database("connection refused".to_string()));
            }
            Ok(())
        })
    }
}
