//! User provisioning from identity-provider events.
//!
//! A verified `user.created` webhook becomes exactly one insert attempt.
//! The caller is always acknowledged; what happens to a failed insert is
//! decided here:
//!
//! - uniqueness conflict: the user already exists, nothing to do
//! - any other error: the user goes to the retry queue and the
//!   [`worker::RetryWorker`] keeps trying with backoff
//! - retry queue unreachable too: everything needed for manual repair is
//!   logged at error level

use std::sync::Arc;

use tracing::{error, info, instrument, warn};

pub mod memory;
pub mod retry;
pub mod store;
pub mod worker;

pub use memory::MemoryProvisioningStore;
pub use retry::{RetryDecision, RetryPolicy};
pub use store::{PostgresProvisioningStore, ProvisioningStore};
pub use worker::{RetryWorker, WorkerConfig};

use crate::{
    models::{FailureId, NewUser, User, UserId},
    time::Clock,
};

/// Result of a single provisioning attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    /// User row inserted.
    Created(User),
    /// A user with this external id already exists.
    AlreadyProvisioned,
    /// Insert failed; queued for retry.
    Deferred(FailureId),
    /// Insert failed and the retry queue could not record it.
    Lost,
}

/// Creates local users for identity-provider accounts.
pub struct Provisioner {
    store: Arc<dyn ProvisioningStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Provisioner {
    /// Creates a provisioner writing through `store`.
    pub fn new(store: Arc<dyn ProvisioningStore>, clock: Arc<dyn Clock>, policy: RetryPolicy) -> Self {
        Self { store, clock, policy }
    }

    /// Attempts to insert the user once, queueing it for retry on failure.
    ///
    /// Never returns an error: the webhook has already been accepted and the
    /// outcome only drives logging and tests.
    #[instrument(name = "provision_user", skip(self, new_user), fields(external_id = %new_user.external_id))]
    pub async fn provision(&self, new_user: NewUser) -> ProvisioningOutcome {
        let user_id = UserId::new();

        let error = match self.store.create_user(user_id, new_user.clone()).await {
            Ok(user) => {
                info!(
                    user_id = %user.id,
                    email = %user.email,
                    name = new_user.display_name().as_deref().unwrap_or(""),
                    "New user created"
                );
                return ProvisioningOutcome::Created(user);
            },
            Err(e) if e.is_conflict() => {
                warn!(error = %e, "User already provisioned, ignoring redelivered event");
                return ProvisioningOutcome::AlreadyProvisioned;
            },
            Err(e) => e,
        };

        let next_retry_at = match self.policy.decide(1, self.clock.now_utc()) {
            RetryDecision::Retry { next_attempt_at } => next_attempt_at,
            RetryDecision::GiveUp { .. } => self.clock.now_utc(),
        };

        match self.store.record_failure(new_user.clone(), error.to_string(), next_retry_at).await {
            Ok(failure_id) => {
                error!(
                    failure_id = %failure_id,
                    error = %error,
                    next_retry_at = %next_retry_at,
                    "User insert failed, queued for retry"
                );
                ProvisioningOutcome::Deferred(failure_id)
            },
            Err(queue_error) => {
                error!(
                    error = %error,
                    queue_error = %queue_error,
                    email = %new_user.email,
                    name = new_user.display_name().as_deref().unwrap_or(""),
                    "User insert failed and could not be queued; manual provisioning required"
                );
                ProvisioningOutcome::Lost
            },
        }
    }
}
