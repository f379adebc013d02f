//! Background worker draining the provisioning retry queue.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    retry::{RetryDecision, RetryPolicy},
    store::ProvisioningStore,
};
use crate::{
    error::Result,
    models::{ProvisioningFailure, UserId},
    time::Clock,
};

/// Polling behaviour of the retry worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Sleep between polls when nothing was due.
    pub poll_interval: Duration,

    /// Maximum entries claimed per poll.
    pub batch_size: usize,

    /// How long a claimed entry stays invisible to other workers.
    pub lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 20,
            lease: Duration::from_secs(120),
        }
    }
}

/// Retries failed user inserts until they succeed or are abandoned.
pub struct RetryWorker {
    store: Arc<dyn ProvisioningStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    config: WorkerConfig,
    cancellation_token: CancellationToken,
}

impl RetryWorker {
    /// Creates a worker; call [`RetryWorker::run`] to start polling.
    pub fn new(
        store: Arc<dyn ProvisioningStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
        config: WorkerConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { store, clock, policy, config, cancellation_token }
    }

    /// Polls until the cancellation token fires.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            batch_size = self.config.batch_size,
            "provisioning retry worker starting"
        );

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let pause = match self.process_batch().await {
                Ok(0) => self.config.poll_interval,
                Ok(_) => continue,
                Err(e) => {
                    error!(error = %e, "provisioning retry batch failed");
                    self.config.poll_interval.max(Duration::from_secs(5))
                },
            };

            tokio::select! {
                () = self.clock.sleep(pause) => {}
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!("provisioning retry worker stopped");
    }

    /// Claims and retries one batch of due entries.
    ///
    /// Returns how many entries were processed.
    ///
    /// # Errors
    ///
    /// Returns error if claiming the batch fails. Failures while updating an
    /// individual entry are logged and do not abort the batch.
    pub async fn process_batch(&self) -> Result<usize> {
        let now = self.clock.now_utc();
        let lease = chrono::Duration::from_std(self.config.lease).unwrap_or(chrono::Duration::zero());
        let lease_until = now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC);

        let batch =
            self.store.claim_due_failures(now, lease_until, self.config.batch_size).await?;

        if batch.is_empty() {
            return Ok(0);
        }

        debug!(count = batch.len(), "retrying failed user inserts");

        let processed = batch.len();
        for failure in batch {
            self.retry(failure).await;
        }

        Ok(processed)
    }

    async fn retry(&self, failure: ProvisioningFailure) {
        let id = failure.id;

        let error = match self.store.create_user(UserId::new(), failure.new_user()).await {
            Ok(user) => {
                info!(failure_id = %id, user_id = %user.id, "queued user provisioned");
                self.finish(self.store.resolve_failure(id).await, &failure);
                return;
            },
            Err(e) if e.is_conflict() => {
                info!(failure_id = %id, "queued user already exists, resolving");
                self.finish(self.store.resolve_failure(id).await, &failure);
                return;
            },
            Err(e) => e,
        };

        let attempts = failure.attempts.saturating_add(1);
        let attempts_made = u32::try_from(attempts).unwrap_or(u32::MAX);

        match self.policy.decide(attempts_made, self.clock.now_utc()) {
            RetryDecision::Retry { next_attempt_at } => {
                warn!(
                    failure_id = %id,
                    attempts,
                    error = %error,
                    next_retry_at = %next_attempt_at,
                    "queued user insert failed again"
                );
                let result = self
                    .store
                    .reschedule_failure(id, attempts, error.to_string(), next_attempt_at)
                    .await;
                self.finish(result, &failure);
            },
            RetryDecision::GiveUp { reason } => {
                error!(
                    failure_id = %id,
                    external_id = %failure.external_id,
                    email = %failure.email,
                    attempts,
                    error = %error,
                    reason = %reason,
                    "abandoning user provisioning; manual provisioning required"
                );
                let result = self.store.abandon_failure(id, attempts, error.to_string()).await;
                self.finish(result, &failure);
            },
        }
    }

    fn finish(&self, result: Result<()>, failure: &ProvisioningFailure) {
        if let Err(e) = result {
            error!(
                failure_id = %failure.id,
                external_id = %failure.external_id,
                error = %e,
                "could not update provisioning retry entry"
            );
        }
    }
}
