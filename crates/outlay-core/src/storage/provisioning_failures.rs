//! Repository for the provisioning retry queue.
//!
//! Each row is a user insert that failed after its webhook had already been
//! acknowledged. Rows move `pending` -> `resolved` | `abandoned` and are
//! never deleted, so the table doubles as an audit trail.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{
    error::Result,
    models::{FailureId, FailureStatus, NewUser, ProvisioningFailure},
};

const SELECT_COLUMNS: &str = "id, external_id, email, first_name, last_name, attempts, \
                              last_error, status, next_retry_at, created_at, updated_at";

/// Repository for provisioning failure records.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Records a failed first attempt.
    ///
    /// # Errors
    ///
    /// Returns error if insert fails.
    pub async fn record(
        &self,
        new_user: &NewUser,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<FailureId> {
        let id = FailureId::new();

        sqlx::query(
            r"
            INSERT INTO provisioning_failures (
                id, external_id, email, first_name, last_name, attempts,
                last_error, status, next_retry_at
            )
            VALUES ($1, $2, $3, $4, $5, 1, $6, $7, $8)
            ",
        )
        .bind(id)
        .bind(&new_user.external_id)
        .bind(&new_user.email)
        .bind(&new_user.first_name)
        .bind(&new_user.last_name)
        .bind(error)
        .bind(FailureStatus::Pending)
        .bind(next_retry_at)
        .execute(&*self.pool)
        .await?;

        Ok(id)
    }

    /// Claims pending entries due at `now`, oldest first.
    ///
    /// Claimed rows get `next_retry_at = lease_until`, so a concurrent worker
    /// skips them until the lease expires. A worker that crashes mid-batch
    /// therefore only delays those rows.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn claim_due(
        &self,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ProvisioningFailure>> {
        let query = format!(
            r"
            UPDATE provisioning_failures
            SET next_retry_at = $2, updated_at = NOW()
            WHERE id IN (
                SELECT id
                FROM provisioning_failures
                WHERE status = 'pending' AND next_retry_at <= $1
                ORDER BY next_retry_at ASC
                LIMIT $3
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {SELECT_COLUMNS}
            "
        );

        let mut failures = sqlx::query_as::<_, ProvisioningFailure>(&query)
            .bind(now)
            .bind(lease_until)
            .bind(limit)
            .fetch_all(&*self.pool)
            .await?;

        failures.sort_by_key(|failure| failure.created_at);
        Ok(failures)
    }

    /// Finds an entry by id.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_id(&self, id: FailureId) -> Result<Option<ProvisioningFailure>> {
        let query = format!("SELECT {SELECT_COLUMNS} FROM provisioning_failures WHERE id = $1");

        let failure = sqlx::query_as::<_, ProvisioningFailure>(&query)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;

        Ok(failure)
    }

    /// Marks an entry resolved.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_resolved(&self, id: FailureId) -> Result<()> {
        self.set_status(id, FailureStatus::Resolved).await
    }

    /// Marks an entry abandoned after recording the final error.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn mark_abandoned(&self, id: FailureId, attempts: i32, error: &str) -> Result<()> {
        sqlx::query(
            r"
            UPDATE provisioning_failures
            SET status = $2, attempts = $3, last_error = $4, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(FailureStatus::Abandoned)
        .bind(attempts)
        .bind(error)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Records another failed attempt and schedules the next one.
    ///
    /// # Errors
    ///
    /// Returns error if update fails.
    pub async fn schedule_retry(
        &self,
        id: FailureId,
        attempts: i32,
        error: &str,
        next_retry_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE provisioning_failures
            SET attempts = $2, last_error = $3, next_retry_at = $4, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(attempts)
        .bind(error)
        .bind(next_retry_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Counts entries in the given state.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count_by_status(&self, status: FailureStatus) -> Result<i64> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM provisioning_failures WHERE status = $1")
                .bind(status)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count.0)
    }

    async fn set_status(&self, id: FailureId, status: FailureStatus) -> Result<()> {
        sqlx::query(
            r"
            UPDATE provisioning_failures
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(id)
        .bind(status)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }
}
