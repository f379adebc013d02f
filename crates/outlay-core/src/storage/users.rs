//! Repository for provisioned users.
//!
//! Rows are only ever inserted. The `external_id` column carries a UNIQUE
//! constraint, so a redelivered `user.created` webhook surfaces here as
//! `CoreError::Duplicate` instead of a second row.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::Result,
    models::{NewUser, User, UserId},
};

/// Repository for user database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Inserts a user under the given local id.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Duplicate` if a user with the same
    /// external id already exists, `CoreError::Database` otherwise.
    pub async fn create(&self, id: UserId, new_user: &NewUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(
            r"
            INSERT INTO users (id, email, external_id)
            VALUES ($1, $2, $3)
            RETURNING id, email, external_id, created_at
            ",
        )
        .bind(id)
        .bind(&new_user.email)
        .bind(&new_user.external_id)
        .fetch_one(&*self.pool)
        .await?;

        Ok(user)
    }

    /// Finds a user by identity-provider id.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r"
            SELECT id, email, external_id, created_at
            FROM users
            WHERE external_id = $1
            ",
        )
        .bind(external_id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(user)
    }

    /// Counts all users.
    ///
    /// # Errors
    ///
    /// Returns error if query fails.
    pub async fn count(&self) -> Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
            .fetch_one(&*self.pool)
            .await?;

        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_can_be_created() {
        let pool = sqlx::PgPool::connect_lazy("postgresql://test").unwrap();
        let _repo = Repository::new(Arc::new(pool));
    }
}
