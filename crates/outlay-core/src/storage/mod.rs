//! Database access layer implementing the repository pattern.
//!
//! All SQL lives in these repositories. Callers hold a `Storage`, which
//! shares one connection pool between every repository; the pool is created
//! once at startup and passed in explicitly.

use std::sync::Arc;

use sqlx::PgPool;

pub mod provisioning_failures;
pub mod users;

use crate::error::Result;

/// Container for all repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for provisioned users.
    pub users: Arc<users::Repository>,

    /// Repository for the provisioning retry queue.
    pub provisioning_failures: Arc<provisioning_failures::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self {
            users: Arc::new(users::Repository::new(pool.clone())),
            provisioning_failures: Arc::new(provisioning_failures::Repository::new(pool)),
        }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Database` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.users.pool()).await?;

        Ok(())
    }
}
