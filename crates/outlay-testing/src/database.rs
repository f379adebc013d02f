//! Throwaway PostgreSQL databases for storage tests.
//!
//! Each `TestDatabase` is a freshly created, fully migrated database named
//! `outlay_test_<uuid>`, so tests never see each other's rows. Without
//! `DATABASE_URL` no database is created and callers skip.

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// Isolated, migrated database dropped by [`TestDatabase::cleanup`].
#[derive(Debug)]
pub struct TestDatabase {
    pool: PgPool,
    admin_pool: PgPool,
    database_name: String,
}

impl TestDatabase {
    /// Creates a database on the server named by `DATABASE_URL`.
    ///
    /// Returns `Ok(None)` when `DATABASE_URL` is unset.
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable, the database cannot be
    /// created or migrations fail.
    pub async fn connect() -> Result<Option<Self>> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            debug!("DATABASE_URL not set, skipping database test");
            return Ok(None);
        };
        let base = database_url.parse::<PgConnectOptions>().context("failed to parse DATABASE_URL")?;

        let admin_pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(base.clone().database("postgres"))
            .await
            .context("failed to connect to admin database")?;

        let database_name = format!("outlay_test_{}", Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE DATABASE \"{database_name}\""))
            .execute(&admin_pool)
            .await
            .with_context(|| format!("failed to create database {database_name}"))?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(base.database(&database_name))
            .await
            .with_context(|| format!("failed to connect to database {database_name}"))?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .with_context(|| format!("failed to migrate database {database_name}"))?;

        debug!(database = %database_name, "created test database");
        Ok(Some(Self { pool, admin_pool, database_name }))
    }

    /// Pool connected to the test database.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the pool and drops the database.
    pub async fn cleanup(self) {
        self.pool.close().await;

        let drop = format!("DROP DATABASE IF EXISTS \"{}\" WITH (FORCE)", self.database_name);
        if let Err(e) = sqlx::query(&drop).execute(&self.admin_pool).await {
            warn!(database = %self.database_name, error = %e, "failed to drop test database");
        }
        self.admin_pool.close().await;
    }
}
