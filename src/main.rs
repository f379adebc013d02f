//! Outlay server.
//!
//! Wires configuration, the database, the provisioning retry worker and the
//! HTTP server together, and coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use outlay_api::{middleware::RequestGate, AppState, Config};
use outlay_core::{
    storage::Storage, Clock, PostgresProvisioningStore, Provisioner, ProvisioningStore, RealClock,
    RetryWorker,
};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine outside development.
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    init_tracing(&config.rust_log);

    info!("Starting Outlay");
    info!(
        database_url = %config.database_url_masked(),
        host = %config.host,
        port = config.port,
        max_connections = config.database_max_connections,
        "Configuration loaded"
    );

    let addr = config.parse_server_addr()?;

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    sqlx::migrate!("./migrations").run(&db_pool).await.context("Failed to run database migrations")?;
    info!("Database migrations completed");

    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let storage = Arc::new(Storage::new(db_pool.clone()));
    let store: Arc<dyn ProvisioningStore> = Arc::new(PostgresProvisioningStore::new(storage));
    let policy = config.to_retry_policy();

    let verifier = Arc::new(config.to_webhook_verifier(clock.clone())?);
    let provisioner = Arc::new(Provisioner::new(store.clone(), clock.clone(), policy.clone()));

    let sessions = config.to_session_verifier()?;
    if !sessions.is_enabled() {
        warn!("No session key configured, every request is treated as signed out");
    }
    let gate = Arc::new(RequestGate::new(config.to_route_policy(), sessions));

    let cancellation_token = CancellationToken::new();
    let worker = RetryWorker::new(
        store.clone(),
        clock.clone(),
        policy,
        config.to_worker_config(),
        cancellation_token.clone(),
    );
    let worker_handle = tokio::spawn(async move { worker.run().await });

    let state = AppState { store, verifier, provisioner, clock };
    let app = outlay_api::create_router(state, gate, Duration::from_secs(config.request_timeout));

    info!(addr = %addr, "Outlay is ready to receive requests");

    let shutdown = {
        let token = cancellation_token.clone();
        async move {
            outlay_api::shutdown_signal().await;
            info!("Shutdown signal received, starting graceful shutdown");
            token.cancel();
        }
    };

    if let Err(e) = outlay_api::start_server(app, addr, shutdown).await {
        error!(error = %e, "Server failed");
        cancellation_token.cancel();
    }

    match tokio::time::timeout(Duration::from_secs(30), worker_handle).await {
        Ok(Ok(())) => info!("Retry worker stopped"),
        Ok(Err(e)) => error!(error = %e, "Retry worker panicked"),
        Err(_) => warn!("Retry worker did not stop within the grace period"),
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Outlay shutdown complete");
    Ok(())
}

/// Initializes tracing. `RUST_LOG` wins over the configured default.
fn init_tracing(default_filter: &str) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info,outlay=debug,tower_http=debug"));

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut retries = 0;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .idle_timeout(Duration::from_secs(config.database_idle_timeout))
            .max_lifetime(Duration::from_secs(config.database_max_lifetime))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                sqlx::query("SELECT 1")
                    .execute(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "Database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
