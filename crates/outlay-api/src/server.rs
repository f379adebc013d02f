//! HTTP server setup and request routing.
//!
//! Requests flow through, outermost first:
//! 1. Request ID injection (`X-Request-Id`)
//! 2. Request/response tracing
//! 3. Timeout enforcement
//! 4. Health endpoints (`/health`, `/ready`, `/live`), answered without the gate
//! 5. Request gate (session lookup, sign-in redirect, dashboard rewrite)
//! 6. Page and webhook handlers

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use outlay_core::{Clock, Provisioner, ProvisioningStore};
use tower::Layer;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    crypto::WebhookVerifier,
    handlers::{self, pages},
    middleware::{request_gate, RequestGate},
};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    /// User and retry-queue storage
    pub store: Arc<dyn ProvisioningStore>,
    /// Webhook signature verifier
    pub verifier: Arc<WebhookVerifier>,
    /// Turns `user.created` events into users
    pub provisioner: Arc<Provisioner>,
    /// Time source for verification and reports
    pub clock: Arc<dyn Clock>,
}

/// Creates the application router.
///
/// The gate wraps the page and webhook router as a service rather than as
/// a route layer, so a rewritten URI is what gets matched.
pub fn create_router(state: AppState, gate: Arc<RequestGate>, request_timeout: Duration) -> Router {
    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check));

    let app_routes = Router::new()
        .route("/", get(pages::home))
        .route("/signin", get(pages::sign_in))
        .route("/signup", get(pages::sign_up))
        .route("/dashboard", get(pages::dashboard))
        .route("/dashboard/{*section}", get(pages::dashboard_section))
        .route("/api/webhooks", post(handlers::receive_webhook))
        .with_state(state.clone());

    let gated = middleware::from_fn_with_state(gate, request_gate).layer(app_routes);

    Router::new()
        .merge(health_routes)
        .fallback_service(gated)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(inject_request_id))
        .with_state(state)
}

/// Middleware to inject request ID into all responses.
async fn inject_request_id(mut req: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(request_id.clone());

    let mut response = next.run(req).await;

    if let Ok(header_value) = request_id.parse() {
        response.headers_mut().insert("X-Request-Id", header_value);
    }

    response
}

/// Serves `app` on `addr` until `shutdown` resolves.
///
/// # Errors
///
/// Returns `std::io::Error` if the address cannot be bound or serving
/// fails.
pub async fn start_server<F>(app: Router, addr: SocketAddr, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("HTTP server listening on {}", actual_addr);

    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;

    info!("HTTP server stopped gracefully");
    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C, starting graceful shutdown");
        },
        () = terminate => {
            info!("Received SIGTERM, starting graceful shutdown");
        },
    }

    warn!("Waiting for in-flight requests to complete");
}
