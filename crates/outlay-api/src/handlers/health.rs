//! Health endpoints, served outside the request gate.
//!
//! `/health` reports whether the store answers and how fast. `/ready` is the
//! same check reduced to a yes or an `E3001` error. `/live` never touches the
//! store.

use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use outlay_core::{OutlayError, ProvisioningStore};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, instrument, warn};

use super::error_response;
use crate::AppState;

/// Body of `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthReport {
    /// `healthy` or `unhealthy`
    pub status: &'static str,
    /// Clock time of the check
    pub checked_at: DateTime<Utc>,
    /// Store connectivity
    pub store: StoreCheck,
    /// Crate version
    pub version: &'static str,
}

/// Outcome of pinging the store.
#[derive(Debug, Serialize)]
pub struct StoreCheck {
    /// Whether the store answered
    pub reachable: bool,
    /// Round-trip time of the check
    pub latency_ms: u64,
    /// Store error, when unreachable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn check_store(store: &dyn ProvisioningStore) -> StoreCheck {
    let started = Instant::now();
    let result = store.health_check().await;
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(()) => StoreCheck { reachable: true, latency_ms, error: None },
        Err(e) => {
            warn!(error = %e, "store health check failed");
            StoreCheck { reachable: false, latency_ms, error: Some(e.to_string()) }
        },
    }
}

/// `GET /health`: 200 when the store answers, 503 otherwise.
#[instrument(name = "health_check", skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Response {
    let checked_at = state.clock.now_utc();
    let store = check_store(state.store.as_ref()).await;
    let (code, status) =
        if store.reachable { (StatusCode::OK, "healthy") } else { (StatusCode::SERVICE_UNAVAILABLE, "unhealthy") };

    debug!(status, latency_ms = store.latency_ms, "health check completed");

    let report = HealthReport { status, checked_at, store, version: env!("CARGO_PKG_VERSION") };
    (code, Json(report)).into_response()
}

/// `GET /ready`: 200 while the store answers, 503 with `E3001` otherwise.
#[instrument(name = "readiness_check", skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))).into_response(),
        Err(e) => {
            let error = OutlayError::from(e);
            warn!(error = %error, "not ready");
            error_response(StatusCode::SERVICE_UNAVAILABLE, &error)
        },
    }
}

/// `GET /live`: always 200.
#[instrument(name = "liveness_check", skip(state))]
pub async fn liveness_check(State(state): State<AppState>) -> Response {
    let body = json!({
        "status": "alive",
        "timestamp": state.clock.now_utc(),
        "service": "outlay",
    });

    (StatusCode::OK, Json(body)).into_response()
}
