//! HTTP request handlers for the Outlay service.
//!
//! - `webhooks`: signed identity-provider events
//! - `pages`: placeholder pages behind the request gate
//! - `health`: health, readiness and liveness endpoints
//!
//! Errors use the `{"error": {"code", "message"}}` shape with codes from
//! `OutlayError`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use outlay_core::OutlayError;
use serde::Serialize;

pub mod health;
pub mod pages;
pub mod webhooks;

pub use health::{health_check, liveness_check, readiness_check};
pub use webhooks::receive_webhook;

/// Error body with code and message.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error details
    pub error: ErrorDetail,
}

/// Detailed error information.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Stable error code (E1001-E1004, E3001)
    pub code: String,
    /// Human-readable description
    pub message: String,
}

impl From<&OutlayError> for ErrorResponse {
    fn from(error: &OutlayError) -> Self {
        Self { error: ErrorDetail { code: error.code().to_string(), message: error.to_string() } }
    }
}

pub(crate) fn error_response(status: StatusCode, error: &OutlayError) -> Response {
    (status, Json(ErrorResponse::from(error))).into_response()
}
