//! Error types and result handling for webhook and provisioning operations.
//!
//! `CoreError` covers storage failures and is what repositories return.
//! `OutlayError` is the request-level taxonomy with stable codes that the
//! HTTP layer serializes for clients.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Entity not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A row with the same unique key already exists.
    #[error("Duplicate: {0}")]
    Duplicate(String),

    /// Foreign-key or check constraint violation.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),
}

impl CoreError {
    /// Returns whether the write collided with an existing unique key.
    ///
    /// Only uniqueness conflicts count; other constraint violations are
    /// ordinary failures.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Duplicate(format!("unique constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_foreign_key_violation() => {
                Self::ConstraintViolation(format!("foreign key constraint violation: {db_err}"))
            },
            sqlx::Error::Database(db_err) if db_err.is_check_violation() => {
                Self::ConstraintViolation(format!("check constraint violation: {db_err}"))
            },
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Outlay request errors with client-facing codes.
#[derive(Debug, Error)]
pub enum OutlayError {
    // Ingress errors (E1001-E1004)
    /// One or more of the svix signature headers is absent (E1001).
    #[error("[E1001] Missing signature headers: {missing}")]
    MissingSignatureHeaders {
        /// Comma-separated names of the absent headers
        missing: String,
    },

    /// Signature verification failed (E1002).
    #[error("[E1002] Invalid signature: {reason}")]
    InvalidSignature {
        /// Why verification failed
        reason: String,
    },

    /// Verified body is not a webhook envelope (E1003).
    #[error("[E1003] Malformed payload: {reason}")]
    MalformedPayload {
        /// Parser error description
        reason: String,
    },

    /// Event data is missing fields required by its type (E1004).
    #[error("[E1004] Invalid event data for {event_type}: {reason}")]
    InvalidEventData {
        /// Declared event type
        event_type: String,
        /// Which requirement was not met
        reason: String,
    },

    // System errors (E3001)
    /// Store did not answer its health check (E3001).
    #[error("[E3001] Database unavailable: {reason}")]
    DatabaseUnavailable {
        /// Underlying storage error
        reason: String,
    },
}

impl OutlayError {
    /// Returns the error code (E1001-E1004, E3001).
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingSignatureHeaders { .. } => "E1001",
            Self::InvalidSignature { .. } => "E1002",
            Self::MalformedPayload { .. } => "E1003",
            Self::InvalidEventData { .. } => "E1004",
            Self::DatabaseUnavailable { .. } => "E3001",
        }
    }
}

impl From<CoreError> for OutlayError {
    fn from(err: CoreError) -> Self {
        Self::DatabaseUnavailable { reason: err.to_string() }
    }
}
