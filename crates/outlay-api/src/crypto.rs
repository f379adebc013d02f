//! Svix-style webhook signature verification.
//!
//! The identity provider signs `"{svix-id}.{svix-timestamp}.{body}"` with
//! HMAC-SHA256 and sends the base64 digest in `svix-signature` as a
//! space-separated list of `version,signature` pairs. Verification runs on
//! the raw request bytes, before any parsing.

use std::{sync::Arc, time::Duration};

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use outlay_core::Clock;
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Optional prefix on provider-issued signing secrets.
const SECRET_PREFIX: &str = "whsec_";

/// Only signature scheme currently issued.
const SIGNATURE_VERSION: &str = "v1";

/// Signature verification errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// Signing secret is empty.
    #[error("signing secret is empty")]
    EmptySecret,

    /// Signing secret is not valid base64.
    #[error("invalid signing secret: {0}")]
    InvalidSecret(String),

    /// `svix-timestamp` is not an integer number of seconds.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Timestamp is older than the tolerance window.
    #[error("message timestamp too old")]
    TimestampTooOld,

    /// Timestamp is further in the future than the tolerance window.
    #[error("message timestamp too new")]
    TimestampTooNew,

    /// `svix-signature` contains no `version,signature` entries.
    #[error("malformed signature header")]
    MalformedSignature,

    /// No `v1` entry matches the expected signature.
    #[error("no matching signature found")]
    NoMatchingSignature,
}

/// The three headers that accompany every signed webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvixHeaders<'a> {
    /// Unique message id, stable across redeliveries.
    pub id: &'a str,
    /// Send time in unix seconds.
    pub timestamp: &'a str,
    /// Space-separated `version,base64` entries.
    pub signature: &'a str,
}

/// Verifies webhook signatures against a shared signing secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    mac: HmacSha256,
    tolerance: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

impl WebhookVerifier {
    /// Creates a verifier from a `whsec_`-prefixed (or bare) base64 secret.
    ///
    /// # Errors
    ///
    /// Returns `SignatureError::EmptySecret` or
    /// `SignatureError::InvalidSecret` when the secret cannot be decoded.
    pub fn new(secret: &str, tolerance: Duration, clock: Arc<dyn Clock>) -> Result<Self, SignatureError> {
        let encoded = secret.strip_prefix(SECRET_PREFIX).unwrap_or(secret).trim();
        if encoded.is_empty() {
            return Err(SignatureError::EmptySecret);
        }

        let key = STANDARD.decode(encoded).map_err(|e| SignatureError::InvalidSecret(e.to_string()))?;
        let mac = HmacSha256::new_from_slice(&key)
            .map_err(|e| SignatureError::InvalidSecret(e.to_string()))?;

        Ok(Self { mac, tolerance, clock })
    }

    /// Verifies the headers and raw body of a delivery.
    ///
    /// The timestamp is checked first so stale replays are rejected
    /// without computing a digest.
    ///
    /// # Errors
    ///
    /// Returns the first reason the delivery cannot be trusted.
    pub fn verify(&self, headers: &SvixHeaders<'_>, payload: &[u8]) -> Result<(), SignatureError> {
        self.check_timestamp(headers.timestamp)?;

        let mut saw_entry = false;
        for entry in headers.signature.split_whitespace() {
            let Some((version, signature)) = entry.split_once(',') else {
                continue;
            };
            saw_entry = true;

            if version != SIGNATURE_VERSION {
                continue;
            }
            let Ok(candidate) = STANDARD.decode(signature) else {
                continue;
            };

            if self.signed(headers.id, headers.timestamp, payload).verify_slice(&candidate).is_ok() {
                return Ok(());
            }
        }

        if saw_entry {
            Err(SignatureError::NoMatchingSignature)
        } else {
            Err(SignatureError::MalformedSignature)
        }
    }

    /// Produces a `v1,<base64>` signature header value.
    pub fn sign(&self, msg_id: &str, timestamp: i64, payload: &[u8]) -> String {
        let digest = self.signed(msg_id, &timestamp.to_string(), payload).finalize().into_bytes();
        format!("{SIGNATURE_VERSION},{}", STANDARD.encode(digest))
    }

    /// Accepted clock skew in either direction.
    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    fn signed(&self, msg_id: &str, timestamp: &str, payload: &[u8]) -> HmacSha256 {
        let mut mac = self.mac.clone();
        mac.update(msg_id.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac
    }

    fn check_timestamp(&self, timestamp: &str) -> Result<(), SignatureError> {
        let sent_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| SignatureError::InvalidTimestamp(timestamp.to_string()))?;

        let now = self.clock.unix_seconds();
        let tolerance = i64::try_from(self.tolerance.as_secs()).unwrap_or(i64::MAX);

        if now.saturating_sub(sent_at) > tolerance {
            return Err(SignatureError::TimestampTooOld);
        }
        if sent_at.saturating_sub(now) > tolerance {
            return Err(SignatureError::TimestampTooNew);
        }

        Ok(())
    }
}
