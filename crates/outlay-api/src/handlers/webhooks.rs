//! Identity-provider webhook ingress.
//!
//! Verifies the Svix signature over the raw body, parses the event into
//! typed schemas and hands `user.created` to the provisioner. Once a
//! delivery is verified and well-formed it is acknowledged with 200 no
//! matter how provisioning went; failures are queued and retried.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use outlay_core::{NewUser, OutlayError, ProvisioningOutcome};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::error_response;
use crate::{crypto::SvixHeaders, AppState};

/// Header carrying the message id.
pub const SVIX_ID: &str = "svix-id";
/// Header carrying the send time in unix seconds.
pub const SVIX_TIMESTAMP: &str = "svix-timestamp";
/// Header carrying the signature list.
pub const SVIX_SIGNATURE: &str = "svix-signature";

/// Event type that provisions a local user.
pub const USER_CREATED: &str = "user.created";

/// Outer shape shared by all identity-provider events.
#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    /// Event type such as `user.created`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event-specific payload, validated per type.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `data` of a `user.created` event, reduced to the fields used.
#[derive(Debug, Deserialize)]
pub struct UserCreatedData {
    /// Identity-provider user id.
    pub id: String,
    /// Addresses in provider order; the first one is used.
    #[serde(default)]
    pub email_addresses: Vec<EmailAddress>,
    /// Given name.
    #[serde(default)]
    pub first_name: Option<String>,
    /// Family name.
    #[serde(default)]
    pub last_name: Option<String>,
}

/// One entry of `email_addresses`.
#[derive(Debug, Deserialize)]
pub struct EmailAddress {
    /// The address itself.
    pub email_address: String,
}

impl UserCreatedData {
    /// Validates the event data and converts it to a `NewUser`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing requirement.
    pub fn into_new_user(self) -> Result<NewUser, String> {
        if self.id.trim().is_empty() {
            return Err("user id is empty".to_string());
        }

        let email = self
            .email_addresses
            .into_iter()
            .next()
            .map(|address| address.email_address)
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| "no email address".to_string())?;

        Ok(NewUser {
            external_id: self.id,
            email,
            first_name: self.first_name,
            last_name: self.last_name,
        })
    }
}

/// Acknowledgement body.
#[derive(Debug, Serialize)]
pub struct WebhookAccepted {
    /// Type of the acknowledged event
    pub event_type: String,
    /// Always `accepted`
    pub status: &'static str,
}

/// Receives a signed identity-provider event.
///
/// # Errors
///
/// Responds 400 with:
/// - E1001 when a signature header is missing
/// - E1002 when the signature or timestamp does not verify
/// - E1003 when the body is not an event envelope
/// - E1004 when `user.created` data lacks an id or email
#[instrument(
    name = "receive_webhook",
    skip(state, headers, body),
    fields(
        svix_id = headers.get(SVIX_ID).and_then(|v| v.to_str().ok()).unwrap_or("none"),
        body_len = body.len(),
    )
)]
pub async fn receive_webhook(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let svix = match svix_headers(&headers) {
        Ok(svix) => svix,
        Err(e) => {
            warn!(error = %e, "Webhook rejected");
            return error_response(StatusCode::BAD_REQUEST, &e);
        },
    };

    if let Err(e) = state.verifier.verify(&svix, &body) {
        warn!(error = %e, "Webhook signature verification failed");
        return error_response(StatusCode::BAD_REQUEST, &OutlayError::InvalidSignature {
            reason: e.to_string(),
        });
    }

    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(error = %e, "Verified webhook is not an event envelope");
            return error_response(StatusCode::BAD_REQUEST, &OutlayError::MalformedPayload {
                reason: e.to_string(),
            });
        },
    };

    debug!(event_type = %envelope.event_type, "Webhook verified");

    if envelope.event_type == USER_CREATED {
        let new_user = match parse_user_created(envelope.data) {
            Ok(new_user) => new_user,
            Err(e) => {
                warn!(error = %e, "Invalid user.created data");
                return error_response(StatusCode::BAD_REQUEST, &e);
            },
        };

        match state.provisioner.provision(new_user).await {
            ProvisioningOutcome::Created(user) => {
                debug!(user_id = %user.id, "user.created handled");
            },
            outcome => {
                debug!(outcome = ?outcome, "user.created acknowledged without new user");
            },
        }
    } else {
        info!(event_type = %envelope.event_type, "Ignoring unhandled webhook event type");
    }

    (StatusCode::OK, Json(WebhookAccepted { event_type: envelope.event_type, status: "accepted" }))
        .into_response()
}

/// Collects the three signature headers, naming every missing one.
fn svix_headers(headers: &HeaderMap) -> Result<SvixHeaders<'_>, OutlayError> {
    let get = |name: &str| {
        headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty())
    };

    match (get(SVIX_ID), get(SVIX_TIMESTAMP), get(SVIX_SIGNATURE)) {
        (Some(id), Some(timestamp), Some(signature)) => Ok(SvixHeaders { id, timestamp, signature }),
        (id, timestamp, signature) => {
            let missing: Vec<&str> = [
                (SVIX_ID, id.is_none()),
                (SVIX_TIMESTAMP, timestamp.is_none()),
                (SVIX_SIGNATURE, signature.is_none()),
            ]
            .into_iter()
            .filter_map(|(name, absent)| absent.then_some(name))
            .collect();

            Err(OutlayError::MissingSignatureHeaders { missing: missing.join(", ") })
        },
    }
}

fn parse_user_created(data: serde_json::Value) -> Result<NewUser, OutlayError> {
    let invalid = |reason: String| OutlayError::InvalidEventData {
        event_type: USER_CREATED.to_string(),
        reason,
    };

    let data: UserCreatedData = serde_json::from_value(data).map_err(|e| invalid(e.to_string()))?;
    data.into_new_user().map_err(invalid)
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;

    #[test]
    fn missing_headers_are_all_named() {
        let mut headers = HeaderMap::new();
        headers.insert(SVIX_ID, HeaderValue::from_static("msg_1"));
        headers.insert(SVIX_SIGNATURE, HeaderValue::from_static("   "));

        let err = svix_headers(&headers).unwrap_err();

        assert_eq!(err.code(), "E1001");
        assert!(err.to_string().contains("svix-timestamp, svix-signature"));
    }

    #[test]
    fn user_created_uses_first_email() {
        let data = json!({
            "id": "user_1",
            "email_addresses": [
                { "email_address": "first@example.com", "id": "idn_1" },
                { "email_address": "second@example.com", "id": "idn_2" }
            ],
            "first_name": "A",
            "last_name": null,
            "image_url": "https://img.example.com/a.png"
        });

        let user = parse_user_created(data).unwrap();

        assert_eq!(user.external_id, "user_1");
        assert_eq!(user.email, "first@example.com");
        assert_eq!(user.first_name.as_deref(), Some("A"));
        assert_eq!(user.last_name, None);
    }

    #[test]
    fn user_created_without_email_fails_closed() {
        let err = parse_user_created(json!({ "id": "user_1", "email_addresses": [] })).unwrap_err();
        assert_eq!(err.code(), "E1004");

        let err = parse_user_created(json!({ "id": "user_1" })).unwrap_err();
        assert_eq!(err.code(), "E1004");
    }

    #[test]
    fn user_created_without_id_fails_closed() {
        let err = parse_user_created(json!({
            "email_addresses": [{ "email_address": "a@example.com" }]
        }))
        .unwrap_err();
        assert_eq!(err.code(), "E1004");

        let err = parse_user_created(serde_json::Value::Null).unwrap_err();
        assert_eq!(err.code(), "E1004");
    }
}
