//! Identity-provider event payloads and signed webhook requests.

use axum::{body::Body, http::Request};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::TestEnv;

/// Builder for `user.created` event payloads.
#[derive(Debug, Clone)]
pub struct UserCreatedEvent {
    id: Option<String>,
    emails: Vec<String>,
    first_name: Option<String>,
    last_name: Option<String>,
}

impl UserCreatedEvent {
    /// Event for `external_id` with one address and no name.
    pub fn new(external_id: impl Into<String>) -> Self {
        let id = external_id.into();
        Self {
            emails: vec![format!("{id}@example.com")],
            id: Some(id),
            first_name: None,
            last_name: None,
        }
    }

    /// Replaces the address list with a single address.
    #[must_use]
    pub fn email(mut self, email: impl Into<String>) -> Self {
        self.emails = vec![email.into()];
        self
    }

    /// Appends an address.
    #[must_use]
    pub fn extra_email(mut self, email: impl Into<String>) -> Self {
        self.emails.push(email.into());
        self
    }

    /// Removes all addresses.
    #[must_use]
    pub fn no_email(mut self) -> Self {
        self.emails.clear();
        self
    }

    /// Omits the user id.
    #[must_use]
    pub fn no_id(mut self) -> Self {
        self.id = None;
        self
    }

    /// Sets given and family name.
    #[must_use]
    pub fn name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    /// Full event envelope.
    pub fn to_json(&self) -> Value {
        let email_addresses: Vec<Value> = self
            .emails
            .iter()
            .map(|email| json!({ "id": format!("idn_{}", Uuid::new_v4().simple()), "email_address": email }))
            .collect();

        let mut data = json!({
            "object": "user",
            "email_addresses": email_addresses,
            "first_name": self.first_name,
            "last_name": self.last_name,
            "created_at": 1_700_000_000_000_i64,
        });
        if let Some(id) = &self.id {
            data["id"] = json!(id);
        }

        event("user.created", data)
    }
}

/// Event envelope of any type.
pub fn event(event_type: &str, data: Value) -> Value {
    json!({ "object": "event", "type": event_type, "data": data })
}

/// Builder for signed `POST /api/webhooks` requests.
#[derive(Debug, Clone)]
pub struct SignedWebhook {
    body: Vec<u8>,
    msg_id: String,
    timestamp_offset: i64,
    signature: Option<String>,
    omit: Vec<&'static str>,
}

impl SignedWebhook {
    /// Request carrying `event` as its JSON body.
    pub fn new(event: &Value) -> Self {
        Self::raw(event.to_string().into_bytes())
    }

    /// Request carrying arbitrary body bytes.
    pub fn raw(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            msg_id: format!("msg_{}", Uuid::new_v4().simple()),
            timestamp_offset: 0,
            signature: None,
            omit: Vec::new(),
        }
    }

    /// Uses a fixed message id.
    #[must_use]
    pub fn msg_id(mut self, msg_id: impl Into<String>) -> Self {
        self.msg_id = msg_id.into();
        self
    }

    /// Stamps the request `seconds` away from the test clock.
    #[must_use]
    pub fn timestamp_offset(mut self, seconds: i64) -> Self {
        self.timestamp_offset = seconds;
        self
    }

    /// Sends this signature header instead of a valid one.
    #[must_use]
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Leaves out a header.
    #[must_use]
    pub fn without_header(mut self, name: &'static str) -> Self {
        self.omit.push(name);
        self
    }

    /// Builds the request, signing with the environment's secret.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be assembled.
    pub fn build(self, env: &TestEnv) -> Request<Body> {
        let timestamp = env.now_unix() + self.timestamp_offset;
        let signature =
            self.signature.unwrap_or_else(|| env.sign(&self.msg_id, timestamp, &self.body));

        let headers = [
            ("svix-id", self.msg_id),
            ("svix-timestamp", timestamp.to_string()),
            ("svix-signature", signature),
        ];

        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/webhooks")
            .header("content-type", "application/json");
        for (name, value) in headers {
            if !self.omit.contains(&name) {
                builder = builder.header(name, value);
            }
        }

        builder.body(Body::from(self.body)).expect("valid webhook request")
    }
}
