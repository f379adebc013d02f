#![no_main]

//! Fuzz target for event envelope and `user.created` parsing.
//!
//! Verified bodies come from the identity provider, but the parser still
//! has to reject anything malformed without panicking.

use libfuzzer_sys::fuzz_target;
use outlay_api::handlers::webhooks::{UserCreatedData, WebhookEnvelope, USER_CREATED};

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = serde_json::from_slice::<WebhookEnvelope>(data) else {
        return;
    };

    if envelope.event_type != USER_CREATED {
        return;
    }

    if let Ok(user) = serde_json::from_value::<UserCreatedData>(envelope.data) {
        if let Ok(new_user) = user.into_new_user() {
            assert!(!new_user.external_id.trim().is_empty());
            assert!(!new_user.email.trim().is_empty());
        }
    }
});
