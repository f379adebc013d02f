#![no_main]

//! Fuzz target for webhook signature verification.
//!
//! Splits the input into the three svix header values and a body, then
//! runs the verifier. It must never panic and must never accept a
//! signature it did not produce.

use std::{sync::Arc, time::Duration};

use libfuzzer_sys::fuzz_target;
use outlay_api::crypto::{SvixHeaders, WebhookVerifier};
use outlay_core::TestClock;

const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

fuzz_target!(|data: &[u8]| {
    let Ok(verifier) =
        WebhookVerifier::new(SECRET, Duration::from_secs(300), Arc::new(TestClock::at_unix(1_700_000_000)))
    else {
        return;
    };

    let mut parts = data.splitn(4, |&b| b == b'\n');
    let id = String::from_utf8_lossy(parts.next().unwrap_or_default());
    let timestamp = String::from_utf8_lossy(parts.next().unwrap_or_default());
    let signature = String::from_utf8_lossy(parts.next().unwrap_or_default());
    let body = parts.next().unwrap_or_default();

    let headers = SvixHeaders { id: &id, timestamp: &timestamp, signature: &signature };
    if verifier.verify(&headers, body).is_ok() {
        // Only a genuine signature over exactly these bytes may pass.
        let sent_at: i64 = timestamp.trim().parse().expect("accepted timestamp parses");
        let expected = verifier.sign(&id, sent_at, body);
        assert!(signature.split_whitespace().any(|entry| entry == expected));
    }

    // Secrets from fuzz input must be rejected or accepted without panicking.
    let _ = WebhookVerifier::new(&signature, Duration::from_secs(1), Arc::new(TestClock::new()));
});
