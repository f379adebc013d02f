//! Property tests for webhook signature verification.

use std::{sync::Arc, time::Duration};

use outlay_api::crypto::{SignatureError, SvixHeaders, WebhookVerifier};
use outlay_core::TestClock;
use proptest::{prelude::*, test_runner::Config as ProptestConfig};

const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";
const NOW: i64 = 1_700_000_000;

fn verifier() -> WebhookVerifier {
    let now = u64::try_from(NOW).unwrap();
    WebhookVerifier::new(SECRET, Duration::from_secs(300), Arc::new(TestClock::at_unix(now))).unwrap()
}

fn proptest_config() -> ProptestConfig {
    ProptestConfig { cases: 64, failure_persistence: None, ..ProptestConfig::default() }
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn signed_payloads_verify(
        payload in proptest::collection::vec(any::<u8>(), 0..512),
        msg_id in "msg_[A-Za-z0-9]{1,24}",
        skew in -300_i64..=300,
    ) {
        let verifier = verifier();
        let timestamp = NOW + skew;
        let signature = verifier.sign(&msg_id, timestamp, &payload);
        let timestamp = timestamp.to_string();
        let headers = SvixHeaders { id: &msg_id, timestamp: &timestamp, signature: &signature };

        prop_assert_eq!(verifier.verify(&headers, &payload), Ok(()));
    }

    #[test]
    fn any_flipped_byte_is_rejected(
        payload in proptest::collection::vec(any::<u8>(), 1..256),
        index in any::<prop::sample::Index>(),
    ) {
        let verifier = verifier();
        let signature = verifier.sign("msg_1", NOW, &payload);
        let mut tampered = payload.clone();
        let i = index.index(tampered.len());
        tampered[i] ^= 0x01;
        let timestamp = NOW.to_string();
        let headers = SvixHeaders { id: "msg_1", timestamp: &timestamp, signature: &signature };

        prop_assert_eq!(verifier.verify(&headers, &tampered), Err(SignatureError::NoMatchingSignature));
    }

    #[test]
    fn out_of_window_timestamps_are_rejected(skew in 301_i64..100_000, past in any::<bool>()) {
        let verifier = verifier();
        let timestamp = if past { NOW - skew } else { NOW + skew };
        let signature = verifier.sign("msg_1", timestamp, b"{}");
        let timestamp_str = timestamp.to_string();
        let headers = SvixHeaders { id: "msg_1", timestamp: &timestamp_str, signature: &signature };

        let expected = if past { SignatureError::TimestampTooOld } else { SignatureError::TimestampTooNew };
        prop_assert_eq!(verifier.verify(&headers, b"{}"), Err(expected));
    }

    #[test]
    fn arbitrary_signature_headers_never_panic(header in ".{0,200}") {
        let verifier = verifier();
        let timestamp = NOW.to_string();
        let headers = SvixHeaders { id: "msg_1", timestamp: &timestamp, signature: &header };

        let result = verifier.verify(&headers, b"{}");
        prop_assert!(result.is_err());
    }
}
