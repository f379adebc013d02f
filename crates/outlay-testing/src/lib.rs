//! Test environment for Outlay.
//!
//! `TestEnv` wires the real router to an in-memory store and a
//! deterministic clock, and knows the webhook and session secrets so tests
//! can produce correctly signed requests. `TestDatabase` provides an
//! isolated PostgreSQL database for storage tests.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

use std::{
    sync::{Arc, Once},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use axum::{
    body::Body,
    http::{HeaderMap, Request, StatusCode},
    Router,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use outlay_api::{
    config::Config,
    crypto::WebhookVerifier,
    middleware::{RequestGate, SessionVerifier},
    AppState,
};
use outlay_core::{
    Clock, MemoryProvisioningStore, Provisioner, RetryPolicy, RetryWorker, TestClock, WorkerConfig,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub mod database;
pub mod fixtures;

pub use database::TestDatabase;
pub use fixtures::{SignedWebhook, UserCreatedEvent};

/// Webhook signing secret used by every test environment.
pub const WEBHOOK_SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

/// HS256 session secret used by every test environment.
pub const SESSION_SECRET: &str = "outlay-test-session-secret";

/// Fixed start time of the test clock (2023-11-14T22:13:20Z).
pub const START_UNIX: u64 = 1_700_000_000;

static TRACING: Once = Once::new();

/// Installs a test-writer tracing subscriber once per process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

/// In-memory application under test.
pub struct TestEnv {
    /// Deterministic clock shared with verifier, provisioner and worker
    pub clock: TestClock,
    /// Store backing the router
    pub store: Arc<MemoryProvisioningStore>,
    /// Configuration the app was built from
    pub config: Config,
    verifier: Arc<WebhookVerifier>,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// Creates an environment with default settings and jitter disabled.
    pub fn new() -> Self {
        Self::with_config(Config {
            webhook_secret: Some(WEBHOOK_SECRET.to_string()),
            session_secret: Some(SESSION_SECRET.to_string()),
            retry_jitter_factor: 0.0,
            ..Config::default()
        })
    }

    /// Creates an environment from a custom configuration.
    ///
    /// # Panics
    ///
    /// Panics if the configuration lacks a usable webhook secret.
    pub fn with_config(config: Config) -> Self {
        init_tracing();

        let clock = TestClock::at_unix(START_UNIX);
        let verifier = config
            .to_webhook_verifier(Arc::new(clock.clone()))
            .expect("test config has a valid webhook secret");

        Self { clock, store: Arc::new(MemoryProvisioningStore::new()), config, verifier: Arc::new(verifier) }
    }

    /// Retry policy derived from the configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.config.to_retry_policy()
    }

    /// Provisioner writing to this environment's store.
    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.store.clone(), self.shared_clock(), self.retry_policy())
    }

    /// Retry worker draining this environment's store.
    pub fn worker(&self, cancellation_token: CancellationToken) -> RetryWorker {
        let config = WorkerConfig {
            poll_interval: Duration::from_secs(1),
            ..self.config.to_worker_config()
        };
        RetryWorker::new(self.store.clone(), self.shared_clock(), self.retry_policy(), config, cancellation_token)
    }

    /// Application router as served in production.
    ///
    /// # Panics
    ///
    /// Panics if the session configuration is invalid.
    pub fn router(&self) -> Router {
        let state = AppState {
            store: self.store.clone(),
            verifier: self.verifier.clone(),
            provisioner: Arc::new(self.provisioner()),
            clock: self.shared_clock(),
        };
        let sessions: SessionVerifier =
            self.config.to_session_verifier().expect("test session config is valid");
        let gate = Arc::new(RequestGate::new(self.config.to_route_policy(), sessions));

        outlay_api::create_router(state, gate, Duration::from_secs(self.config.request_timeout))
    }

    /// Signs a payload the way the identity provider does.
    pub fn sign(&self, msg_id: &str, timestamp: i64, payload: &[u8]) -> String {
        self.verifier.sign(msg_id, timestamp, payload)
    }

    /// Current test-clock time in unix seconds.
    pub fn now_unix(&self) -> i64 {
        self.clock.unix_seconds()
    }

    /// Signed `POST /api/webhooks` request for `event`, stamped now.
    pub fn webhook_request(&self, event: &Value) -> Request<Body> {
        SignedWebhook::new(event).build(self)
    }

    /// Session token for `user_id`, valid for an hour of wall-clock time.
    ///
    /// `jsonwebtoken` checks expiry against the system clock, not the test
    /// clock.
    pub fn session_token(&self, user_id: &str) -> String {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
        let claims = serde_json::json!({
            "sub": user_id,
            "sid": format!("sess_{user_id}"),
            "iat": now,
            "exp": now + 3600,
        });

        encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(SESSION_SECRET.as_bytes()))
            .expect("HS256 encoding cannot fail")
    }

    /// Sends a request through a fresh router.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router().oneshot(request).await.expect("router is infallible");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.into_body().collect().await.expect("body collects").to_bytes();

        TestResponse { status, headers, body }
    }

    /// `GET path` with an optional session token as Bearer auth.
    pub async fn get(&self, path: &str, session: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(token) = session {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).expect("valid request")).await
    }

    fn shared_clock(&self) -> Arc<dyn Clock> {
        Arc::new(self.clock.clone())
    }
}

/// Fully buffered response.
#[derive(Debug)]
pub struct TestResponse {
    /// Response status
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body
    pub body: Bytes,
}

impl TestResponse {
    /// Body parsed as JSON.
    ///
    /// # Panics
    ///
    /// Panics if the body is not JSON.
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }

    /// Body as UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Value of a response header, if present and UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}
