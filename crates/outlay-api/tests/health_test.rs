//! Health, readiness and liveness endpoint tests.

use axum::http::StatusCode;
use outlay_testing::TestEnv;

#[tokio::test]
async fn health_reports_reachable_store() {
    let env = TestEnv::new();

    let response = env.get("/health", None).await;

    assert_eq!(response.status, StatusCode::OK);
    let body = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"]["reachable"], true);
    assert!(body["store"]["latency_ms"].is_u64());
    assert!(body["store"].get("error").is_none());
    assert_eq!(body["checked_at"], "2023-11-14T22:13:20Z");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn health_reports_unreachable_store() {
    let env = TestEnv::new();
    env.store.set_unreachable(true);

    let response = env.get("/health", None).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body = response.json();
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["store"]["reachable"], false);
    assert!(body["store"]["error"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn ready_when_store_answers() {
    let env = TestEnv::new();

    let response = env.get("/ready", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ready");
}

#[tokio::test]
async fn not_ready_reports_database_unavailable() {
    let env = TestEnv::new();
    env.store.set_unreachable(true);

    let response = env.get("/ready", None).await;

    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    let body = response.json();
    assert_eq!(body["error"]["code"], "E3001");
    assert!(body["error"]["message"].as_str().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn liveness_ignores_store() {
    let env = TestEnv::new();
    env.store.set_unreachable(true);

    let response = env.get("/live", None).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "alive");
}

#[tokio::test]
async fn signed_in_health_check_is_not_rewritten() {
    let env = TestEnv::new();
    let token = env.session_token("user_1");

    let response = env.get("/health", Some(&token)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "healthy");
}
