//! Request gate behaviour through the full router.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use outlay_api::{
    middleware::{GateDecision, Identity, RoutePolicy},
    Config,
};
use outlay_testing::TestEnv;
use proptest::prelude::*;

fn redirect_target(location: &str) -> Option<String> {
    let (_, query) = location.split_once('?')?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "redirect_url")
        .map(|(_, value)| value.into_owned())
}

#[tokio::test]
async fn anonymous_private_page_redirects_to_sign_in() {
    let env = TestEnv::new();

    let response = env.get("/reports", None).await;

    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
    let location = response.header("location").unwrap();
    assert!(location.starts_with("/signin?"));
    assert_eq!(redirect_target(location).as_deref(), Some("/reports"));
}

#[tokio::test]
async fn redirect_keeps_query_string() {
    let env = TestEnv::new();

    let response = env.get("/reports?month=3&year=2024", None).await;

    let location = response.header("location").unwrap();
    assert_eq!(redirect_target(location).as_deref(), Some("/reports?month=3&year=2024"));
}

#[tokio::test]
async fn unusable_sign_in_location_passes_through() {
    let env = TestEnv::with_config(Config { sign_in_url: "/sign\u{7f}in".to_string(), ..TestEnv::new().config });

    let response = env.get("/reports", None).await;

    assert_eq!(response.status, StatusCode::NOT_FOUND);
    assert!(response.header("location").is_none());
}

#[tokio::test]
async fn anonymous_public_pages_are_served() {
    let env = TestEnv::new();

    for path in ["/", "/signin", "/signup"] {
        let response = env.get(path, None).await;
        assert_eq!(response.status, StatusCode::OK, "{path}");
        assert!(!response.text().is_empty());
    }
}

#[tokio::test]
async fn signed_in_page_is_served_from_dashboard() {
    let env = TestEnv::new();
    let token = env.session_token("user_1");

    let response = env.get("/reports", Some(&token)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json(), serde_json::json!({ "user_id": "user_1", "section": "reports" }));
}

#[tokio::test]
async fn signed_in_root_is_dashboard_overview() {
    let env = TestEnv::new();
    let token = env.session_token("user_1");

    let response = env.get("/", Some(&token)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["section"], "");
}

#[tokio::test]
async fn session_cookie_is_accepted() {
    let env = TestEnv::new();
    let request = Request::builder()
        .uri("/settings")
        .header("cookie", format!("__session={}", env.session_token("user_2")))
        .body(Body::empty())
        .unwrap();

    let response = env.send(request).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["user_id"], "user_2");
    assert_eq!(response.json()["section"], "settings");
}

#[tokio::test]
async fn invalid_session_is_anonymous() {
    let env = TestEnv::new();

    let response = env.get("/reports", Some("forged.token.value")).await;

    assert_eq!(response.status, StatusCode::TEMPORARY_REDIRECT);
}

#[tokio::test]
async fn signed_in_api_request_passes_through() {
    let env = TestEnv::new();
    let token = env.session_token("user_1");

    let response = env.get("/api/anything", Some(&token)).await;

    // Not rewritten under the dashboard, so no page matches.
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoints_bypass_the_gate() {
    let env = TestEnv::new();

    for path in ["/health", "/ready", "/live"] {
        assert_eq!(env.get(path, None).await.status, StatusCode::OK, "{path}");
    }
}

fn path_strategy() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z0-9_-]{1,8}", 0..4).prop_map(|segments| format!("/{}", segments.join("/")))
}

proptest! {
    #[test]
    fn anonymous_decisions_follow_public_list(path in path_strategy()) {
        let policy = RoutePolicy::new(["/", "/signin", "/signup", "/api/webhooks"], "/signin", "/dashboard");
        let uri = path.parse().unwrap();

        match policy.decide(&uri, None) {
            GateDecision::PassThrough => prop_assert!(policy.is_public(&path)),
            GateDecision::Redirect(location) => {
                prop_assert!(!policy.is_public(&path));
                prop_assert_eq!(redirect_target(&location), Some(path.clone()));
            },
            GateDecision::Rewrite(_) => prop_assert!(false, "anonymous request rewritten"),
        }
    }

    #[test]
    fn signed_in_pages_always_land_under_prefix(path in path_strategy(), query in proptest::option::of("[a-z]{1,5}=[0-9]{1,3}")) {
        let policy = RoutePolicy::new(["/"], "/signin", "/dashboard");
        let identity = Identity { user_id: "user_1".to_string(), session_id: None };
        let full = match &query {
            Some(q) => format!("{path}?{q}"),
            None => path.clone(),
        };
        let uri = full.parse().unwrap();

        match policy.decide(&uri, Some(&identity)) {
            GateDecision::Rewrite(target) => {
                prop_assert!(!path.starts_with("/api"));
                prop_assert!(target.starts_with("/dashboard"));
                if let Some(q) = &query {
                    let suffix = format!("?{q}");
                    prop_assert!(target.ends_with(&suffix));
                }
            },
            GateDecision::PassThrough => prop_assert!(path.starts_with("/api")),
            GateDecision::Redirect(_) => prop_assert!(false, "signed-in request redirected"),
        }
    }
}
