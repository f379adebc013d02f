//! Request gate: session-aware routing in front of every page and API route.
//!
//! For each request the gate resolves the caller's identity and then:
//!
//! | identity | path                        | decision                                   |
//! |----------|-----------------------------|--------------------------------------------|
//! | none     | not public                  | 307 to `{sign_in_url}?redirect_url={path}` |
//! | present  | does not start with `/api`  | internal rewrite to `{prefix}{path}`       |
//! | otherwise|                             | pass through                               |
//!
//! Rewrites change only the URI seen by the router; the client URL stays
//! the same. The decision itself is pure, see [`RoutePolicy::decide`].

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::LOCATION, HeaderValue, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};
use url::form_urlencoded::byte_serialize;

use super::session::{Identity, SessionVerifier};

/// Paths under this prefix are never rewritten for signed-in users.
const API_PREFIX: &str = "/api";

/// What the gate does with a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Route the request unchanged.
    PassThrough,
    /// Send the caller to sign in; holds the `Location` value.
    Redirect(String),
    /// Route the request as if it had this path and query.
    Rewrite(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RoutePattern {
    Exact(String),
    Subtree(String),
}

impl RoutePattern {
    fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix("/*") {
            Some(prefix) => Self::Subtree(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(exact) => path == exact,
            Self::Subtree(prefix) => {
                path == prefix
                    || path.strip_prefix(prefix.as_str()).is_some_and(|rest| rest.starts_with('/'))
            },
        }
    }
}

/// Public routes plus the redirect and rewrite targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePolicy {
    public_routes: Vec<RoutePattern>,
    sign_in_url: String,
    authenticated_prefix: String,
}

impl RoutePolicy {
    /// Creates a policy.
    ///
    /// Patterns are exact paths unless they end in `/*`, which matches the
    /// prefix itself and everything below it.
    pub fn new<I, S>(public_routes: I, sign_in_url: &str, authenticated_prefix: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            public_routes: public_routes.into_iter().map(|p| RoutePattern::parse(p.as_ref())).collect(),
            sign_in_url: sign_in_url.to_string(),
            authenticated_prefix: authenticated_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Returns whether `path` is reachable without a session.
    pub fn is_public(&self, path: &str) -> bool {
        self.public_routes.iter().any(|pattern| pattern.matches(path))
    }

    /// Decides how to route a request for `uri`.
    pub fn decide(&self, uri: &Uri, identity: Option<&Identity>) -> GateDecision {
        let path = uri.path();

        match identity {
            None if !self.is_public(path) => GateDecision::Redirect(self.sign_in_location(uri)),
            Some(_) if !path.starts_with(API_PREFIX) => GateDecision::Rewrite(self.rewrite_target(uri)),
            _ => GateDecision::PassThrough,
        }
    }

    fn sign_in_location(&self, uri: &Uri) -> String {
        let original = uri.path_and_query().map_or_else(|| uri.path(), |pq| pq.as_str());
        let separator = if self.sign_in_url.contains('?') { '&' } else { '?' };
        let encoded: String = byte_serialize(original.as_bytes()).collect();

        format!("{}{separator}redirect_url={encoded}", self.sign_in_url)
    }

    fn rewrite_target(&self, uri: &Uri) -> String {
        let mut target = match uri.path() {
            "/" if self.authenticated_prefix.is_empty() => "/".to_string(),
            "/" => self.authenticated_prefix.clone(),
            path => format!("{}{path}", self.authenticated_prefix),
        };

        if let Some(query) = uri.query() {
            target.push('?');
            target.push_str(query);
        }

        target
    }
}

/// Shared state of the gate middleware.
#[derive(Debug, Clone)]
pub struct RequestGate {
    policy: RoutePolicy,
    sessions: SessionVerifier,
}

impl RequestGate {
    /// Creates a gate.
    pub fn new(policy: RoutePolicy, sessions: SessionVerifier) -> Self {
        Self { policy, sessions }
    }

    /// Routing policy in use.
    pub fn policy(&self) -> &RoutePolicy {
        &self.policy
    }
}

/// Axum middleware applying the gate to every request it wraps.
///
/// Must wrap the router as a whole, not be added with `Router::layer`, so
/// rewrites happen before route matching.
pub async fn request_gate(State(gate): State<Arc<RequestGate>>, mut req: Request, next: Next) -> Response {
    let identity = gate.sessions.identify(req.headers());

    match gate.policy.decide(req.uri(), identity.as_ref()) {
        GateDecision::PassThrough => {},
        GateDecision::Redirect(location) => match HeaderValue::from_str(&location) {
            Ok(value) => {
                debug!(path = %req.uri().path(), "no session, redirecting to sign-in");
                return (StatusCode::TEMPORARY_REDIRECT, [(LOCATION, value)]).into_response();
            },
            Err(e) => {
                warn!(error = %e, location = %location, "sign-in location is not a valid header, passing through");
            },
        },
        GateDecision::Rewrite(target) => match target.parse::<Uri>() {
            Ok(uri) => {
                debug!(from = %req.uri().path(), to = %uri.path(), "rewriting for signed-in user");
                *req.uri_mut() = uri;
            },
            Err(e) => {
                warn!(error = %e, target = %target, "rewrite target is not a valid URI, passing through");
            },
        },
    }

    if let Some(identity) = identity {
        req.extensions_mut().insert(identity);
    }

    next.run(req).await
}
