//! Session token verification.
//!
//! Reads the identity provider's session JWT from `Authorization: Bearer`
//! or the `__session` cookie. Anything that does not verify is treated as
//! no session at all; the gate decides what that means for the request.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use axum_extra::extract::cookie::CookieJar;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Cookie the identity provider stores the session token in.
pub const SESSION_COOKIE: &str = "__session";

/// Authenticated user attached to request extensions by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Identity-provider user id (`sub`).
    pub user_id: String,
    /// Session id (`sid`), when the token carries one.
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
    #[serde(default)]
    sid: Option<String>,
}

/// Session verifier construction errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Public key could not be parsed.
    #[error("invalid session key: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
}

/// Verifies session tokens with a fixed key and algorithm.
#[derive(Clone)]
pub struct SessionVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl std::fmt::Debug for SessionVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionVerifier")
            .field("enabled", &self.is_enabled())
            .field("algorithms", &self.validation.algorithms)
            .finish()
    }
}

impl SessionVerifier {
    /// Verifies RS256 tokens against the provider's PEM public key.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidKey` if `pem` is not an RSA public key.
    pub fn rs256_pem(pem: &[u8], issuer: Option<&str>) -> Result<Self, SessionError> {
        let key = DecodingKey::from_rsa_pem(pem)?;
        Ok(Self { key: Some(key), validation: validation(Algorithm::RS256, issuer) })
    }

    /// Verifies HS256 tokens signed with a shared secret.
    pub fn hs256(secret: &[u8], issuer: Option<&str>) -> Self {
        Self {
            key: Some(DecodingKey::from_secret(secret)),
            validation: validation(Algorithm::HS256, issuer),
        }
    }

    /// Verifier that never yields an identity.
    pub fn disabled() -> Self {
        Self { key: None, validation: Validation::default() }
    }

    /// Returns whether a key is configured.
    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Verifies a raw token.
    pub fn verify_token(&self, token: &str) -> Option<Identity> {
        let key = self.key.as_ref()?;

        match decode::<SessionClaims>(token, key, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => {
                Some(Identity { user_id: data.claims.sub, session_id: data.claims.sid })
            },
            Ok(_) => {
                debug!("session token has empty subject");
                None
            },
            Err(e) => {
                debug!(error = %e, "session token rejected");
                None
            },
        }
    }

    /// Resolves the identity for a request, if it carries a valid token.
    pub fn identify(&self, headers: &HeaderMap) -> Option<Identity> {
        if !self.is_enabled() {
            return None;
        }
        session_token(headers).and_then(|token| self.verify_token(&token))
    }
}

fn validation(algorithm: Algorithm, issuer: Option<&str>) -> Validation {
    let mut validation = Validation::new(algorithm);
    validation.validate_nbf = true;
    validation.validate_aud = false;
    if let Some(issuer) = issuer {
        validation.set_issuer(&[issuer]);
    }
    validation
}

/// Extracts the session token, preferring the Authorization header.
fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());

    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    CookieJar::from_headers(headers)
        .get(SESSION_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::{SystemTime, UNIX_EPOCH};

    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    use super::*;

    const SECRET: &[u8] = b"dev-session-secret";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn token(claims: &serde_json::Value, secret: &[u8]) -> String {
        encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret)).unwrap()
    }

    fn valid_token() -> String {
        token(&json!({ "sub": "user_1", "sid": "sess_1", "exp": now() + 600 }), SECRET)
    }

    #[test]
    fn bearer_token_yields_identity() {
        let verifier = SessionVerifier::hs256(SECRET, None);
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", valid_token());
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).unwrap());

        assert_eq!(
            verifier.identify(&headers),
            Some(Identity { user_id: "user_1".into(), session_id: Some("sess_1".into()) })
        );
    }

    #[test]
    fn session_cookie_yields_identity() {
        let verifier = SessionVerifier::hs256(SECRET, None);
        let mut headers = HeaderMap::new();
        let value = format!("theme=dark; {SESSION_COOKIE}={}", valid_token());
        headers.insert("cookie", HeaderValue::from_str(&value).unwrap());

        assert_eq!(verifier.identify(&headers).map(|i| i.user_id), Some("user_1".to_string()));
    }

    #[test]
    fn invalid_tokens_are_no_identity() {
        let verifier = SessionVerifier::hs256(SECRET, None);

        let expired = token(&json!({ "sub": "user_1", "exp": now() - 3600 }), SECRET);
        let wrong_key = token(&json!({ "sub": "user_1", "exp": now() + 600 }), b"other");
        let not_yet = token(&json!({ "sub": "user_1", "exp": now() + 600, "nbf": now() + 300 }), SECRET);

        assert_eq!(verifier.verify_token(&expired), None);
        assert_eq!(verifier.verify_token(&wrong_key), None);
        assert_eq!(verifier.verify_token(&not_yet), None);
        assert_eq!(verifier.verify_token("not.a.jwt"), None);
    }

    #[test]
    fn issuer_is_enforced_when_configured() {
        let verifier = SessionVerifier::hs256(SECRET, Some("https://clerk.example.com"));

        let right = token(
            &json!({ "sub": "u", "exp": now() + 600, "iss": "https://clerk.example.com" }),
            SECRET,
        );
        let wrong = token(&json!({ "sub": "u", "exp": now() + 600, "iss": "https://evil" }), SECRET);

        assert!(verifier.verify_token(&right).is_some());
        assert!(verifier.verify_token(&wrong).is_none());
    }

    #[test]
    fn disabled_verifier_ignores_tokens() {
        let verifier = SessionVerifier::disabled();
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", valid_token());
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&value).unwrap());

        assert!(!verifier.is_enabled());
        assert_eq!(verifier.identify(&headers), None);
    }

    #[test]
    fn garbage_pem_is_rejected() {
        assert!(SessionVerifier::rs256_pem(b"-----BEGIN NOTHING-----", None).is_err());
    }
}
