//! Core domain models and strongly-typed identifiers.
//!
//! Defines the local user record, the data a `user.created` webhook
//! carries into provisioning, and the retry-queue entry written when a
//! provisioning insert fails. Identifier newtypes implement the sqlx
//! traits so repositories can bind and decode them directly.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Locally generated user identifier.
///
/// Independent of the identity provider's id so the provider can be
/// swapped without rewriting foreign keys.
///
/// # Example
///
/// ```
/// use outlay_core::models::UserId;
/// let user_id = UserId::new();
/// println!("Provisioned user: {}", user_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Creates a new random user ID (UUID v4).
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for UserId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for UserId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for UserId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Identifier of a provisioning retry-queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FailureId(pub Uuid);

impl FailureId {
    /// Creates a new random failure ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FailureId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FailureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for FailureId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for FailureId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for FailureId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for FailureId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// A provisioned local user.
///
/// `external_id` is unique and never updated once the row exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    /// Local identifier.
    pub id: UserId,

    /// Email address taken from the identity provider at creation time.
    pub email: String,

    /// Identity-provider user id (e.g. `user_2abc...`).
    pub external_id: String,

    /// Row creation time.
    pub created_at: DateTime<Utc>,
}

/// Validated user data extracted from a `user.created` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    /// Identity-provider user id.
    pub external_id: String,

    /// First listed email address.
    pub email: String,

    /// Given name, if the provider sent one.
    pub first_name: Option<String>,

    /// Family name, if the provider sent one.
    pub last_name: Option<String>,
}

impl NewUser {
    /// Human-readable name for log lines, empty parts skipped.
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }
}

/// Lifecycle of a provisioning retry-queue entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStatus {
    /// Waiting for the retry worker.
    Pending,

    /// User was created (or already existed) on a later attempt.
    ///
    /// Terminal success state.
    Resolved,

    /// Gave up after the maximum number of attempts.
    ///
    /// Terminal failure state; needs manual repair.
    Abandoned,
}

impl FailureStatus {
    /// Returns whether no further attempts will be made.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved | Self::Abandoned)
    }

    /// Storage representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Resolved => "resolved",
            Self::Abandoned => "abandoned",
        }
    }
}

impl fmt::Display for FailureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl sqlx::Type<PgDb> for FailureStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for FailureStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "resolved" => Ok(Self::Resolved),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown provisioning failure status: {other}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for FailureStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <&str as sqlx::Encode<PgDb>>::encode_by_ref(&self.as_str(), buf)
    }
}

/// A user insert that failed and is waiting to be retried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ProvisioningFailure {
    /// Entry identifier.
    pub id: FailureId,

    /// Identity-provider user id of the user that could not be created.
    pub external_id: String,

    /// Email to provision.
    pub email: String,

    /// First name to provision.
    pub first_name: Option<String>,

    /// Last name to provision.
    pub last_name: Option<String>,

    /// Insert attempts made so far, including the one during the webhook.
    pub attempts: i32,

    /// Error text from the most recent attempt.
    pub last_error: String,

    /// Current lifecycle state.
    pub status: FailureStatus,

    /// Earliest time the worker may retry.
    pub next_retry_at: DateTime<Utc>,

    /// When the first failure was recorded.
    pub created_at: DateTime<Utc>,

    /// Last state change.
    pub updated_at: DateTime<Utc>,
}

impl ProvisioningFailure {
    /// Rebuilds the user data to retry the insert with.
    pub fn new_user(&self) -> NewUser {
        NewUser {
            external_id: self.external_id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(first: Option<&str>, last: Option<&str>) -> NewUser {
        NewUser {
            external_id: "ext_1".to_string(),
            email: "a@example.com".to_string(),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
        }
    }

    #[test]
    fn display_name_joins_present_parts() {
        assert_eq!(new_user(Some("A"), Some("B")).display_name().as_deref(), Some("A B"));
        assert_eq!(new_user(Some("A"), None).display_name().as_deref(), Some("A"));
        assert_eq!(new_user(None, Some("B")).display_name().as_deref(), Some("B"));
    }

    #[test]
    fn display_name_skips_blank_parts() {
        assert_eq!(new_user(Some("  "), None).display_name(), None);
        assert_eq!(new_user(None, None).display_name(), None);
    }

    #[test]
    fn user_ids_are_unique() {
        assert_ne!(UserId::new(), UserId::new());
    }

    #[test]
    fn failure_status_display_matches_storage_values() {
        assert_eq!(FailureStatus::Pending.to_string(), "pending");
        assert_eq!(FailureStatus::Resolved.to_string(), "resolved");
        assert_eq!(FailureStatus::Abandoned.to_string(), "abandoned");
        assert!(!FailureStatus::Pending.is_terminal());
        assert!(FailureStatus::Abandoned.is_terminal());
    }

    fn failure(first: Option<&str>, last: Option<&str>) -> ProvisioningFailure {
        let now = Utc::now();
        ProvisioningFailure {
            id: FailureId::new(),
            external_id: "ext_1".to_string(),
            email: "a@example.com".to_string(),
            first_name: first.map(String::from),
            last_name: last.map(String::from),
            attempts: 1,
            last_error: "Database error: pool timed out".to_string(),
            status: FailureStatus::Pending,
            next_retry_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn failure_rebuilds_new_user() {
        assert_eq!(failure(Some("A"), Some("B")).new_user(), new_user(Some("A"), Some("B")));
    }

    #[test]
    fn failure_keeps_multi_word_and_missing_names() {
        assert_eq!(
            failure(Some("Mary Ann"), Some("Smith")).new_user(),
            new_user(Some("Mary Ann"), Some("Smith"))
        );
        assert_eq!(failure(None, Some("Smith")).new_user(), new_user(None, Some("Smith")));
        assert_eq!(failure(Some("Cher"), None).new_user(), new_user(Some("Cher"), None));
    }
}
