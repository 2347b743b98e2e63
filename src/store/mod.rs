//! Storage collaborators consumed by the identity core.
//!
//! Two stores back the service:
//!
//! - **Durable** (`DurableStore`): identities, password hashes and refresh-token
//!   records. It is authoritative for refresh tokens.
//! - **Volatile** (`VolatileStore`): keyed values with per-key TTL, used for
//!   refresh-token mirrors, sessions, per-user session indexes, reset tokens
//!   and rate-limit counters. It must be shared by every server process, so
//!   all primitives that decide races (`incr`, `delete`, `take`) are atomic at
//!   the store level.
//!
//! Every call may fail or time out independently; wrap stores with
//! [`deadline::BoundedVolatileStore`] / [`deadline::BoundedDurableStore`] to
//! turn a slow call into [`StoreError::Timeout`].

pub mod deadline;
pub mod memory;
pub mod postgres;
pub mod volatile_pg;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::auth::identity::Identity;

pub use deadline::{BoundedDurableStore, BoundedVolatileStore};
pub use memory::{MemoryDurableStore, MemoryVolatileStore};
pub use postgres::PgDurableStore;
pub use volatile_pg::PgVolatileStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(err.to_string())
            }
            _ => Self::Unavailable(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

/// Identity plus the password hash it authenticates with.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    pub identity: Identity,
    pub password_hash: String,
}

/// Durable refresh-token row; only the token hash is ever stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub token_hash: String,
    pub subject_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// Result of an atomic counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Counter {
    /// Value after the increment.
    pub value: i64,
    /// Time left until the counter key expires.
    pub ttl: Duration,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn find_credentials(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError>;

    async fn find_identity(&self, user_id: Uuid) -> Result<Option<Identity>, StoreError>;

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError>;

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError>;

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError>;

    /// Delete-if-exists. Only one concurrent caller observes `true`.
    async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError>;

    /// Delete every refresh token of a subject, returning the deleted hashes.
    async fn delete_refresh_tokens_for(&self, subject_id: Uuid) -> Result<Vec<String>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait VolatileStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Overwrite an existing live value, keeping its remaining TTL.
    /// Returns `false` when the key is absent or already expired.
    async fn replace(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    /// Delete-if-exists. Only one concurrent caller observes `true`.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomic get-and-delete.
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomic increment. A missing or expired key starts at 1 with `ttl`;
    /// a live key keeps its original expiry.
    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError>;

    /// Add a member to a set; `ttl` (when given) becomes the set's expiry.
    async fn set_add(&self, key: &str, member: &str, ttl: Option<Duration>)
        -> Result<(), StoreError>;

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Drop expired entries; returns how many were removed.
    async fn purge_expired(&self) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// Volatile-store key layout.
pub mod keys {
    use uuid::Uuid;

    #[must_use]
    pub fn refresh_token(token_hash: &str) -> String {
        format!("refresh:{token_hash}")
    }

    #[must_use]
    pub fn session(session_id: &str) -> String {
        format!("session:{session_id}")
    }

    #[must_use]
    pub fn user_sessions(user_id: Uuid) -> String {
        format!("user_sessions:{user_id}")
    }

    #[must_use]
    pub fn password_reset(token_hash: &str) -> String {
        format!("password_reset:{token_hash}")
    }

    #[must_use]
    pub fn rate_limit(scope: &str, identifier: &str) -> String {
        format!("rate:{scope}:{identifier}")
    }
}

/// Clamp a chrono duration to a positive std duration (zero when negative).
pub(crate) fn positive_duration(value: chrono::Duration) -> Duration {
    value.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        let user = Uuid::nil();
        assert_eq!(keys::refresh_token("abc"), "refresh:abc");
        assert_eq!(keys::session("s1"), "session:s1");
        assert_eq!(
            keys::user_sessions(user),
            "user_sessions:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(keys::rate_limit("login", "1.2.3.4"), "rate:login:1.2.3.4");
    }

    #[test]
    fn positive_duration_clamps_negative() {
        assert_eq!(
            positive_duration(chrono::Duration::seconds(-5)),
            Duration::ZERO
        );
        assert_eq!(
            positive_duration(chrono::Duration::seconds(5)),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn sqlx_pool_errors_are_unavailable() {
        let err = StoreError::from(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
