//! Server-side sessions in the volatile store.
//!
//! Each session lives under `session:{id}` with its own TTL. A per-user index
//! (`user_sessions:{userId}`) lists session ids so a user can be logged out
//! everywhere. The index is eventually consistent: readers that find an id
//! whose session has expired drop it from the index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

use super::error::AuthError;
use super::secret::generate_opaque_token;
use crate::clock::Clock;
use crate::store::{keys, StoreError, VolatileStore};

/// Fields owned by the store; `update` never overwrites them.
const RESERVED_FIELDS: [&str; 3] = ["sessionId", "userId", "createdAt"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub session_id: String,
    pub user_id: Uuid,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub client_info: ClientInfo,
    /// Free-form fields set by callers.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct SessionStore {
    volatile: Arc<dyn VolatileStore>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl SessionStore {
    #[must_use]
    pub fn new(volatile: Arc<dyn VolatileStore>, clock: Arc<dyn Clock>, default_ttl: Duration) -> Self {
        Self {
            volatile,
            clock,
            default_ttl,
        }
    }

    #[must_use]
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Create a session and register it in the user's index.
    ///
    /// # Errors
    ///
    /// Returns an error if the id cannot be generated or the store fails.
    pub async fn create(
        &self,
        user_id: Uuid,
        client_info: ClientInfo,
        extra: Map<String, Value>,
        ttl: Option<Duration>,
    ) -> Result<String, AuthError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let session_id = generate_opaque_token()?;
        let data = SessionData {
            session_id: session_id.clone(),
            user_id,
            created_at: self.clock.now(),
            client_info,
            extra,
        };
        let value = serde_json::to_string(&data).map_err(StoreError::from)?;
        self.volatile
            .set(&keys::session(&session_id), &value, Some(ttl))
            .await?;
        self.index(user_id, &session_id, ttl).await?;
        Ok(session_id)
    }

    /// # Errors
    ///
    /// Returns an error if the store fails or the stored record is unreadable.
    pub async fn get(&self, session_id: &str) -> Result<Option<SessionData>, StoreError> {
        let Some(raw) = self.volatile.get(&keys::session(session_id)).await? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    /// Merge `partial` into an existing session, keeping its remaining TTL.
    /// Returns `false` when the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the merged record is invalid.
    pub async fn update(
        &self,
        session_id: &str,
        partial: Map<String, Value>,
    ) -> Result<bool, StoreError> {
        let key = keys::session(session_id);
        let Some(raw) = self.volatile.get(&key).await? else {
            return Ok(false);
        };
        let mut record: Map<String, Value> = serde_json::from_str(&raw)?;
        for (field, value) in partial {
            if !RESERVED_FIELDS.contains(&field.as_str()) {
                record.insert(field, value);
            }
        }
        // Round-trip through SessionData so a malformed clientInfo is rejected.
        let merged: SessionData = serde_json::from_value(Value::Object(record))?;
        self.volatile
            .replace(&key, &serde_json::to_string(&merged)?)
            .await
    }

    /// Delete a session and drop it from its user's index.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete(&self, session_id: &str) -> Result<bool, StoreError> {
        let key = keys::session(session_id);
        let owner = match self.get(session_id).await {
            Ok(data) => data.map(|data| data.user_id),
            Err(StoreError::Corrupt(err)) => {
                warn!("Deleting unreadable session record: {err}");
                None
            }
            Err(err) => return Err(err),
        };
        let deleted = self.volatile.delete(&key).await?;
        if let Some(user_id) = owner {
            self.volatile
                .set_remove(&keys::user_sessions(user_id), session_id)
                .await?;
        }
        Ok(deleted)
    }

    /// Reset a live session's TTL. Returns `false` when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn extend(&self, session_id: &str, ttl: Option<Duration>) -> Result<bool, StoreError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let Some(data) = self.get(session_id).await? else {
            return Ok(false);
        };
        if !self.volatile.expire(&keys::session(session_id), ttl).await? {
            return Ok(false);
        }
        self.index(data.user_id, session_id, ttl).await?;
        Ok(true)
    }

    /// Delete every session of a user; returns how many live sessions were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn delete_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let index_key = keys::user_sessions(user_id);
        let mut deleted = 0;
        for session_id in self.volatile.set_members(&index_key).await? {
            if self.volatile.delete(&keys::session(&session_id)).await? {
                deleted += 1;
            }
        }
        self.volatile.delete(&index_key).await?;
        Ok(deleted)
    }

    /// Ids of the user's live sessions. Stale index entries are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails.
    pub async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<String>, StoreError> {
        let index_key = keys::user_sessions(user_id);
        let mut active = Vec::new();
        for session_id in self.volatile.set_members(&index_key).await? {
            if self.volatile.exists(&keys::session(&session_id)).await? {
                active.push(session_id);
            } else {
                self.volatile.set_remove(&index_key, &session_id).await?;
            }
        }
        Ok(active)
    }

    /// Add the session to the index, never shortening the index's lifetime.
    async fn index(&self, user_id: Uuid, session_id: &str, ttl: Duration) -> Result<(), StoreError> {
        let index_key = keys::user_sessions(user_id);
        let current = self.volatile.ttl(&index_key).await?.unwrap_or(Duration::ZERO);
        self.volatile
            .set_add(&index_key, session_id, Some(ttl.max(current)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::MemoryVolatileStore;
    use anyhow::Result;
    use serde_json::json;

    fn store() -> (Arc<ManualClock>, SessionStore) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let volatile = Arc::new(MemoryVolatileStore::new(clock.clone()));
        let sessions = SessionStore::new(volatile, clock.clone(), Duration::from_secs(3600));
        (clock, sessions)
    }

    fn extra(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn create_get_and_expire() -> Result<()> {
        let (clock, sessions) = store();
        let user_id = Uuid::new_v4();
        let info = ClientInfo {
            ip: Some("203.0.113.7".to_string()),
            user_agent: Some("agora-test".to_string()),
        };
        let session_id = sessions
            .create(user_id, info.clone(), extra(json!({"theme": "dark"})), None)
            .await?;

        let data = sessions.get(&session_id).await?.expect("session");
        assert_eq!(data.user_id, user_id);
        assert_eq!(data.client_info, info);
        assert_eq!(data.extra.get("theme"), Some(&json!("dark")));

        clock.advance(chrono::Duration::seconds(3600));
        assert!(sessions.get(&session_id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn update_merges_and_protects_identity_fields() -> Result<()> {
        let (_clock, sessions) = store();
        let user_id = Uuid::new_v4();
        let session_id = sessions
            .create(user_id, ClientInfo::default(), Map::new(), None)
            .await?;

        let updated = sessions
            .update(
                &session_id,
                extra(json!({"cart": 3, "userId": Uuid::new_v4()})),
            )
            .await?;
        assert!(updated);

        let data = sessions.get(&session_id).await?.expect("session");
        assert_eq!(data.user_id, user_id);
        assert_eq!(data.extra.get("cart"), Some(&json!(3)));

        assert!(!sessions.update("missing", Map::new()).await?);
        Ok(())
    }

    #[tokio::test]
    async fn extend_moves_expiry() -> Result<()> {
        let (clock, sessions) = store();
        let session_id = sessions
            .create(Uuid::new_v4(), ClientInfo::default(), Map::new(), None)
            .await?;

        clock.advance(chrono::Duration::seconds(3000));
        assert!(sessions.extend(&session_id, None).await?);
        clock.advance(chrono::Duration::seconds(3000));
        assert!(sessions.get(&session_id).await?.is_some());
        assert!(!sessions.extend("missing", None).await?);
        Ok(())
    }

    #[tokio::test]
    async fn delete_is_idempotent_and_updates_index() -> Result<()> {
        let (_clock, sessions) = store();
        let user_id = Uuid::new_v4();
        let session_id = sessions
            .create(user_id, ClientInfo::default(), Map::new(), None)
            .await?;

        assert!(sessions.delete(&session_id).await?);
        assert!(!sessions.delete(&session_id).await?);
        assert!(sessions.list_active_for_user(user_id).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn delete_all_and_list_reconcile_index() -> Result<()> {
        let (clock, sessions) = store();
        let user_id = Uuid::new_v4();
        let short = sessions
            .create(
                user_id,
                ClientInfo::default(),
                Map::new(),
                Some(Duration::from_secs(60)),
            )
            .await?;
        let long = sessions
            .create(user_id, ClientInfo::default(), Map::new(), None)
            .await?;

        clock.advance(chrono::Duration::seconds(120));
        assert_eq!(sessions.list_active_for_user(user_id).await?, vec![long.clone()]);
        assert!(sessions.get(&short).await?.is_none());

        assert_eq!(sessions.delete_all_for_user(user_id).await?, 1);
        assert!(sessions.get(&long).await?.is_none());
        assert!(sessions.list_active_for_user(user_id).await?.is_empty());
        Ok(())
    }
}
