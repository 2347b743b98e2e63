//! In-process store implementations.
//!
//! `MemoryVolatileStore` honours TTLs against an injected [`Clock`], so expiry
//! can be driven by a `ManualClock` in tests. Neither store is shared across
//! processes; production wiring uses the Postgres-backed stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    positive_duration, Counter, CredentialRecord, DurableStore, RefreshTokenRecord, StoreError,
    VolatileStore,
};
use crate::auth::identity::Identity;
use crate::clock::{Clock, SystemClock};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Set(BTreeSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>, StoreError> {
    let ttl = chrono::Duration::from_std(ttl)
        .map_err(|err| StoreError::Corrupt(format!("invalid ttl: {err}")))?;
    Ok(now + ttl)
}

pub struct MemoryVolatileStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl Default for MemoryVolatileStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryVolatileStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a live entry, evicting it when expired.
    fn live<'a>(
        entries: &'a mut HashMap<String, Entry>,
        key: &str,
        now: DateTime<Utc>,
    ) -> Option<&'a mut Entry> {
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        entries.get_mut(key)
    }
}

#[async_trait]
impl VolatileStore for MemoryVolatileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(StoreError::Corrupt(format!("{key} is not a text value"))),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = ttl.map(|ttl| expiry(now, ttl)).transpose()?;
        self.entries.lock().await.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at,
            },
        );
        Ok(())
    }

    async fn replace(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.value = Value::Text(value.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|entry| entry.is_live(now)))
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.remove(key) {
            Some(entry) if entry.is_live(now) => match entry.value {
                Value::Text(text) => Ok(Some(text)),
                Value::Set(_) => Err(StoreError::Corrupt(format!("{key} is not a text value"))),
            },
            _ => Ok(None),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = expiry(now, ttl)?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key, now)
            .and_then(|entry| entry.expires_at)
            .map(|at| positive_duration(at - now)))
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        Ok(Self::live(&mut entries, key, now).is_some())
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        if let Some(entry) = Self::live(&mut entries, key, now) {
            let Value::Text(text) = &entry.value else {
                return Err(StoreError::Corrupt(format!("{key} is not a counter")));
            };
            let value = text
                .parse::<i64>()
                .map_err(|_| StoreError::Corrupt(format!("{key} is not a counter")))?
                + 1;
            entry.value = Value::Text(value.to_string());
            let remaining = entry
                .expires_at
                .map_or(ttl, |at| positive_duration(at - now));
            return Ok(Counter {
                value,
                ttl: remaining,
            });
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text("1".to_string()),
                expires_at: Some(expiry(now, ttl)?),
            },
        );
        Ok(Counter { value: 1, ttl })
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let now = self.clock.now();
        let expires_at = ttl.map(|ttl| expiry(now, ttl)).transpose()?;
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key, now) {
            Some(entry) => {
                let Value::Set(members) = &mut entry.value else {
                    return Err(StoreError::Corrupt(format!("{key} is not a set")));
                };
                members.insert(member.to_string());
                if expires_at.is_some() {
                    entry.expires_at = expires_at;
                }
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: Value::Set(BTreeSet::from([member.to_string()])),
                        expires_at,
                    },
                );
            }
        }
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let Some(entry) = Self::live(&mut entries, key, now) else {
            return Ok(false);
        };
        let Value::Set(members) = &mut entry.value else {
            return Err(StoreError::Corrupt(format!("{key} is not a set")));
        };
        let removed = members.remove(member);
        if members.is_empty() {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match Self::live(&mut entries, key, now) {
            Some(Entry {
                value: Value::Set(members),
                ..
            }) => Ok(members.iter().cloned().collect()),
            Some(_) => Err(StoreError::Corrupt(format!("{key} is not a set"))),
            None => Ok(Vec::new()),
        }
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(u64::try_from(before - entries.len()).unwrap_or(u64::MAX))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[derive(Default)]
struct DurableState {
    users: HashMap<Uuid, CredentialRecord>,
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

/// In-memory durable store; identities are seeded with [`Self::insert_identity`].
#[derive(Default)]
pub struct MemoryDurableStore {
    state: Mutex<DurableState>,
}

impl MemoryDurableStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_identity(&self, identity: Identity, password_hash: String) {
        self.state.lock().await.users.insert(
            identity.id,
            CredentialRecord {
                identity,
                password_hash,
            },
        );
    }

    /// Replace the stored identity, keeping its password hash.
    pub async fn update_identity(&self, identity: Identity) -> bool {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&identity.id) {
            Some(record) => {
                record.identity = identity;
                true
            }
            None => false,
        }
    }

    pub async fn refresh_token_count(&self, subject_id: Uuid) -> usize {
        self.state
            .lock()
            .await
            .refresh_tokens
            .values()
            .filter(|record| record.subject_id == subject_id)
            .count()
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn find_credentials(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|record| record.identity.email == email)
            .cloned())
    }

    async fn find_identity(&self, user_id: Uuid) -> Result<Option<Identity>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .get(&user_id)
            .map(|record| record.identity.clone()))
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.users.get_mut(&user_id) {
            Some(record) => {
                record.password_hash = password_hash.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.refresh_tokens.contains_key(&record.token_hash) {
            return Err(StoreError::Corrupt("duplicate refresh token".to_string()));
        }
        state
            .refresh_tokens
            .insert(record.token_hash.clone(), record.clone());
        Ok(())
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .refresh_tokens
            .get(token_hash)
            .cloned())
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .refresh_tokens
            .remove(token_hash)
            .is_some())
    }

    async fn delete_refresh_tokens_for(&self, subject_id: Uuid) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock().await;
        let hashes: Vec<String> = state
            .refresh_tokens
            .values()
            .filter(|record| record.subject_id == subject_id)
            .map(|record| record.token_hash.clone())
            .collect();
        for hash in &hashes {
            state.refresh_tokens.remove(hash);
        }
        Ok(hashes)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
