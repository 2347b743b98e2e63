//! Per-call deadlines for store access.
//!
//! A call that exceeds its deadline is reported as [`StoreError::Timeout`],
//! which callers treat like any other store failure.

use async_trait::async_trait;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::warn;
use uuid::Uuid;

use super::{
    Counter, CredentialRecord, DurableStore, RefreshTokenRecord, StoreError, VolatileStore,
};
use crate::auth::identity::Identity;

async fn bounded<T, F>(deadline: Duration, operation: &'static str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>> + Send,
{
    if let Ok(result) = tokio::time::timeout(deadline, call).await {
        result
    } else {
        warn!(operation, ?deadline, "store call exceeded deadline");
        Err(StoreError::Timeout(deadline))
    }
}

pub struct BoundedVolatileStore {
    inner: Arc<dyn VolatileStore>,
    deadline: Duration,
}

impl BoundedVolatileStore {
    #[must_use]
    pub fn new(inner: Arc<dyn VolatileStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl VolatileStore for BoundedVolatileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        bounded(self.deadline, "get", self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        bounded(self.deadline, "set", self.inner.set(key, value, ttl)).await
    }

    async fn replace(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        bounded(self.deadline, "replace", self.inner.replace(key, value)).await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        bounded(self.deadline, "delete", self.inner.delete(key)).await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        bounded(self.deadline, "take", self.inner.take(key)).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        bounded(self.deadline, "expire", self.inner.expire(key, ttl)).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        bounded(self.deadline, "ttl", self.inner.ttl(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        bounded(self.deadline, "exists", self.inner.exists(key)).await
    }

    async fn incr(&self, key: &str, ttl: Duration) -> Result<Counter, StoreError> {
        bounded(self.deadline, "incr", self.inner.incr(key, ttl)).await
    }

    async fn set_add(
        &self,
        key: &str,
        member: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        bounded(self.deadline, "set_add", self.inner.set_add(key, member, ttl)).await
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        bounded(self.deadline, "set_remove", self.inner.set_remove(key, member)).await
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        bounded(self.deadline, "set_members", self.inner.set_members(key)).await
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        bounded(self.deadline, "purge_expired", self.inner.purge_expired()).await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        bounded(self.deadline, "ping", self.inner.ping()).await
    }
}

pub struct BoundedDurableStore {
    inner: Arc<dyn DurableStore>,
    deadline: Duration,
}

impl BoundedDurableStore {
    #[must_use]
    pub fn new(inner: Arc<dyn DurableStore>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }
}

#[async_trait]
impl DurableStore for BoundedDurableStore {
    async fn find_credentials(&self, email: &str) -> Result<Option<CredentialRecord>, StoreError> {
        bounded(
            self.deadline,
            "find_credentials",
            self.inner.find_credentials(email),
        )
        .await
    }

    async fn find_identity(&self, user_id: Uuid) -> Result<Option<Identity>, StoreError> {
        bounded(
            self.deadline,
            "find_identity",
            self.inner.find_identity(user_id),
        )
        .await
    }

    async fn update_password_hash(
        &self,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<bool, StoreError> {
        bounded(
            self.deadline,
            "update_password_hash",
            self.inner.update_password_hash(user_id, password_hash),
        )
        .await
    }

    async fn insert_refresh_token(&self, record: &RefreshTokenRecord) -> Result<(), StoreError> {
        bounded(
            self.deadline,
            "insert_refresh_token",
            self.inner.insert_refresh_token(record),
        )
        .await
    }

    async fn find_refresh_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<RefreshTokenRecord>, StoreError> {
        bounded(
            self.deadline,
            "find_refresh_token",
            self.inner.find_refresh_token(token_hash),
        )
        .await
    }

    async fn delete_refresh_token(&self, token_hash: &str) -> Result<bool, StoreError> {
        bounded(
            self.deadline,
            "delete_refresh_token",
            self.inner.delete_refresh_token(token_hash),
        )
        .await
    }

    async fn delete_refresh_tokens_for(&self, subject_id: Uuid) -> Result<Vec<String>, StoreError> {
        bounded(
            self.deadline,
            "delete_refresh_tokens_for",
            self.inner.delete_refresh_tokens_for(subject_id),
        )
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        bounded(self.deadline, "ping", self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryVolatileStore;

    struct StalledStore;

    #[async_trait]
    impl VolatileStore for StalledStore {
        async fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(None)
        }
        async fn set(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            Ok(())
        }
        async fn replace(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn delete(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn take(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn expire(&self, _: &str, _: Duration) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn ttl(&self, _: &str) -> Result<Option<Duration>, StoreError> {
            Ok(None)
        }
        async fn exists(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn incr(&self, _: &str, ttl: Duration) -> Result<Counter, StoreError> {
            Ok(Counter { value: 1, ttl })
        }
        async fn set_add(&self, _: &str, _: &str, _: Option<Duration>) -> Result<(), StoreError> {
            Ok(())
        }
        async fn set_remove(&self, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn set_members(&self, _: &str) -> Result<Vec<String>, StoreError> {
            Ok(Vec::new())
        }
        async fn purge_expired(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_become_timeouts() {
        let store = BoundedVolatileStore::new(Arc::new(StalledStore), Duration::from_millis(50));
        let result = store.get("anything").await;
        assert!(matches!(result, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() -> Result<(), StoreError> {
        let store = BoundedVolatileStore::new(
            Arc::new(MemoryVolatileStore::default()),
            Duration::from_secs(1),
        );
        store.set("k", "v", None).await?;
        assert_eq!(store.get("k").await?, Some("v".to_string()));
        Ok(())
    }
}
