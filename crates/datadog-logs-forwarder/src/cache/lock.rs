// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TTL bounded mutual exclusion over a cache refresh, stored as an object.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::cache::now_secs;
use crate::cache::store::{ObjectStore, StoredObject};
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    pub ttl: Duration,
    pub max_attempts: u32,
    pub retry_interval: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_attempts: 1,
            retry_interval: Duration::from_millis(200),
        }
    }
}

/// A held lock. Dropping it does not release anything; call [`release`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributedLock {
    pub lock_key: String,
    pub holder_token: String,
    pub acquired_at: u64,
    pub ttl: Duration,
}

#[derive(Debug)]
pub enum LockAcquisition {
    Acquired(DistributedLock),
    /// Another holder owns an unexpired lock.
    Denied,
    Error(StoreError),
}

#[derive(Debug, Serialize, Deserialize)]
struct LockRecord {
    holder_token: String,
    acquired_at: u64,
    ttl_secs: u64,
}

fn is_expired(object: &StoredObject, ttl: Duration, now: u64) -> bool {
    match serde_json::from_slice::<LockRecord>(&object.body) {
        Ok(record) => record.acquired_at.saturating_add(record.ttl_secs) <= now,
        // unreadable lock: fall back to the object timestamp
        Err(_) => object.last_modified.saturating_add(ttl.as_secs()) <= now,
    }
}

fn holder_of(object: &StoredObject) -> Option<String> {
    serde_json::from_slice::<LockRecord>(&object.body)
        .ok()
        .map(|record| record.holder_token)
}

async fn try_acquire(
    store: &dyn ObjectStore,
    bucket: &str,
    lock_key: &str,
    ttl: Duration,
) -> Result<Option<DistributedLock>, StoreError> {
    let now = now_secs();
    let lock = DistributedLock {
        lock_key: lock_key.to_string(),
        holder_token: Uuid::new_v4().to_string(),
        acquired_at: now,
        ttl,
    };
    let body = serde_json::to_vec(&LockRecord {
        holder_token: lock.holder_token.clone(),
        acquired_at: lock.acquired_at,
        ttl_secs: ttl.as_secs(),
    })?;

    let written = match store.get(bucket, lock_key).await? {
        None => store.put_if_absent(bucket, lock_key, body).await?,
        Some(existing) if is_expired(&existing, ttl, now) => {
            debug!("Reclaiming expired lock {lock_key}");
            // Fails when another invocation rewrote the lock since we read it.
            store
                .put_if_matches(bucket, lock_key, body, existing.generation)
                .await?
        }
        Some(_) => false,
    };
    Ok(written.then_some(lock))
}

/// Tries to take the lock at most `max_attempts` times, sleeping
/// `retry_interval` between attempts. Store failures end the attempt loop.
pub async fn acquire(
    store: &dyn ObjectStore,
    bucket: &str,
    lock_key: &str,
    options: &LockOptions,
) -> LockAcquisition {
    let max_attempts = options.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        match try_acquire(store, bucket, lock_key, options.ttl).await {
            Ok(Some(lock)) => return LockAcquisition::Acquired(lock),
            Ok(None) => {
                debug!("Lock {lock_key} is held, attempt {attempt}/{max_attempts}");
                if attempt < max_attempts {
                    tokio::time::sleep(options.retry_interval).await;
                }
            }
            Err(e) => return LockAcquisition::Error(e),
        }
    }
    LockAcquisition::Denied
}

/// Deletes the lock if it is still ours. Returns whether it was deleted; a
/// lock reclaimed by someone else after expiry is left alone.
pub async fn release(
    store: &dyn ObjectStore,
    bucket: &str,
    lock: &DistributedLock,
) -> Result<bool, StoreError> {
    match store.get(bucket, &lock.lock_key).await? {
        Some(object) if holder_of(&object).as_deref() == Some(lock.holder_token.as_str()) => {
            store.delete(bucket, &lock.lock_key).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::store::InMemoryObjectStore;

    /// Serves one remembered read before delegating, like an invocation
    /// that looked at the lock before another one rewrote it.
    struct OutdatedReadStore {
        inner: Arc<InMemoryObjectStore>,
        first_read: Mutex<Option<StoredObject>>,
    }

    #[async_trait]
    impl ObjectStore for OutdatedReadStore {
        async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
            let remembered = self.first_read.lock().unwrap().take();
            match remembered {
                Some(object) => Ok(Some(object)),
                None => self.inner.get(bucket, key).await,
            }
        }
        async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
            self.inner.put(bucket, key, body).await
        }
        async fn put_if_absent(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
        ) -> Result<bool, StoreError> {
            self.inner.put_if_absent(bucket, key, body).await
        }
        async fn put_if_matches(
            &self,
            bucket: &str,
            key: &str,
            body: Vec<u8>,
            generation: u64,
        ) -> Result<bool, StoreError> {
            self.inner.put_if_matches(bucket, key, body, generation).await
        }
        async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
            self.inner.delete(bucket, key).await
        }
    }

    fn expired_lock_body() -> Vec<u8> {
        serde_json::to_vec(&LockRecord {
            holder_token: "crashed-holder".to_string(),
            acquired_at: now_secs() - 120,
            ttl_secs: 60,
        })
        .unwrap()
    }

    const BUCKET: &str = "forwarder-bucket";
    const KEY: &str = "cache/123456789012/us-east-1/lambda.lock";

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = InMemoryObjectStore::new();
        let options = LockOptions::default();

        let LockAcquisition::Acquired(lock) = acquire(&store, BUCKET, KEY, &options).await else {
            panic!("lock should be free");
        };
        assert_eq!(lock.lock_key, KEY);
        assert_eq!(lock.ttl, Duration::from_secs(60));
        assert!(store.contains(BUCKET, KEY).await);

        assert!(matches!(
            acquire(&store, BUCKET, KEY, &options).await,
            LockAcquisition::Denied
        ));

        assert!(release(&store, BUCKET, &lock).await.unwrap());
        assert!(!store.contains(BUCKET, KEY).await);
        assert!(matches!(
            acquire(&store, BUCKET, KEY, &options).await,
            LockAcquisition::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_is_reclaimed() {
        let store = InMemoryObjectStore::new();
        store
            .insert(BUCKET, KEY, expired_lock_body(), now_secs() - 120)
            .await;

        let LockAcquisition::Acquired(lock) =
            acquire(&store, BUCKET, KEY, &LockOptions::default()).await
        else {
            panic!("expired lock should be reclaimed");
        };
        assert_ne!(lock.holder_token, "crashed-holder");
    }

    #[tokio::test]
    async fn test_unreadable_lock_uses_object_timestamp() {
        let store = InMemoryObjectStore::new();
        store.insert(BUCKET, KEY, b"garbage".to_vec(), now_secs()).await;
        assert!(matches!(
            acquire(&store, BUCKET, KEY, &LockOptions::default()).await,
            LockAcquisition::Denied
        ));

        store
            .insert(BUCKET, KEY, b"garbage".to_vec(), now_secs() - 3600)
            .await;
        assert!(matches!(
            acquire(&store, BUCKET, KEY, &LockOptions::default()).await,
            LockAcquisition::Acquired(_)
        ));
    }

    #[tokio::test]
    async fn test_bounded_retries_when_held() {
        let store = InMemoryObjectStore::new();
        let options = LockOptions {
            ttl: Duration::from_secs(60),
            max_attempts: 3,
            retry_interval: Duration::from_millis(10),
        };
        let LockAcquisition::Acquired(_held) = acquire(&store, BUCKET, KEY, &options).await else {
            panic!("lock should be free");
        };

        let started = std::time::Instant::now();
        assert!(matches!(
            acquire(&store, BUCKET, KEY, &options).await,
            LockAcquisition::Denied
        ));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_release_leaves_foreign_lock() {
        let store = InMemoryObjectStore::new();
        let LockAcquisition::Acquired(mut lock) =
            acquire(&store, BUCKET, KEY, &LockOptions::default()).await
        else {
            panic!("lock should be free");
        };
        lock.holder_token = "someone-else".to_string();

        assert!(!release(&store, BUCKET, &lock).await.unwrap());
        assert!(store.contains(BUCKET, KEY).await);
    }

    #[tokio::test]
    async fn test_concurrent_reclaim_has_single_holder() {
        let store = Arc::new(InMemoryObjectStore::new());
        store
            .insert(BUCKET, KEY, expired_lock_body(), now_secs() - 120)
            .await;
        let expired = store.get(BUCKET, KEY).await.unwrap();

        let LockAcquisition::Acquired(first) =
            acquire(store.as_ref(), BUCKET, KEY, &LockOptions::default()).await
        else {
            panic!("expired lock should be reclaimed");
        };

        let late_reader = OutdatedReadStore {
            inner: store.clone(),
            first_read: Mutex::new(expired),
        };
        assert!(matches!(
            acquire(&late_reader, BUCKET, KEY, &LockOptions::default()).await,
            LockAcquisition::Denied
        ));

        let stored = store.get(BUCKET, KEY).await.unwrap().unwrap();
        assert_eq!(holder_of(&stored), Some(first.holder_token.clone()));
        assert!(release(store.as_ref(), BUCKET, &first).await.unwrap());
    }

    #[test]
    fn test_holder_tokens_are_unique() {
        let tokens: std::collections::HashSet<String> =
            (0..100).map(|_| Uuid::new_v4().to_string()).collect();
        assert_eq!(tokens.len(), 100);
    }
}
