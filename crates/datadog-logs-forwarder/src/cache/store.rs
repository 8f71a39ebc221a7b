// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Object storage seam used for log objects, cache snapshots and locks.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::cache::now_secs;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    /// Unix seconds of the last write.
    pub last_modified: u64,
    /// Changes on every write to the key, like an S3 ETag.
    pub generation: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Reads an object. A missing object is `Ok(None)`, not an error.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError>;

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError>;

    /// Writes only when no object exists under `key`. Returns whether the
    /// write happened.
    async fn put_if_absent(&self, bucket: &str, key: &str, body: Vec<u8>)
        -> Result<bool, StoreError>;

    /// Overwrites `key` only when its current generation is `generation`.
    /// Returns whether the write happened; a missing object never matches.
    async fn put_if_matches(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        generation: u64,
    ) -> Result<bool, StoreError>;

    /// Deleting a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

/// Process local store, used by tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<Objects>,
}

#[derive(Debug, Default)]
struct Objects {
    by_key: HashMap<(String, String), StoredObject>,
    last_generation: u64,
}

impl Objects {
    fn store(&mut self, bucket: &str, key: &str, body: Vec<u8>, last_modified: u64) {
        self.last_generation += 1;
        self.by_key.insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                last_modified,
                generation: self.last_generation,
            },
        );
    }
}

impl InMemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an object with an explicit modification time.
    pub async fn insert(&self, bucket: &str, key: &str, body: Vec<u8>, last_modified: u64) {
        self.objects
            .lock()
            .await
            .store(bucket, key, body, last_modified);
    }

    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .await
            .by_key
            .contains_key(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<StoredObject>, StoreError> {
        Ok(self
            .objects
            .lock()
            .await
            .by_key
            .get(&(bucket.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), StoreError> {
        self.insert(bucket, key, body, now_secs()).await;
        Ok(())
    }

    async fn put_if_absent(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<bool, StoreError> {
        let mut guard = self.objects.lock().await;
        let objects = &mut *guard;
        let generation = objects.last_generation + 1;
        match objects.by_key.entry((bucket.to_string(), key.to_string())) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(StoredObject {
                    body,
                    last_modified: now_secs(),
                    generation,
                });
                objects.last_generation = generation;
                Ok(true)
            }
        }
    }

    async fn put_if_matches(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        generation: u64,
    ) -> Result<bool, StoreError> {
        let mut objects = self.objects.lock().await;
        let current = objects
            .by_key
            .get(&(bucket.to_string(), key.to_string()))
            .map(|object| object.generation);
        if current != Some(generation) {
            return Ok(false);
        }
        objects.store(bucket, key, body, now_secs());
        Ok(true)
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.objects
            .lock()
            .await
            .by_key
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = InMemoryObjectStore::new();
        assert_eq!(store.get("bucket", "key").await.unwrap(), None);

        store.put("bucket", "key", b"body".to_vec()).await.unwrap();
        let object = store.get("bucket", "key").await.unwrap().unwrap();
        assert_eq!(object.body, b"body");
        assert!(object.last_modified > 0);
        assert_eq!(store.get("other-bucket", "key").await.unwrap(), None);

        store.delete("bucket", "key").await.unwrap();
        store.delete("bucket", "key").await.unwrap();
        assert!(!store.contains("bucket", "key").await);
    }

    #[tokio::test]
    async fn test_put_if_absent() {
        let store = InMemoryObjectStore::new();
        assert!(store.put_if_absent("bucket", "lock", b"first".to_vec()).await.unwrap());
        assert!(!store.put_if_absent("bucket", "lock", b"second".to_vec()).await.unwrap());
        assert_eq!(
            store.get("bucket", "lock").await.unwrap().unwrap().body,
            b"first"
        );
    }

    #[tokio::test]
    async fn test_put_if_matches_requires_current_generation() {
        let store = InMemoryObjectStore::new();
        assert!(!store
            .put_if_matches("bucket", "lock", b"body".to_vec(), 1)
            .await
            .unwrap());

        store.put("bucket", "lock", b"first".to_vec()).await.unwrap();
        let seen = store.get("bucket", "lock").await.unwrap().unwrap().generation;

        assert!(store
            .put_if_matches("bucket", "lock", b"second".to_vec(), seen)
            .await
            .unwrap());
        assert!(!store
            .put_if_matches("bucket", "lock", b"third".to_vec(), seen)
            .await
            .unwrap());

        let object = store.get("bucket", "lock").await.unwrap().unwrap();
        assert_eq!(object.body, b"second");
        assert_ne!(object.generation, seen);
    }
}
