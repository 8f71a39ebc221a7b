// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-invocation resource tags cache.
//!
//! Each [`CacheType`] owns one JSON snapshot in the object store, keyed by
//! account and region, holding the tags of every resource of that type.
//! Reads serve the snapshot while it is fresh. A stale or missing snapshot
//! is rebuilt by whichever invocation wins the [`lock`]; everyone else keeps
//! serving what was last written, or nothing on a cold start.
//!
//! Enrichment is best effort: no failure in here reaches the caller. Store,
//! lock and fetch failures are logged and counted through the
//! [`MetricsSink`].

pub mod fetcher;
pub mod lock;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::metrics::{self, MetricsSink};

use fetcher::TagFetcher;
use lock::{LockAcquisition, LockOptions};
use store::ObjectStore;

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
    Lambda,
    LogGroup,
    StepFunctions,
}

impl CacheType {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            CacheType::Lambda => "lambda",
            CacheType::LogGroup => "log-group",
            CacheType::StepFunctions => "step-functions",
        }
    }

    /// `<dirname>/<account>/<region>/<name>.json`
    #[must_use]
    pub fn snapshot_key(self, dirname: &str, account: &str, region: &str) -> String {
        format!("{dirname}/{account}/{region}/{}.json", self.name())
    }

    #[must_use]
    pub fn lock_key(self, dirname: &str, account: &str, region: &str) -> String {
        format!("{dirname}/{account}/{region}/{}.lock", self.name())
    }
}

#[derive(Debug, Clone)]
pub struct TagsCacheConfig {
    pub enabled: bool,
    pub bucket: String,
    pub dirname: String,
    pub account: String,
    pub region: String,
    /// Age after which a snapshot is rebuilt.
    pub ttl: Duration,
    pub lock: LockOptions,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    last_fetched_at: u64,
    tags_by_id: HashMap<String, Vec<String>>,
}

type TagsById = Arc<HashMap<String, Vec<String>>>;

pub struct TagsCache {
    cache_type: CacheType,
    config: TagsCacheConfig,
    store: Arc<dyn ObjectStore>,
    fetcher: Arc<dyn TagFetcher>,
    metrics: Arc<dyn MetricsSink>,
    loaded: Mutex<Option<TagsById>>,
}

impl TagsCache {
    pub fn new(
        cache_type: CacheType,
        config: TagsCacheConfig,
        store: Arc<dyn ObjectStore>,
        fetcher: Arc<dyn TagFetcher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            cache_type,
            config,
            store,
            fetcher,
            metrics,
            loaded: Mutex::new(None),
        }
    }

    /// Tags of `resource_key`, matched case-insensitively. Unknown resources
    /// and disabled caches return an empty list.
    pub async fn get(&self, resource_key: &str) -> Vec<String> {
        if !self.config.enabled {
            return Vec::new();
        }
        self.tags_by_id()
            .await
            .get(&resource_key.to_lowercase())
            .cloned()
            .unwrap_or_default()
    }

    /// The snapshot is resolved once per instance.
    async fn tags_by_id(&self) -> TagsById {
        let mut loaded = self.loaded.lock().await;
        if let Some(tags_by_id) = loaded.as_ref() {
            return Arc::clone(tags_by_id);
        }
        let tags_by_id = Arc::new(self.load_or_refresh().await);
        *loaded = Some(Arc::clone(&tags_by_id));
        tags_by_id
    }

    fn snapshot_key(&self) -> String {
        self.cache_type
            .snapshot_key(&self.config.dirname, &self.config.account, &self.config.region)
    }

    fn lock_key(&self) -> String {
        self.cache_type
            .lock_key(&self.config.dirname, &self.config.account, &self.config.region)
    }

    fn count(&self, name: &str) {
        self.metrics
            .increment(name, &[format!("cache_type:{}", self.cache_type.name())]);
    }

    fn is_fresh(&self, snapshot: &Snapshot) -> bool {
        now_secs().saturating_sub(snapshot.last_fetched_at) < self.config.ttl.as_secs()
    }

    async fn read_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        let Some(object) = self
            .store
            .get(&self.config.bucket, &self.snapshot_key())
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&object.body)?))
    }

    async fn write_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let body = serde_json::to_vec(snapshot)?;
        self.store
            .put(&self.config.bucket, &self.snapshot_key(), body)
            .await
    }

    async fn load_or_refresh(&self) -> HashMap<String, Vec<String>> {
        let previous = match self.read_snapshot().await {
            Ok(Some(snapshot)) if self.is_fresh(&snapshot) => return snapshot.tags_by_id,
            Ok(Some(snapshot)) => {
                debug!("{} tags cache expired", self.cache_type.name());
                self.count(metrics::S3_CACHE_EXPIRED);
                snapshot.tags_by_id
            }
            Ok(None) => {
                debug!("{} tags cache is empty", self.cache_type.name());
                HashMap::new()
            }
            Err(e) => {
                warn!("Failed to read {} tags cache: {e}", self.cache_type.name());
                self.count(metrics::S3_CACHE_FETCH_FAILURE);
                HashMap::new()
            }
        };

        match lock::acquire(
            self.store.as_ref(),
            &self.config.bucket,
            &self.lock_key(),
            &self.config.lock,
        )
        .await
        {
            LockAcquisition::Acquired(held) => {
                self.count(metrics::S3_CACHE_LOCK_ACQUIRED);
                // the previous holder may have rebuilt it while we waited
                let tags_by_id = match self.read_snapshot().await {
                    Ok(Some(snapshot)) if self.is_fresh(&snapshot) => snapshot.tags_by_id,
                    _ => self.refresh(previous).await,
                };
                match lock::release(self.store.as_ref(), &self.config.bucket, &held).await {
                    Ok(true) => self.count(metrics::S3_CACHE_LOCK_RELEASED),
                    Ok(false) => {
                        debug!("{} cache lock was taken over before release", self.cache_type.name());
                    }
                    Err(e) => {
                        warn!("Failed to release {} cache lock: {e}", self.cache_type.name());
                        self.count(metrics::S3_CACHE_LOCK_RELEASE_FAILURE);
                    }
                }
                tags_by_id
            }
            LockAcquisition::Denied => {
                debug!(
                    "{} cache lock held elsewhere, serving last snapshot",
                    self.cache_type.name()
                );
                previous
            }
            LockAcquisition::Error(e) => {
                warn!("Failed to acquire {} cache lock: {e}", self.cache_type.name());
                previous
            }
        }
    }

    async fn refresh(
        &self,
        previous: HashMap<String, Vec<String>>,
    ) -> HashMap<String, Vec<String>> {
        let tags_by_id: HashMap<String, Vec<String>> = match self.fetcher.fetch_all().await {
            Ok(fetched) => fetched
                .into_iter()
                .map(|(id, tags)| (id.to_lowercase(), tags))
                .collect(),
            Err(e) => {
                warn!("Failed to fetch {} tags: {e}", self.cache_type.name());
                self.count(metrics::TAGS_FETCH_FAILURE);
                return previous;
            }
        };

        let snapshot = Snapshot {
            last_fetched_at: now_secs(),
            tags_by_id,
        };
        if let Err(e) = self.write_snapshot(&snapshot).await {
            warn!("Failed to write {} tags cache: {e}", self.cache_type.name());
            self.count(metrics::S3_CACHE_WRITE_FAILURE);
        }
        snapshot.tags_by_id
    }
}
