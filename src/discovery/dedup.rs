//! Recently-analyzed token cache
//!
//! Addresses handed out by a discovery cycle are remembered for a TTL so
//! the next cycles surface fresh tokens. The cache is persisted so a
//! restart does not immediately re-analyze everything.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::store::PersistentStore;

/// Store key of the dedup cache document
pub const DEDUP_STORAGE_KEY: &str = "dedup_cache";

/// Default time an address stays "recently analyzed"
pub const DEFAULT_DEDUP_TTL_MINUTES: i64 = 45;

#[derive(Debug, Default, Serialize, Deserialize)]
struct DedupDocument {
    #[serde(default)]
    entries: HashMap<String, DateTime<Utc>>,
}

/// TTL set of recently analyzed addresses
///
/// Reads are lock-free; writes are only issued by the orchestrator while
/// it holds its cycle lock.
pub struct DedupCache {
    entries: DashMap<String, DateTime<Utc>>,
    ttl: Duration,
    store: Arc<dyn PersistentStore>,
    flushes: TaskTracker,
}

impl DedupCache {
    pub fn new(ttl: Duration, store: Arc<dyn PersistentStore>, flushes: TaskTracker) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            store,
            flushes,
        }
    }

    /// Load persisted entries, dropping expired ones
    pub async fn load(ttl: Duration, store: Arc<dyn PersistentStore>, flushes: TaskTracker) -> Self {
        let cache = Self::new(ttl, store, flushes);
        let now = Utc::now();

        match cache.store.load(DEDUP_STORAGE_KEY).await {
            Ok(Some(value)) => match serde_json::from_value::<DedupDocument>(value) {
                Ok(document) => {
                    for (address, at) in document.entries {
                        if now - at < ttl {
                            cache.entries.insert(address, at);
                        }
                    }
                    info!(entries = cache.entries.len(), "Loaded dedup cache");
                }
                Err(e) => warn!(error = %e, "Corrupt dedup cache, starting empty"),
            },
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read dedup cache, starting empty"),
        }

        cache
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn contains(&self, address: &str) -> bool {
        self.contains_at(address, Utc::now())
    }

    /// Whether `address` was analyzed within the TTL before `now`
    pub fn contains_at(&self, address: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(address)
            .map(|at| now - *at.value() < self.ttl)
            .unwrap_or(false)
    }

    pub fn insert(&self, address: &str) {
        self.insert_at(address, Utc::now());
    }

    pub fn insert_at(&self, address: &str, now: DateTime<Utc>) {
        self.entries.insert(address.to_string(), now);
    }

    /// Drop expired entries
    pub fn purge(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, at| now - *at < self.ttl);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        let removed = self.entries.len();
        self.entries.clear();
        debug!(removed, "Cleared dedup cache");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the cache on the flush tracker and wait for it
    pub async fn persist(&self) {
        let document = DedupDocument {
            entries: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        };
        let value = match serde_json::to_value(&document) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to serialize dedup cache");
                return;
            }
        };

        let store = self.store.clone();
        let handle = self.flushes.spawn(async move {
            if let Err(e) = store.save(DEDUP_STORAGE_KEY, &value).await {
                warn!(error = %e, "Failed to persist dedup cache");
            }
        });
        if let Err(e) = handle.await {
            warn!(error = %e, "Dedup flush task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn cache(store: Arc<MemoryStore>) -> DedupCache {
        DedupCache::new(
            Duration::minutes(DEFAULT_DEDUP_TTL_MINUTES),
            store,
            TaskTracker::new(),
        )
    }

    #[test]
    fn test_ttl_expiry() {
        let c = cache(Arc::new(MemoryStore::new()));
        let t0 = Utc::now();
        c.insert_at("a", t0);

        assert!(c.contains_at("a", t0 + Duration::minutes(44)));
        assert!(!c.contains_at("a", t0 + Duration::minutes(45)));
        assert!(!c.contains_at("b", t0));

        assert_eq!(c.purge(t0 + Duration::hours(1)), 1);
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_persist_and_reload_drops_expired() {
        let store = Arc::new(MemoryStore::new());
        let c = cache(store.clone());
        c.insert("fresh");
        c.insert_at("stale", Utc::now() - Duration::hours(2));
        c.persist().await;

        let reloaded = DedupCache::load(
            Duration::minutes(DEFAULT_DEDUP_TTL_MINUTES),
            store,
            TaskTracker::new(),
        )
        .await;
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("fresh"));
    }

    #[test]
    fn test_clear() {
        let c = cache(Arc::new(MemoryStore::new()));
        c.insert("x");
        c.insert("y");
        c.clear();
        assert!(c.is_empty());
    }
}
