//! Permanent token blocklist
//!
//! Tokens that fail a critical safety check are blocked for good. Entries
//! survive restarts and are only removed by an explicit clear.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::store::PersistentStore;

/// Store key of the blocklist document
pub const BLOCKLIST_STORAGE_KEY: &str = "blocklist";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlocklistEntry {
    pub reason: String,
    pub added_at: DateTime<Utc>,
}

/// Blocklisted token identifiers
pub struct Blocklist {
    entries: RwLock<HashMap<String, BlocklistEntry>>,
    store: Arc<dyn PersistentStore>,
    flushes: TaskTracker,
}

impl Blocklist {
    pub fn new(store: Arc<dyn PersistentStore>, flushes: TaskTracker) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
            flushes,
        }
    }

    /// Load persisted entries; unreadable storage yields an empty list
    pub async fn load(store: Arc<dyn PersistentStore>, flushes: TaskTracker) -> Self {
        let blocklist = Self::new(store, flushes);

        match blocklist.store.load(BLOCKLIST_STORAGE_KEY).await {
            Ok(Some(value)) => {
                match serde_json::from_value::<HashMap<String, BlocklistEntry>>(value) {
                    Ok(entries) => {
                        info!(entries = entries.len(), "Loaded blocklist");
                        *blocklist.entries.write().await = entries;
                    }
                    Err(e) => warn!(error = %e, "Corrupt blocklist, starting empty"),
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to read blocklist, starting empty"),
        }

        blocklist
    }

    pub async fn contains(&self, token: &str) -> bool {
        self.entries.read().await.contains_key(token)
    }

    pub async fn get(&self, token: &str) -> Option<BlocklistEntry> {
        self.entries.read().await.get(token).cloned()
    }

    /// Block a token; returns false if it was already blocked
    pub async fn add(&self, token: &str, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let mut entries = self.entries.write().await;
        if entries.contains_key(token) {
            return false;
        }
        warn!(token = %token, reason = %reason, "Token blocklisted");
        entries.insert(
            token.to_string(),
            BlocklistEntry {
                reason,
                added_at: Utc::now(),
            },
        );
        self.persist(&entries).await;
        true
    }

    /// Remove every entry; returns how many were removed
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.write().await;
        let removed = entries.len();
        entries.clear();
        self.persist(&entries).await;
        info!(removed, "Blocklist cleared");
        removed
    }

    /// Entries sorted by when they were added
    pub async fn list(&self) -> Vec<(String, BlocklistEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        entries.sort_by(|a, b| a.1.added_at.cmp(&b.1.added_at));
        entries
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    // Called with the write lock held so writes land in order
    async fn persist(&self, entries: &HashMap<String, BlocklistEntry>) {
        let value = match serde_json::to_value(entries) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Failed to serialize blocklist");
                return;
            }
        };

        let store = self.store.clone();
        let handle = self.flushes.spawn(async move {
            if let Err(e) = store.save(BLOCKLIST_STORAGE_KEY, &value).await {
                warn!(error = %e, "Failed to persist blocklist");
            }
        });
        if let Err(e) = handle.await {
            warn!(error = %e, "Blocklist flush task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{JsonFileStore, MemoryStore};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_add_and_contains() {
        let blocklist = Blocklist::new(Arc::new(MemoryStore::new()), TaskTracker::new());
        assert!(blocklist.add("rug", "critical risk").await);
        assert!(!blocklist.add("rug", "again").await);

        assert!(blocklist.contains("rug").await);
        assert_eq!(blocklist.get("rug").await.unwrap().reason, "critical risk");
        assert_eq!(blocklist.len().await, 1);
    }

    #[tokio::test]
    async fn test_survives_restart() {
        let dir = tempdir().unwrap();
        let store = Arc::new(JsonFileStore::new(dir.path()));

        let blocklist = Blocklist::load(store.clone(), TaskTracker::new()).await;
        blocklist.add("scam1", "scam flag").await;
        blocklist.add("scam2", "scam flag").await;

        let reloaded = Blocklist::load(store, TaskTracker::new()).await;
        let listed: Vec<_> = reloaded.list().await.into_iter().map(|(k, _)| k).collect();
        assert_eq!(listed.len(), 2);
        assert!(reloaded.contains("scam1").await);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = Arc::new(MemoryStore::new());
        let blocklist = Blocklist::new(store.clone(), TaskTracker::new());
        blocklist.add("a", "x").await;
        assert_eq!(blocklist.clear().await, 1);
        assert!(blocklist.is_empty().await);
        assert_eq!(store.get(BLOCKLIST_STORAGE_KEY), Some(serde_json::json!({})));
    }
}
