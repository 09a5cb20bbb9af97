//! Key-value document persistence
//!
//! Ledgers, the dedup cache, the blocklist and alert records are stored as
//! whole JSON documents under string keys. The core only depends on the
//! `PersistentStore` trait; two backends are provided here.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};

/// Document store used for all durable state
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load the document stored under `key`, `None` when absent
    async fn load(&self, key: &str) -> Result<Option<Value>>;

    /// Replace the document stored under `key`
    async fn save(&self, key: &str, document: &Value) -> Result<()>;
}

/// Stores each key as `<root>/<key>.json`
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Create a store rooted at `root` (created on first save)
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Root directory of the store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(format!("{}.json", file))
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.path_for(key);
        if !tokio::fs::try_exists(&path)
            .await
            .map_err(|e| Error::persistence(key, e))?
        {
            return Ok(None);
        }

        let data = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::persistence(key, e))?;
        let document = serde_json::from_str(&data).map_err(|e| Error::persistence(key, e))?;

        debug!(key = %key, path = %path.display(), "Loaded document");
        Ok(Some(document))
    }

    async fn save(&self, key: &str, document: &Value) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::persistence(key, e))?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_string_pretty(document).map_err(|e| Error::persistence(key, e))?;

        // Write then rename; readers never see a partial document
        tokio::fs::write(&tmp, data)
            .await
            .map_err(|e| Error::persistence(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| Error::persistence(key, e))?;

        debug!(key = %key, path = %path.display(), "Saved document");
        Ok(())
    }
}

/// In-process store, used for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    documents: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a raw document (e.g. to simulate corrupt storage)
    pub fn insert_raw(&self, key: &str, document: Value) {
        self.documents.insert(key.to_string(), document);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.documents.get(key).map(|d| d.value().clone())
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get(key))
    }

    async fn save(&self, key: &str, document: &Value) -> Result<()> {
        self.documents.insert(key.to_string(), document.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_file_store_missing_key() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_file_store_save_and_load() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state"));

        assert_ok!(
            store
                .save("appearances/volume_surge", &json!({"records": {}}))
                .await
        );

        let loaded = store.load("appearances/volume_surge").await.unwrap();
        assert_eq!(loaded, Some(json!({"records": {}})));
        assert!(dir
            .path()
            .join("state")
            .join("appearances_volume_surge.json")
            .exists());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_document() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        std::fs::write(dir.path().join("blocklist.json"), "{ not json").unwrap();

        let err = assert_err!(store.load("blocklist").await);
        assert!(matches!(err, Error::Persistence { .. }));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        assert_ok!(store.save("k", &json!([1, 2, 3])).await);
        assert_eq!(store.load("k").await.unwrap(), Some(json!([1, 2, 3])));
        assert_eq!(store.len(), 1);
    }
}
