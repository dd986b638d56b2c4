//! Persistent key-value storage ports
//!
//! The sandbox keeps its durable state the way a browser keeps local storage:
//! string values under fixed keys. [`MemoryStore`] is used by tests and embedded
//! sessions, [`JsonFileStore`] keeps every key in one JSON object on disk.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, RwLock};

use crate::error::{AtelierError, Result};
use crate::tree::FileTree;

/// Storage key of the serialized file tree
pub const TREE_STORAGE_KEY: &str = "atelier-structure";

/// Storage key of the photo album
pub const ALBUM_STORAGE_KEY: &str = "atelier-album";

/// Durable string storage addressed by key
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Load the persisted tree, if any
pub async fn load_tree(store: &dyn KeyValueStore) -> Result<Option<FileTree>> {
    match store.get(TREE_STORAGE_KEY).await? {
        Some(json) => Ok(Some(FileTree::from_json(&json)?)),
        None => Ok(None),
    }
}

/// Persist the tree under [`TREE_STORAGE_KEY`]
pub async fn save_tree(store: &dyn KeyValueStore, tree: &FileTree) -> Result<()> {
    let json = tree.to_json()?;
    store.set(TREE_STORAGE_KEY, json).await
}

/// In-memory store with an optional byte quota over all keys and values
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
    quota: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota: None,
        }
    }

    /// Create a store that rejects writes once keys and values exceed `quota` bytes
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quota: Some(quota),
        }
    }

    /// Number of stored keys
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let mut entries = self.entries.write().await;

        if let Some(quota) = self.quota {
            let others: usize = entries
                .iter()
                .filter(|(existing, _)| existing.as_str() != key)
                .map(|(k, v)| k.len() + v.len())
                .sum();
            let needed = others + key.len() + value.len();
            if needed > quota {
                return Err(AtelierError::QuotaExceeded { needed, quota });
            }
        }

        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file
pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => serde_json::from_str(&content).map_err(|e| {
                AtelierError::storage(format!(
                    "Failed to parse storage file {}: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(AtelierError::storage(format!(
                "Failed to read storage file {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    async fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(entries)?;
        let temp_path = self.path.with_extension("json.tmp");

        tokio::fs::write(&temp_path, content).await.map_err(|e| {
            AtelierError::storage(format!(
                "Failed to write storage file {}: {}",
                temp_path.display(),
                e
            ))
        })?;
        tokio::fs::rename(&temp_path, &self.path).await?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), value);
        self.write_all(&entries).await?;
        tracing::trace!("Stored key {} in {}", key, self.path.display());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.read_all().await?;
        if entries.remove(key).is_some() {
            self.write_all(&entries).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::FileNode;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_memory_store_quota() {
        let store = MemoryStore::with_quota(32);

        store.set("k", "small".to_string()).await.unwrap();
        let err = store.set("big", "x".repeat(64)).await.unwrap_err();
        assert!(matches!(err, AtelierError::QuotaExceeded { quota: 32, .. }));

        // replacing a value only counts the new value
        store.set("k", "y".repeat(30)).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_tree_round_trip_through_file_store() {
        let dir = tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested").join("storage.json"));

        assert!(load_tree(&store).await.unwrap().is_none());

        let tree = FileTree::from_nodes(vec![FileNode::folder(
            "a",
            vec![FileNode::folder(
                "b",
                vec![FileNode::folder("c", vec![FileNode::file("d.txt", "deep")])],
            )],
        )]);
        save_tree(&store, &tree).await.unwrap();
        store.set(ALBUM_STORAGE_KEY, "[]".to_string()).await.unwrap();

        let reopened = JsonFileStore::new(store.path().to_path_buf());
        assert_eq!(load_tree(&reopened).await.unwrap(), Some(tree));
        assert_eq!(
            reopened.get(ALBUM_STORAGE_KEY).await.unwrap().as_deref(),
            Some("[]")
        );

        reopened.remove(ALBUM_STORAGE_KEY).await.unwrap();
        assert!(reopened.get(ALBUM_STORAGE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("storage.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let store = JsonFileStore::new(path);
        assert!(matches!(
            store.get(TREE_STORAGE_KEY).await,
            Err(AtelierError::Storage(_))
        ));
    }
}
