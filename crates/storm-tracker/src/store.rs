//! Object store seam
//!
//! Keys are `/`-separated relative paths. Listings are sorted by key.

use crate::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Byte-oriented object storage
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys of all objects directly under `prefix`, sorted by name
    async fn list(&self, prefix: &str) -> PipelineResult<Vec<String>>;

    /// Object bytes; `PipelineError::NotFound` when the key does not exist
    async fn get(&self, key: &str) -> PipelineResult<Vec<u8>>;

    /// Create or replace an object
    async fn put(&self, key: &str, bytes: Vec<u8>) -> PipelineResult<()>;
}

/// Object store backed by a local directory tree
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, key: &str) -> PipelineResult<PathBuf> {
        let mut path = self.root.clone();
        for part in key.split('/').filter(|p| !p.is_empty()) {
            if part == "." || part == ".." {
                return Err(PipelineError::store(format!("invalid key '{}'", key)));
            }
            path.push(part);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn list(&self, prefix: &str) -> PipelineResult<Vec<String>> {
        let dir = self.path_of(prefix)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PipelineError::listing(prefix, e)),
        };

        let prefix = prefix.trim_matches('/');
        let mut keys = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PipelineError::listing(prefix, e))?
        {
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| PipelineError::listing(prefix, e))?;
            if !file_type.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            keys.push(if prefix.is_empty() {
                name
            } else {
                format!("{}/{}", prefix, name)
            });
        }

        keys.sort();
        trace!("Listed {} objects under {}", keys.len(), prefix);
        Ok(keys)
    }

    async fn get(&self, key: &str) -> PipelineResult<Vec<u8>> {
        let path = self.path_of(key)?;
        tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => PipelineError::not_found(key),
            _ => PipelineError::store(format!("{}: {}", key, e)),
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> PipelineResult<()> {
        let path = self.path_of(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PipelineError::store(format!("{}: {}", key, e)))?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::store(format!("{}: {}", key, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        store.put("a/b/c.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("a/b/c.txt").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_flat() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());

        for key in ["p/radar_0910.png", "p/radar_0900.png", "p/nested/x.png"] {
            store.put(key, vec![0]).await.unwrap();
        }

        let keys = store.list("p").await.unwrap();
        assert_eq!(keys, vec!["p/radar_0900.png", "p/radar_0910.png"]);
    }

    #[tokio::test]
    async fn test_missing_prefix_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(store.list("nothing/here").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store.get("gone.png").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_parent_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        assert!(matches!(
            store.get("../secret").await,
            Err(PipelineError::Store(_))
        ));
    }
}
