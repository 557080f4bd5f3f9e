//! `BlobStore` port (spec.md §6)
//!
//! Content-addressed key/value byte storage. The Response Cache's disk tier
//! and, if configured persistent, Conversation Memory are built on top of
//! this port; neither component assumes a specific backend.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// Errors a `BlobStore` implementation may raise.
#[derive(Debug, Error)]
pub enum BlobStoreError {
    /// The underlying I/O operation failed.
    #[error("blob store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-addressed byte storage port.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reads the bytes stored under `key`, or `None` if absent.
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError>;

    /// Writes `bytes` under `key`, overwriting any existing value.
    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError>;

    /// Deletes the value stored under `key`. Idempotent.
    async fn delete(&self, key: &str) -> Result<(), BlobStoreError>;

    /// Lists all keys starting with `prefix`.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError>;
}

/// In-memory `BlobStore`, used in tests and for the development profile.
#[derive(Default)]
pub struct InMemoryBlobStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    /// Creates an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        Ok(self.entries.lock().expect("poisoned lock").get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        self.entries
            .lock()
            .expect("poisoned lock")
            .insert(key.to_string(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        self.entries.lock().expect("poisoned lock").remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        Ok(self
            .entries
            .lock()
            .expect("poisoned lock")
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Filesystem-backed `BlobStore`: one file per key under a root directory.
///
/// Keys are sanitised to a single path segment so a malicious or malformed
/// fingerprint cannot escape `root` via `..` traversal.
pub struct FilesystemBlobStore {
    root: PathBuf,
}

impl FilesystemBlobStore {
    /// Creates a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Returns an error if `root` cannot be created.
    pub fn new(root: PathBuf) -> Result<Self, BlobStoreError> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let sanitized: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(sanitized)
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn read(&self, key: &str) -> Result<Option<Vec<u8>>, BlobStoreError> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError> {
        let path = self.path_for(key);
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BlobStoreError> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BlobStoreError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    keys.push(name.to_string());
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryBlobStore::new();
        store.write("k1", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.read("k1").await.unwrap(), Some(b"hello".to_vec()));
        store.delete("k1").await.unwrap();
        assert_eq!(store.read("k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn filesystem_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path().to_path_buf()).unwrap();
        store.write("fingerprint-1", b"cached".to_vec()).await.unwrap();
        assert_eq!(
            store.read("fingerprint-1").await.unwrap(),
            Some(b"cached".to_vec())
        );
        let listed = store.list("fingerprint").await.unwrap();
        assert_eq!(listed, vec!["fingerprint-1".to_string()]);
    }
}
