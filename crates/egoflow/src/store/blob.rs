//! Blob store backends.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::fs;
use tracing::{debug, warn};

use super::{BlobStore, StorageError, StorageResult};

/// Blobs stored as files under a root directory, one file per key.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(key);
        let single_file = relative.components().count() == 1
            && matches!(relative.components().next(), Some(Component::Normal(_)));
        if key.is_empty() || !single_file {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, key: &str, mime_type: &str, data: Bytes) -> StorageResult<()> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::blob_io(&self.root, e))?;
        fs::write(&path, &data)
            .await
            .map_err(|e| StorageError::blob_io(&path, e))?;
        debug!(key, mime_type, size = data.len(), "Stored blob");
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::not_found("blob", key)),
            Err(e) => Err(StorageError::blob_io(path, e)),
        }
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            let path = match self.path_for(key) {
                Ok(path) => path,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping blob delete");
                    continue;
                }
            };
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::blob_io(path, e)),
            }
        }
        Ok(())
    }
}

/// Blobs kept in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Bytes>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, _mime_type: &str, data: Bytes) -> StorageResult<()> {
        self.blobs.insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.blobs
            .get(key)
            .map(|b| b.clone())
            .ok_or_else(|| StorageError::not_found("blob", key))
    }

    async fn delete(&self, keys: &[String]) -> StorageResult<()> {
        for key in keys {
            self.blobs.remove(key);
        }
        Ok(())
    }
}
