//! Payload storage for artifacts.
//!
//! Payloads are addressed by `(id, format)` and stored separately from the
//! metadata ledger. The store never trusts the payload store to know which
//! artifacts exist; the ledger is authoritative.

use std::{collections::HashMap, fmt, io, path::PathBuf, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::{StorageError, StorageResult},
    ledger::{remove_stale_temp_files, write_atomic},
    types::{ArtifactFormat, ArtifactId},
};

/// Storage for artifact payload bytes.
#[async_trait]
pub trait BlobStore: Send + Sync + fmt::Debug {
    /// Writes a payload, replacing any previous payload for the id.
    async fn put(&self, id: ArtifactId, format: ArtifactFormat, bytes: Bytes) -> StorageResult<()>;

    /// Reads a payload, or `None` if it does not exist.
    async fn get(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<Option<Bytes>>;

    /// Returns whether a payload exists.
    async fn contains(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<bool>;

    /// Deletes a payload. Returns `false` if it was already gone.
    async fn delete(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<bool>;

    /// Lists every stored payload.
    async fn list(&self) -> StorageResult<Vec<(ArtifactId, ArtifactFormat)>>;

    /// Removes partial writes older than `grace` left by a crash. Returns
    /// the number removed.
    async fn remove_stale_partials(&self, _grace: Duration) -> usize {
        0
    }
}

/// Payloads stored as `<dir>/<id>.<ext>` files.
///
/// Writes go through a temp file and a rename, so a reader never sees a
/// partial payload.
#[derive(Debug, Clone)]
pub struct FileBlobStore {
    dir: PathBuf,
}

impl FileBlobStore {
    /// Creates a store rooted at `dir`. The directory is created on the
    /// first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the payload file for an artifact.
    #[must_use]
    pub fn path_for(&self, id: ArtifactId, format: ArtifactFormat) -> PathBuf {
        self.dir.join(format!("{id}.{}", format.extension()))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, id: ArtifactId, format: ArtifactFormat, bytes: Bytes) -> StorageResult<()> {
        write_atomic(&self.path_for(id, format), &bytes).await
    }

    async fn get(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<Option<Bytes>> {
        let path = self.path_for(id, format);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io_with_source(
                format!("failed to read payload {}", path.display()),
                e,
            )),
        }
    }

    async fn contains(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<bool> {
        let path = self.path_for(id, format);
        tokio::fs::try_exists(&path).await.map_err(|e| {
            StorageError::io_with_source(format!("failed to stat payload {}", path.display()), e)
        })
    }

    async fn delete(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<bool> {
        let path = self.path_for(id, format);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io_with_source(
                format!("failed to delete payload {}", path.display()),
                e,
            )),
        }
    }

    async fn list(&self) -> StorageResult<Vec<(ArtifactId, ArtifactFormat)>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::io_with_source(
                    format!("failed to list payloads in {}", self.dir.display()),
                    e,
                ));
            },
        };

        let mut found = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    return Err(StorageError::io_with_source(
                        format!("failed to list payloads in {}", self.dir.display()),
                        e,
                    ));
                },
            };
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let parsed = name.rsplit_once('.').and_then(|(stem, ext)| {
                Some((ArtifactId::parse(stem).ok()?, ArtifactFormat::from_extension(ext)?))
            });
            match parsed {
                Some(item) => found.push(item),
                None => debug!(file = %name, "ignoring non-payload file"),
            }
        }
        Ok(found)
    }

    async fn remove_stale_partials(&self, grace: Duration) -> usize {
        remove_stale_temp_files(&self.dir, ".", grace).await
    }
}

/// Payloads held in memory.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<(ArtifactId, ArtifactFormat), Bytes>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, id: ArtifactId, format: ArtifactFormat, bytes: Bytes) -> StorageResult<()> {
        self.blobs.write().insert((id, format), bytes);
        Ok(())
    }

    async fn get(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<Option<Bytes>> {
        Ok(self.blobs.read().get(&(id, format)).cloned())
    }

    async fn contains(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<bool> {
        Ok(self.blobs.read().contains_key(&(id, format)))
    }

    async fn delete(&self, id: ArtifactId, format: ArtifactFormat) -> StorageResult<bool> {
        Ok(self.blobs.write().remove(&(id, format)).is_some())
    }

    async fn list(&self) -> StorageResult<Vec<(ArtifactId, ArtifactFormat)>> {
        Ok(self.blobs.read().keys().copied().collect())
    }
}
