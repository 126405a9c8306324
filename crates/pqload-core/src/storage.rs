//! Object fetcher abstraction (S3, local directory, memory).
//!
//! The fetcher is the only component that talks to remote storage. Its
//! contract is deliberately narrow: copy one object into a local path and
//! report how many bytes were written. It makes no decisions of its own.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{Error, Result};

/// Copies a named object from storage into local scratch space.
#[async_trait]
pub trait ObjectFetcher: Send + Sync + 'static {
    /// Downloads `bucket`/`key` into `destination`.
    ///
    /// Returns the number of bytes written. Returns [`Error::Fetch`] if the
    /// object does not exist, the transfer fails, or the local write fails.
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64>;
}

/// In-memory object store for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryFetcher {
    objects: Arc<RwLock<HashMap<(String, String), Bytes>>>,
}

impl MemoryFetcher {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object, replacing any previous content.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the lock is poisoned.
    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| Error::internal("lock poisoned"))?
            .insert((bucket.to_string(), key.to_string()), data.into());
        Ok(())
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.read().map_or(0, |objects| objects.len())
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectFetcher for MemoryFetcher {
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64> {
        let data = {
            let objects = self
                .objects
                .read()
                .map_err(|_| Error::internal("lock poisoned"))?;
            objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| Error::fetch(bucket, key, "object not found"))?
        };

        tokio::fs::write(destination, &data).await.map_err(|e| {
            Error::fetch_with_source(
                bucket,
                key,
                format!("failed to write {}", destination.display()),
                e,
            )
        })?;
        Ok(data.len() as u64)
    }
}

/// Fetcher backed by a local directory tree.
///
/// A bucket is a sub-directory of `root` and a key is a relative path inside
/// it. Useful for replaying notifications against files on disk.
#[derive(Debug, Clone)]
pub struct LocalDirFetcher {
    root: PathBuf,
}

impl LocalDirFetcher {
    /// Creates a fetcher rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();
        for part in [bucket, key] {
            let relative = Path::new(part);
            if part.is_empty()
                || relative
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
            {
                return Err(Error::fetch(
                    bucket,
                    key,
                    format!("'{part}' is not a plain relative path"),
                ));
            }
            path.push(relative);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectFetcher for LocalDirFetcher {
    async fn fetch(&self, bucket: &str, key: &str, destination: &Path) -> Result<u64> {
        let source = self.object_path(bucket, key)?;
        tokio::fs::copy(&source, destination).await.map_err(|e| {
            let message = if e.kind() == std::io::ErrorKind::NotFound {
                format!("object not found at {}", source.display())
            } else {
                format!("failed to copy {}", source.display())
            };
            Error::fetch_with_source(bucket, key, message, e)
        })
    }
}
