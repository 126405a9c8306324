//! Per-invocation scratch space.
//!
//! Each invocation downloads into its own temporary directory. The directory
//! and everything in it is removed when the [`ScratchFile`] is dropped, on
//! success and failure alike.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};

/// Writable local location for downloaded objects.
#[derive(Debug, Clone)]
pub struct ScratchStore {
    root: PathBuf,
}

impl ScratchStore {
    /// Creates a store that allocates under `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Creates a store under the system temporary directory.
    #[must_use]
    pub fn system() -> Self {
        Self::new(std::env::temp_dir())
    }

    /// Root under which invocation directories are created.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a fresh location for `key`.
    ///
    /// The file name is the last path segment of the key so the extension is
    /// preserved for format detection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEvent`] if the key has no file name, or
    /// [`Error::Io`] if the directory cannot be created.
    pub fn allocate(&self, key: &str) -> Result<ScratchFile> {
        let file_name = key
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .ok_or_else(|| Error::invalid_event(format!("object key '{key}' has no file name")))?;

        let dir = tempfile::Builder::new()
            .prefix("pqload-")
            .tempdir_in(&self.root)
            .map_err(|e| {
                Error::io(
                    format!("failed to create scratch directory in {}", self.root.display()),
                    e,
                )
            })?;
        let path = dir.path().join(file_name);

        Ok(ScratchFile { _dir: dir, path })
    }
}

impl Default for ScratchStore {
    fn default() -> Self {
        Self::system()
    }
}

/// A scratch location owned by one invocation.
#[derive(Debug)]
pub struct ScratchFile {
    _dir: TempDir,
    path: PathBuf,
}

impl ScratchFile {
    /// Path the object should be written to.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
