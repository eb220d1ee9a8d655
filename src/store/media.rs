//! Media files on disk and their content hashes.

use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::core::HarvestError;

/// SHA-256 of a byte slice, lowercase hex
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// SHA-256 of a file's content, lowercase hex
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let content = tokio::fs::read(path).await?;
    Ok(hash_bytes(&content))
}

/// Write a file through a temporary sibling so readers never see a partial write
pub(crate) async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> Result<(), HarvestError> {
    tokio::task::spawn_blocking(move || -> Result<(), HarvestError> {
        let parent = path
            .parent()
            .ok_or_else(|| HarvestError::persist(format!("No parent directory for {}", path.display())))?;
        std::fs::create_dir_all(parent).map_err(|e| {
            HarvestError::persist(format!("Failed to create {}: {}", parent.display(), e))
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .map_err(|e| HarvestError::persist(format!("Failed to create temp file: {}", e)))?;
        tmp.write_all(&bytes)
            .and_then(|_| tmp.flush())
            .map_err(|e| HarvestError::persist(format!("Failed to write {}: {}", path.display(), e)))?;
        tmp.persist(&path)
            .map_err(|e| HarvestError::persist(format!("Failed to persist {}: {}", path.display(), e)))?;
        Ok(())
    })
    .await
    .map_err(HarvestError::persist)?
}

/// Root directory holding downloaded media
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write media bytes at a path relative to the root
    pub async fn write(&self, relative: &str, bytes: &[u8]) -> Result<PathBuf, HarvestError> {
        let path = self.root.join(relative);
        write_atomic(path.clone(), bytes.to_vec()).await?;
        Ok(path)
    }

    /// Whether the file at `relative` exists and hashes to `expected`
    pub async fn matches(&self, relative: &str, expected: &str) -> bool {
        let path = self.root.join(relative);
        match hash_file(&path).await {
            Ok(actual) if actual == expected => true,
            Ok(actual) => {
                debug!(path = %path.display(), %expected, %actual, "Stored media hash mismatch");
                false
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Stored media unreadable");
                false
            }
        }
    }
}

/// Render a relative path with forward slashes, as stored in item records
pub fn relative_key(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}
