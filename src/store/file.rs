//! Flat-file backend: YAML state files and YAML item metadata.
//!
//! Writes are visible per item as they happen; there is no transaction.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use super::media::write_atomic;
use crate::core::HarvestError;
use crate::domain::{ItemRecord, SourceState};

/// File-based state and metadata store
#[derive(Debug, Clone)]
pub struct FileBackend {
    state_dir: PathBuf,
    metadata_dir: PathBuf,
}

impl FileBackend {
    pub fn new(state_dir: impl Into<PathBuf>, metadata_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            metadata_dir: metadata_dir.into(),
        }
    }

    /// Path of a source's state file
    pub fn state_path(&self, source_id: &str) -> PathBuf {
        self.state_dir.join(format!("{}.state", source_id))
    }

    pub fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }

    /// Every `*.yml` record under the metadata directory, relative to it, sorted
    pub fn record_files(&self) -> Result<Vec<PathBuf>, HarvestError> {
        let root = glob::Pattern::escape(&self.metadata_dir.to_string_lossy());
        let pattern = format!("{}/**/*.yml", root.trim_end_matches('/'));
        let entries = glob::glob(&pattern)
            .map_err(|e| HarvestError::persist(format!("bad metadata pattern '{}': {}", pattern, e)))?;

        let mut files = Vec::new();
        for entry in entries {
            match entry {
                Ok(path) if path.is_file() => match path.strip_prefix(&self.metadata_dir) {
                    Ok(relative) => files.push(relative.to_path_buf()),
                    Err(_) => warn!(path = %path.display(), "Skipping record outside the metadata directory"),
                },
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Skipping unreadable metadata entry"),
            }
        }
        files.sort();
        Ok(files)
    }

    /// Path of an item's metadata file, relative path as derived by the adapter
    pub fn record_path(&self, relative: &Path) -> PathBuf {
        self.metadata_dir.join(relative)
    }

    /// Load a source's state. A missing file is a first run; anything
    /// unreadable is reported as state corruption.
    pub async fn load_state(&self, source_id: &str) -> Result<Option<SourceState>, HarvestError> {
        let path = self.state_path(source_id);

        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(HarvestError::corrupt(
                    source_id,
                    format!("{}: {}", path.display(), e),
                ))
            }
        };

        let state: SourceState = serde_yaml::from_str(&content).map_err(|e| {
            HarvestError::corrupt(source_id, format!("{}: {}", path.display(), e))
        })?;

        if state.source_id != source_id {
            return Err(HarvestError::corrupt(
                source_id,
                format!("{} belongs to '{}'", path.display(), state.source_id),
            ));
        }

        Ok(Some(state))
    }

    /// Write a source's state file
    pub async fn store_state(&self, state: &SourceState) -> Result<(), HarvestError> {
        let content = serde_yaml::to_string(state).map_err(HarvestError::persist)?;
        write_atomic(self.state_path(&state.source_id), content.into_bytes()).await
    }

    /// Load an item record; unreadable records count as absent
    pub async fn load_record(&self, relative: &Path) -> Option<ItemRecord> {
        let path = self.record_path(relative);
        let content = fs::read_to_string(&path).await.ok()?;

        match serde_yaml::from_str(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable metadata record");
                None
            }
        }
    }

    /// Write an item record
    pub async fn store_record(&self, relative: &Path, record: &ItemRecord) -> Result<(), HarvestError> {
        let content = serde_yaml::to_string(record).map_err(HarvestError::persist)?;
        write_atomic(self.record_path(relative), content.into_bytes()).await
    }
}
