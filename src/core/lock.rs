//! Exclusive run lock.
//!
//! Only one harvest may run against a state directory at a time. The lock
//! is an advisory `fs2` lock on a file in the state directory, released
//! when the guard is dropped.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

use super::HarvestError;

/// Held for the duration of a run
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock, failing immediately if another run holds it
    pub fn acquire(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HarvestError::Lock(format!("{}: {}", parent.display(), e)))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)
            .map_err(|e| HarvestError::Lock(format!("{}: {}", path.display(), e)))?;

        file.try_lock_exclusive()
            .map_err(|e| HarvestError::Lock(format!("{}: {}", path.display(), e)))?;

        // Record the holder for whoever finds the file later
        file.set_len(0)
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|e| HarvestError::Lock(format!("{}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Run lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
        debug!(path = %self.path.display(), "Run lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_second_lock_fails_until_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("gleaner.lock");

        let first = RunLock::acquire(&path).unwrap();
        let err = RunLock::acquire(&path).unwrap_err();
        assert!(matches!(err, HarvestError::Lock(_)));

        drop(first);
        assert!(RunLock::acquire(&path).is_ok());
    }
}
