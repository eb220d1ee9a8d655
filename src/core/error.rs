//! Failure taxonomy for a harvest run.
//!
//! None of these abort the whole run on their own: the orchestrator
//! decides per variant whether a source is skipped, truncated or treated
//! as running for the first time.

use thiserror::Error;

/// Errors raised while harvesting a source
#[derive(Debug, Error)]
pub enum HarvestError {
    /// Network or parse failure while retrieving a page or its media.
    /// Aborts the current source's run only.
    #[error("Fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// Disk or database write failure. The source's results are truncated
    /// to the already persisted prefix.
    #[error("Persistence failed: {0}")]
    Persist(String),

    /// Missing or invalid source definition. The source is skipped.
    #[error("Invalid configuration for '{source_name}': {reason}")]
    Config { source_name: String, reason: String },

    /// Prior state could not be read. Treated as a first run.
    #[error("Unreadable state for '{source_id}': {reason}")]
    StateCorruption { source_id: String, reason: String },

    /// Another run holds the harvest lock
    #[error("Harvest lock unavailable at {0}")]
    Lock(String),
}

impl HarvestError {
    /// Build a fetch error from anything displayable
    pub fn fetch(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a persistence error from anything displayable
    pub fn persist(reason: impl std::fmt::Display) -> Self {
        Self::Persist(reason.to_string())
    }

    /// Build a configuration error for a named source
    pub fn config(source_name: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Config {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Build a state corruption error for a source
    pub fn corrupt(source_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::StateCorruption {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for HarvestError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persist(format!("database: {}", e))
    }
}
