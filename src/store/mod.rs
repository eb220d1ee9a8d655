//! Persistence for cursors and item metadata.
//!
//! Two interchangeable backends can be active at once:
//! - **files**: YAML state files and YAML metadata records ([`FileBackend`])
//! - **database**: SQLite rows inside a run-long [`Session`]
//!
//! When the database is active it is authoritative: reads try it first and
//! a failed write there fails the save. The file backend then acts as a
//! mirror whose write failures are only logged. With files alone, the files
//! are authoritative.
//!
//! Media bytes always live on disk under the media root, whichever backend
//! holds the metadata.

pub mod file;
pub mod import;
pub mod media;
pub mod sqlite;

use std::path::Path;

use tracing::{debug, info, warn};

use crate::adapters::SourceAdapter;
use crate::core::HarvestError;
use crate::domain::{ContentItem, ItemRecord, PageInfo, SourceState};

pub use file::FileBackend;
pub use import::{import_records, ImportReport};
pub use media::{hash_bytes, hash_file, relative_key, MediaStore};
pub use sqlite::Session;

/// Per-run unit of work.
///
/// Constructed once per run and passed by reference into every store
/// operation. Holds the database session, if any; dropping it without
/// [`commit`](UnitOfWork::commit) rolls the session back.
pub struct UnitOfWork {
    session: Option<Session>,
}

impl UnitOfWork {
    /// Begin a run, opening the database at `database` when given
    pub fn begin(database: Option<&Path>) -> Result<Self, HarvestError> {
        let session = database.map(Session::open).transpose()?;
        Ok(Self { session })
    }

    /// Unit of work over an already open session
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Some(session),
        }
    }

    /// Unit of work without a database
    pub fn files_only() -> Self {
        Self { session: None }
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Commit the database session, if any
    pub fn commit(self) -> Result<(), HarvestError> {
        match self.session {
            Some(session) => session.commit(),
            None => Ok(()),
        }
    }
}

/// State and metadata store over the active backends
#[derive(Debug, Clone)]
pub struct StateStore {
    media: MediaStore,
    files: Option<FileBackend>,
}

impl StateStore {
    pub fn new(media: MediaStore, files: Option<FileBackend>) -> Self {
        Self { media, files }
    }

    pub fn media(&self) -> &MediaStore {
        &self.media
    }

    pub fn files(&self) -> Option<&FileBackend> {
        self.files.as_ref()
    }

    /// Load a source's cursor.
    ///
    /// Database first, then files. Unreadable state in either backend is
    /// logged and treated as absent.
    pub async fn load(&self, uow: &UnitOfWork, source_id: &str) -> Option<SourceState> {
        if let Some(session) = uow.session() {
            match session.load_state(source_id) {
                Ok(Some(state)) => return Some(state),
                Ok(None) => debug!(source = %source_id, "No database state, trying files"),
                Err(e) => warn!(source = %source_id, error = %e, "Unreadable database state"),
            }
        }

        let files = self.files.as_ref()?;
        match files.load_state(source_id).await {
            Ok(state) => state,
            Err(e) => {
                warn!(source = %source_id, error = %e, "Acting as first run");
                None
            }
        }
    }

    /// Persist a source's cursor to every active backend
    pub async fn store(&self, uow: &UnitOfWork, state: &SourceState) -> Result<(), HarvestError> {
        if let Some(session) = uow.session() {
            session.store_state(state)?;
        }

        if let Some(files) = &self.files {
            if let Err(e) = files.store_state(state).await {
                self.mirror_failed(uow, &state.source_id, e)?;
            }
        }

        debug!(source = %state.source_id, last_item = ?state.last_item_id, "State stored");
        Ok(())
    }

    /// Whether the item on `page` was already retrieved.
    ///
    /// A hit needs a stored record with the same identity AND media on disk
    /// whose recomputed hash matches the stored one.
    pub async fn is_retrieved(
        &self,
        uow: &UnitOfWork,
        adapter: &dyn SourceAdapter,
        page: &PageInfo,
    ) -> Result<bool, HarvestError> {
        if let Some(session) = uow.session() {
            if let Some(record) = session.find_record(adapter.key(), &page.item_id)? {
                return Ok(self.media.matches(&record.filename, &record.media_hash).await);
            }
        }

        if let Some(files) = &self.files {
            let relative = adapter.storage_path(page).join(adapter.metadata_filename(page));
            if let Some(record) = files.load_record(&relative).await {
                if record.key == adapter.key() && record.item_id == page.item_id {
                    return Ok(self.media.matches(&record.filename, &record.media_hash).await);
                }
            }
        }

        Ok(false)
    }

    /// Persist one item: media file, database row, metadata file.
    pub async fn save_item(
        &self,
        uow: &UnitOfWork,
        adapter: &dyn SourceAdapter,
        item: &ContentItem,
    ) -> Result<ItemRecord, HarvestError> {
        let dir = adapter.storage_path(&item.page);
        let media_rel = relative_key(&dir.join(adapter.media_filename(&item.page, &item.extension)));

        let written = self.media.write(&media_rel, &item.media).await?;
        let record = ItemRecord::from_item(item, adapter.key(), media_rel);

        if let Some(session) = uow.session() {
            session.upsert_record(&record)?;
        }

        if let Some(files) = &self.files {
            let relative = dir.join(adapter.metadata_filename(&item.page));
            if let Err(e) = files.store_record(&relative, &record).await {
                self.mirror_failed(uow, &item.source_id, e)?;
            }
        }

        info!(
            source = %item.source_id,
            item = %item.item_id(),
            path = %written.display(),
            size = item.media_size(),
            "Item saved"
        );
        Ok(record)
    }

    fn mirror_failed(
        &self,
        uow: &UnitOfWork,
        source_id: &str,
        error: HarvestError,
    ) -> Result<(), HarvestError> {
        if uow.session().is_some() {
            warn!(source = %source_id, error = %error, "File mirror write failed");
            Ok(())
        } else {
            Err(error)
        }
    }
}
