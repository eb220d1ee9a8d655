//! Backfill of file-backend metadata into the database.
//!
//! Harvests run with files only leave their item records as YAML under the
//! metadata directory. Importing walks those records and upserts each one
//! into the database so that a later run with the database enabled
//! recognises every item already on disk.

use std::path::PathBuf;

use tracing::{debug, info, warn};

use super::{FileBackend, UnitOfWork};
use crate::core::HarvestError;

/// Outcome of an import
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Record files that could not be read, relative to the metadata directory
    pub skipped: Vec<PathBuf>,
}

impl ImportReport {
    pub fn total(&self) -> usize {
        self.created + self.updated + self.unchanged + self.skipped.len()
    }
}

/// Upsert every metadata record of `files` into the unit of work's session.
///
/// Rows are only written when absent or different. Nothing becomes visible
/// until the caller commits `uow`.
pub async fn import_records(files: &FileBackend, uow: &UnitOfWork) -> Result<ImportReport, HarvestError> {
    let session = uow
        .session()
        .ok_or_else(|| HarvestError::persist("importing metadata needs a database"))?;

    let mut report = ImportReport::default();
    for relative in files.record_files()? {
        let Some(record) = files.load_record(&relative).await else {
            warn!(path = %relative.display(), "Skipping unreadable metadata record");
            report.skipped.push(relative);
            continue;
        };

        match session.find_record(&record.key, &record.item_id)? {
            Some(existing) if existing == record => {
                report.unchanged += 1;
                continue;
            }
            Some(_) => report.updated += 1,
            None => report.created += 1,
        }
        session.upsert_record(&record)?;
        debug!(key = %record.key, item = %record.item_id, path = %relative.display(), "Record imported");
    }

    info!(
        created = report.created,
        updated = report.updated,
        unchanged = report.unchanged,
        skipped = report.skipped.len(),
        "Metadata import finished"
    );
    Ok(report)
}
