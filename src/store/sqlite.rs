//! Relational backend (SQLite).
//!
//! A [`Session`] wraps one connection holding a transaction open for the
//! whole run, so every state and metadata write of the run becomes visible
//! together at commit. A session dropped without `commit` rolls back.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::core::HarvestError;
use crate::domain::state::parse_timestamp;
use crate::domain::{ItemRecord, SourceState};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS source_state (
    source_id TEXT PRIMARY KEY,
    last_item_id TEXT,
    last_updated TEXT,
    last_url TEXT,
    last_media_url TEXT
);

CREATE TABLE IF NOT EXISTS item_metadata (
    key TEXT NOT NULL,
    item_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    url TEXT NOT NULL,
    media_url TEXT NOT NULL,
    media_hash TEXT NOT NULL,
    media_size INTEGER NOT NULL,
    filename TEXT NOT NULL,
    info TEXT NOT NULL DEFAULT '{}',
    PRIMARY KEY (key, item_id)
);

CREATE INDEX IF NOT EXISTS idx_item_metadata_hash ON item_metadata(media_hash);
"#;

/// Database session spanning one harvest run
pub struct Session {
    conn: Connection,
}

impl Session {
    /// Open (creating if needed) the database file and begin the run's transaction
    pub fn open(path: &Path) -> Result<Self, HarvestError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                HarvestError::persist(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }
        Self::begin(Connection::open(path)?)
    }

    /// In-memory database, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, HarvestError> {
        Self::begin(Connection::open_in_memory()?)
    }

    fn begin(conn: Connection) -> Result<Self, HarvestError> {
        conn.execute_batch(SCHEMA)?;
        conn.execute_batch("BEGIN")?;
        debug!("Database session started");
        Ok(Self { conn })
    }

    /// Make the run's writes visible
    pub fn commit(self) -> Result<(), HarvestError> {
        self.conn.execute_batch("COMMIT")?;
        debug!("Database session committed");
        Ok(())
    }

    /// Load a source's state
    pub fn load_state(&self, source_id: &str) -> Result<Option<SourceState>, HarvestError> {
        let row = self
            .conn
            .query_row(
                "SELECT last_item_id, last_updated, last_url, last_media_url
                 FROM source_state WHERE source_id = ?1",
                params![source_id],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| HarvestError::corrupt(source_id, e))?;

        let Some((last_item_id, last_updated, last_url, last_media_url)) = row else {
            return Ok(None);
        };

        let last_updated = match last_updated {
            None => None,
            Some(raw) => Some(parse_timestamp(&raw).ok_or_else(|| {
                HarvestError::corrupt(source_id, format!("unrecognized timestamp '{}'", raw))
            })?),
        };

        Ok(Some(SourceState {
            source_id: source_id.to_string(),
            last_item_id,
            last_updated,
            last_url,
            last_media_url,
        }))
    }

    /// Insert or replace a source's state
    pub fn store_state(&self, state: &SourceState) -> Result<(), HarvestError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO source_state
                (source_id, last_item_id, last_updated, last_url, last_media_url)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                state.source_id,
                state.last_item_id,
                state.last_updated.map(|ts| ts.to_rfc3339()),
                state.last_url,
                state.last_media_url,
            ],
        )?;
        Ok(())
    }

    /// Find the record for an item identity
    pub fn find_record(&self, key: &str, item_id: &str) -> Result<Option<ItemRecord>, HarvestError> {
        let row = self
            .conn
            .query_row(
                "SELECT timestamp, url, media_url, media_hash, media_size, filename, info
                 FROM item_metadata WHERE key = ?1 AND item_id = ?2",
                params![key, item_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((timestamp, url, media_url, media_hash, media_size, filename, info)) = row else {
            return Ok(None);
        };

        let Some(timestamp) = parse_timestamp(&timestamp) else {
            warn!(%key, %item_id, %timestamp, "Ignoring item row with unreadable timestamp");
            return Ok(None);
        };
        let info = serde_json::from_str(&info).unwrap_or_else(|e| {
            warn!(%key, %item_id, error = %e, "Item row has unreadable info, dropping it");
            Default::default()
        });

        Ok(Some(ItemRecord {
            key: key.to_string(),
            item_id: item_id.to_string(),
            timestamp,
            url,
            media_url,
            media_hash,
            media_size: media_size.max(0) as u64,
            filename,
            info,
        }))
    }

    /// Insert a record, replacing any stale row with the same identity
    pub fn upsert_record(&self, record: &ItemRecord) -> Result<(), HarvestError> {
        let info = serde_json::to_string(&record.info).map_err(HarvestError::persist)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO item_metadata
                (key, item_id, timestamp, url, media_url, media_hash, media_size, filename, info)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.key,
                record.item_id,
                record.timestamp.to_rfc3339(),
                record.url,
                record.media_url,
                record.media_hash,
                record.media_size as i64,
                record.filename,
                info,
            ],
        )?;
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.conn.is_autocommit() {
            if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %e, "Failed to roll back database session");
            } else {
                debug!("Database session rolled back");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn record(hash: &str, filename: &str) -> ItemRecord {
        let mut info = BTreeMap::new();
        info.insert("title".to_string(), serde_json::json!("Seven"));
        ItemRecord {
            key: "xkcd".to_string(),
            item_id: "7".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            url: "https://xkcd.com/7/".to_string(),
            media_url: "https://imgs.xkcd.com/comics/7.png".to_string(),
            media_hash: hash.to_string(),
            media_size: 3,
            filename: filename.to_string(),
            info,
        }
    }

    #[test]
    fn test_state_round_trip_in_session() {
        let session = Session::open_in_memory().unwrap();
        assert!(session.load_state("xkcd").unwrap().is_none());

        let mut state = SourceState::new("xkcd");
        state.last_item_id = Some("7".to_string());
        state.last_updated = Some(Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap());
        session.store_state(&state).unwrap();

        assert_eq!(session.load_state("xkcd").unwrap(), Some(state));
    }

    #[test]
    fn test_upsert_replaces_stale_record() {
        let session = Session::open_in_memory().unwrap();
        session.upsert_record(&record("old", "a.png")).unwrap();
        session.upsert_record(&record("new", "b.png")).unwrap();

        let found = session.find_record("xkcd", "7").unwrap().unwrap();
        assert_eq!(found.media_hash, "new");
        assert_eq!(found.filename, "b.png");
        assert_eq!(found.info.get("title"), Some(&serde_json::json!("Seven")));
        assert!(session.find_record("xkcd", "8").unwrap().is_none());
    }

    #[test]
    fn test_uncommitted_session_rolls_back() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("db").join("gleaner.sqlite");

        {
            let session = Session::open(&db).unwrap();
            session.store_state(&SourceState::new("dropped")).unwrap();
        }
        {
            let session = Session::open(&db).unwrap();
            assert!(session.load_state("dropped").unwrap().is_none());
            session.store_state(&SourceState::new("kept")).unwrap();
            session.commit().unwrap();
        }

        let session = Session::open(&db).unwrap();
        assert!(session.load_state("kept").unwrap().is_some());
    }
}
