//! Per-source cursor.
//!
//! A `SourceState` marks the last item of a source that was durably saved.
//! It is only ever moved forward: `last_updated` never decreases.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::item::ContentItem;

/// Legacy textual timestamp layout accepted when reading old state files
pub const LEGACY_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Persisted cursor for one source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceState {
    /// Unique source identifier
    #[serde(rename = "sourceId")]
    pub source_id: String,

    #[serde(rename = "lastItemId")]
    pub last_item_id: Option<String>,

    /// Capture time of the newest saved item
    #[serde(rename = "lastUpdated", with = "timestamp", default)]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(rename = "lastUrl")]
    pub last_url: Option<String>,

    #[serde(rename = "lastMediaUrl")]
    pub last_media_url: Option<String>,
}

impl SourceState {
    /// Empty state for a source that has never saved anything
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            last_item_id: None,
            last_updated: None,
            last_url: None,
            last_media_url: None,
        }
    }

    /// Move the cursor to a durably saved item.
    ///
    /// `last_updated` keeps the later of the current value and the item's
    /// capture time.
    pub fn advance(&mut self, item: &ContentItem) {
        self.last_item_id = Some(item.item_id().to_string());
        self.last_url = Some(item.url().to_string());
        self.last_media_url = Some(item.media_url().to_string());
        self.last_updated = Some(match self.last_updated {
            Some(prev) if prev > item.captured_at => prev,
            _ => item.captured_at,
        });
    }

    /// Whether the source ever completed a save
    pub fn has_completed(&self) -> bool {
        self.last_updated.is_some()
    }
}

/// Parse a stored timestamp: ISO-8601 first, legacy layout (UTC) second
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, LEGACY_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Serde codec for optional timestamps
pub(crate) mod timestamp {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(s) => super::parse_timestamp(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("unrecognized timestamp '{}'", s))),
        }
    }
}
