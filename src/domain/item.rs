//! Content items fetched from a source.
//!
//! A [`PageInfo`] is what an adapter extracts from one page; once its media
//! has been downloaded it becomes a [`ContentItem`]. Items live only for one
//! fetch/save cycle; what survives is the [`ItemRecord`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Navigation links found on a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavLinks {
    pub first: Option<String>,
    pub prev: Option<String>,
    pub next: Option<String>,
    pub last: Option<String>,
}

impl NavLinks {
    /// The "next" link, unless it points back at `here`
    pub fn next_from(&self, here: &str) -> Option<&str> {
        self.next.as_deref().filter(|next| *next != here)
    }

    /// The "last" link, unless it points back at `here`
    pub fn last_from(&self, here: &str) -> Option<&str> {
        self.last.as_deref().filter(|last| *last != here)
    }
}

/// Everything an adapter extracts from one page
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    /// Source-specific identifier of the item on this page
    pub item_id: String,

    /// Canonical URL of the page
    pub url: String,

    /// URL of the page's media
    pub media_url: String,

    /// Navigation links
    pub links: NavLinks,

    /// Free-form metadata (title, alt text, ...)
    pub info: BTreeMap<String, serde_json::Value>,
}

impl PageInfo {
    /// Create a page with no links and no metadata
    pub fn new(
        item_id: impl Into<String>,
        url: impl Into<String>,
        media_url: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            url: url.into(),
            media_url: media_url.into(),
            links: NavLinks::default(),
            info: BTreeMap::new(),
        }
    }

    /// Set the navigation links
    pub fn with_links(mut self, links: NavLinks) -> Self {
        self.links = links;
        self
    }

    /// Add a metadata entry
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// String metadata entry, if present
    pub fn info_str(&self, key: &str) -> Option<&str> {
        self.info.get(key).and_then(|v| v.as_str())
    }
}

/// Downloaded media bytes with their detected MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// One fetched unit, ready to be persisted
#[derive(Debug, Clone)]
pub struct ContentItem {
    /// Name of the source this item was fetched for
    pub source_id: String,

    /// Page data as extracted by the adapter
    pub page: PageInfo,

    /// Media bytes
    pub media: Vec<u8>,

    /// Detected MIME type of the media
    pub mime: String,

    /// File extension derived from the MIME type
    pub extension: String,

    /// SHA-256 of the media bytes (hex)
    pub media_hash: String,

    /// When the item was captured
    pub captured_at: DateTime<Utc>,
}

impl ContentItem {
    /// Build an item from a page and its downloaded media
    pub fn new(source_id: impl Into<String>, page: PageInfo, media: Media, extension: String) -> Self {
        let media_hash = crate::store::hash_bytes(&media.bytes);
        Self {
            source_id: source_id.into(),
            page,
            media: media.bytes,
            mime: media.mime,
            extension,
            media_hash,
            captured_at: Utc::now(),
        }
    }

    /// Override the capture timestamp
    pub fn captured(mut self, at: DateTime<Utc>) -> Self {
        self.captured_at = at;
        self
    }

    pub fn item_id(&self) -> &str {
        &self.page.item_id
    }

    pub fn url(&self) -> &str {
        &self.page.url
    }

    pub fn media_url(&self) -> &str {
        &self.page.media_url
    }

    /// Media size in bytes
    pub fn media_size(&self) -> u64 {
        self.media.len() as u64
    }

    /// Human title for reports, falling back to the item id
    pub fn title(&self) -> &str {
        self.page.info_str("title").unwrap_or(&self.page.item_id)
    }
}

/// Persisted item metadata.
///
/// Written as a YAML file and/or a database row; both are derived from the
/// same [`ContentItem`] through [`ItemRecord::from_item`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub key: String,

    #[serde(rename = "itemId")]
    pub item_id: String,

    pub timestamp: DateTime<Utc>,

    pub url: String,

    #[serde(rename = "mediaUrl")]
    pub media_url: String,

    #[serde(rename = "mediaHash")]
    pub media_hash: String,

    #[serde(rename = "mediaSize")]
    pub media_size: u64,

    /// Media path relative to the media root
    pub filename: String,

    #[serde(default)]
    pub info: BTreeMap<String, serde_json::Value>,
}

impl ItemRecord {
    /// Derive the record for an item stored under adapter `key` at `filename`
    pub fn from_item(item: &ContentItem, key: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            item_id: item.page.item_id.clone(),
            timestamp: item.captured_at,
            url: item.page.url.clone(),
            media_url: item.page.media_url.clone(),
            media_hash: item.media_hash.clone(),
            media_size: item.media_size(),
            filename: filename.into(),
            info: item.page.info.clone(),
        }
    }
}
