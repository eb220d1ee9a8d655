//! Source adapters.
//!
//! An adapter knows how to fetch one kind of source: where its landing page
//! is, how to pull the item id, media URL and navigation links out of a
//! page, and how to name the files an item is stored under. Adapters are
//! picked by the `module` string of a source definition through the
//! [`AdapterRegistry`].

pub mod http;
pub mod smbc;
pub mod xkcd;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::SourceConfig;
use crate::core::HarvestError;
use crate::domain::{Media, PageInfo};

pub use http::HttpClient;
pub use smbc::SmbcAdapter;
pub use xkcd::XkcdAdapter;

/// Capability set of a per-source plugin
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Key identifying the source's items (first half of an item identity)
    fn key(&self) -> &str;

    /// Fetch and parse a page. `None` fetches the landing page.
    async fn fetch_page(&self, url: Option<&str>) -> Result<PageInfo, HarvestError>;

    /// Download the media referenced by a page
    async fn fetch_media(&self, page: &PageInfo) -> Result<Media, HarvestError>;

    /// Directory (relative) for an item's media and metadata files
    fn storage_path(&self, page: &PageInfo) -> PathBuf;

    /// File name for an item's media
    fn media_filename(&self, page: &PageInfo, extension: &str) -> String;

    /// File name for an item's metadata record
    fn metadata_filename(&self, page: &PageInfo) -> String;

    /// File extension for a detected MIME type
    fn extension_for(&self, mime: &str) -> Option<String> {
        extension_for_mime(mime).map(str::to_string)
    }
}

/// Map a MIME type to a file extension
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase();
    match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

/// Guess a MIME type from leading magic bytes
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else if bytes.starts_with(b"<svg") || bytes.starts_with(b"<?xml") {
        Some("image/svg+xml")
    } else {
        None
    }
}

/// Builds an adapter for a source definition
pub type AdapterFactory =
    Arc<dyn Fn(&SourceConfig) -> Result<Box<dyn SourceAdapter>, HarvestError> + Send + Sync>;

type BuiltinFactory = fn(&SourceConfig, &HttpClient) -> Result<Box<dyn SourceAdapter>, HarvestError>;

/// Adapters compiled into the binary, keyed by module name
const BUILTIN: &[(&str, BuiltinFactory)] = &[("smbc", smbc::build), ("xkcd", xkcd::build)];

/// Module name → adapter factory
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    factories: BTreeMap<String, AdapterFactory>,
}

impl AdapterRegistry {
    /// Registry without any adapter
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry holding the built-in adapters, sharing one HTTP client
    pub fn builtin(http: HttpClient) -> Self {
        let mut registry = Self::empty();
        for (module, build) in BUILTIN {
            let http = http.clone();
            let build = *build;
            registry.register(module, move |source: &SourceConfig| build(source, &http));
        }
        registry
    }

    /// Register (or replace) a factory under a module name
    pub fn register<F>(&mut self, module: &str, factory: F)
    where
        F: Fn(&SourceConfig) -> Result<Box<dyn SourceAdapter>, HarvestError> + Send + Sync + 'static,
    {
        self.factories
            .insert(module.to_ascii_lowercase(), Arc::new(factory));
    }

    /// Build the adapter for a source
    pub fn build(&self, source: &SourceConfig) -> Result<Box<dyn SourceAdapter>, HarvestError> {
        let factory = self
            .factories
            .get(&source.module.to_ascii_lowercase())
            .ok_or_else(|| {
                HarvestError::config(
                    &source.name,
                    format!(
                        "unknown module '{}' (known: {})",
                        source.module,
                        self.modules().join(", ")
                    ),
                )
            })?;
        factory(source)
    }

    /// Registered module names, sorted
    pub fn modules(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_for_mime() {
        assert_eq!(extension_for_mime("image/png"), Some("png"));
        assert_eq!(extension_for_mime("IMAGE/JPEG; charset=binary"), Some("jpg"));
        assert_eq!(extension_for_mime("text/html"), None);
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\nrest"), Some("image/png"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"hello"), None);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = AdapterRegistry::builtin(HttpClient::new().unwrap());
        assert_eq!(registry.modules(), vec!["smbc", "xkcd"]);

        let source = SourceConfig::new("comic", "nope");
        let err = registry.build(&source).err().unwrap();
        assert!(matches!(err, HarvestError::Config { .. }));
        assert!(err.to_string().contains("unknown module 'nope'"));

        let source = SourceConfig::new("comic", "XKCD");
        let adapter = registry.build(&source).unwrap();
        assert_eq!(adapter.key(), "xkcd");

        let mut source = SourceConfig::new("weekly", "SMBC");
        source.key = Some("smbc-alt".to_string());
        assert_eq!(registry.build(&source).unwrap().key(), "smbc-alt");
    }
}
