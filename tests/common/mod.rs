//! Shared fixtures: an in-memory paginated site and its adapter.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gleaner::adapters::{AdapterRegistry, SourceAdapter};
use gleaner::config::{ConfigFile, Settings, SourceConfig};
use gleaner::core::{HarvestError, RunMode};
use gleaner::digest::{DigestSender, RenderedMessage};
use gleaner::domain::{Media, NavLinks, PageInfo};

pub const MODULE: &str = "scripted";

#[derive(Default)]
struct SiteState {
    items: Vec<(String, Vec<u8>)>,
    failing_pages: Vec<String>,
    failing_media: Vec<String>,
    page_fetches: usize,
}

/// A sequential site whose pages live in memory
#[derive(Clone, Default)]
pub struct ScriptedSite {
    inner: Arc<Mutex<SiteState>>,
}

impl ScriptedSite {
    /// Site with items "1".."n", media `item-<id>`
    pub fn with_items(n: usize) -> Self {
        let site = Self::default();
        for id in 1..=n {
            site.push(&id.to_string(), format!("item-{}", id).as_bytes());
        }
        site
    }

    /// Publish a new newest item
    pub fn push(&self, id: &str, media: &[u8]) {
        self.inner.lock().unwrap().items.push((id.to_string(), media.to_vec()));
    }

    pub fn fail_page(&self, id: &str) {
        self.inner.lock().unwrap().failing_pages.push(id.to_string());
    }

    pub fn fail_media(&self, id: &str) {
        self.inner.lock().unwrap().failing_media.push(id.to_string());
    }

    pub fn page_fetches(&self) -> usize {
        self.inner.lock().unwrap().page_fetches
    }

    pub fn url(id: &str) -> String {
        format!("https://comic.test/{}/", id)
    }

    fn id_from_url(url: &str) -> Option<String> {
        url.strip_prefix("https://comic.test/")
            .map(|rest| rest.trim_end_matches('/').to_string())
    }
}

/// Adapter over a [`ScriptedSite`]
pub struct ScriptedAdapter {
    key: String,
    site: ScriptedSite,
}

impl ScriptedAdapter {
    pub fn new(key: &str, site: ScriptedSite) -> Self {
        Self {
            key: key.to_string(),
            site,
        }
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch_page(&self, url: Option<&str>) -> Result<PageInfo, HarvestError> {
        let mut state = self.site.inner.lock().unwrap();
        state.page_fetches += 1;

        let requested = url.unwrap_or("https://comic.test/");
        let position = match url.and_then(ScriptedSite::id_from_url).filter(|id| !id.is_empty()) {
            Some(id) => state.items.iter().position(|(item, _)| *item == id),
            None => state.items.len().checked_sub(1),
        }
        .ok_or_else(|| HarvestError::fetch(requested, "HTTP 404"))?;

        let id = state.items[position].0.clone();
        if state.failing_pages.contains(&id) {
            return Err(HarvestError::fetch(requested, "HTTP 500"));
        }

        let url_at = |i: usize| ScriptedSite::url(&state.items[i].0);
        let links = NavLinks {
            first: Some(url_at(0)),
            prev: position.checked_sub(1).map(url_at),
            next: (position + 1 < state.items.len()).then(|| url_at(position + 1)),
            last: Some(url_at(state.items.len() - 1)),
        };

        Ok(PageInfo::new(
            id.clone(),
            ScriptedSite::url(&id),
            format!("https://img.comic.test/{}.png", id),
        )
        .with_links(links)
        .with_info("title", format!("Comic {}", id)))
    }

    async fn fetch_media(&self, page: &PageInfo) -> Result<Media, HarvestError> {
        let state = self.site.inner.lock().unwrap();
        if state.failing_media.contains(&page.item_id) {
            return Err(HarvestError::fetch(&page.media_url, "connection reset"));
        }
        let bytes = state
            .items
            .iter()
            .find(|(id, _)| *id == page.item_id)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| HarvestError::fetch(&page.media_url, "HTTP 404"))?;
        Ok(Media {
            bytes,
            mime: "image/png".to_string(),
        })
    }

    fn storage_path(&self, _page: &PageInfo) -> PathBuf {
        PathBuf::from(&self.key)
    }

    fn media_filename(&self, page: &PageInfo, extension: &str) -> String {
        format!("{}.{}.{}", self.key, page.item_id, extension)
    }

    fn metadata_filename(&self, page: &PageInfo) -> String {
        format!("{}.{}.yml", self.key, page.item_id)
    }
}

/// Registry holding the scripted adapter under [`MODULE`]
pub fn registry(site: &ScriptedSite) -> AdapterRegistry {
    let mut registry = AdapterRegistry::empty();
    register_site(&mut registry, MODULE, site);
    registry
}

/// Register an adapter over `site` under `module`, keyed by the module name
pub fn register_site(registry: &mut AdapterRegistry, module: &str, site: &ScriptedSite) {
    let site = site.clone();
    let default_key = module.to_string();
    registry.register(module, move |source: &SourceConfig| {
        let key = source.key.clone().unwrap_or_else(|| default_key.clone());
        Ok(Box::new(ScriptedAdapter::new(&key, site.clone())) as Box<dyn SourceAdapter>)
    });
}

/// Source definition over the scripted module
pub fn source(name: &str, mode: RunMode, batch_size: usize) -> SourceConfig {
    let mut source = SourceConfig::new(name, MODULE);
    source.mode = mode;
    source.batch_size = batch_size;
    source
}

/// Settings rooted in `root`, with or without the SQLite backend
pub fn settings(root: &Path, database: bool, max_batch_size: usize) -> Settings {
    let mut file = ConfigFile::default();
    file.harvest.max_batch_size = Some(max_batch_size);
    if database {
        file.store.database = Some("gleaner.sqlite".to_string());
    }
    file.digest.max_message_bytes = Some(1024);

    Settings::resolve(Some(root.join("config.yaml").as_path()), file, |_| None).unwrap()
}

/// Digest sender keeping messages in memory
#[derive(Clone, Default)]
pub struct RecordingSender {
    pub sent: Arc<Mutex<Vec<RenderedMessage>>>,
}

impl RecordingSender {
    pub fn subjects(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.subject.clone()).collect()
    }
}

#[async_trait]
impl DigestSender for RecordingSender {
    async fn send(&self, message: &RenderedMessage) -> Result<(), HarvestError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
