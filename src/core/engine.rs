//! Per-source crawl engine.
//!
//! An engine walks one source through its pages, either as a bounded batch
//! (crawl mode) or as a single check of the newest item (poll mode). New
//! items are collected in fetch order; persisting them and advancing the
//! cursor is the orchestrator's job, so a failure here never moves the
//! cursor.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use super::HarvestError;
use crate::adapters::SourceAdapter;
use crate::config::SourceConfig;
use crate::domain::{ContentItem, PageInfo, SourceState};
use crate::store::{StateStore, UnitOfWork};

/// How a source is walked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Fetch only the newest item
    #[default]
    Poll,
    /// Walk forward a batch of items
    Crawl,
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poll" => Ok(Self::Poll),
            "crawl" => Ok(Self::Crawl),
            other => Err(format!("unknown mode '{}' (expected poll or crawl)", other)),
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Poll => f.pad("poll"),
            Self::Crawl => f.pad("crawl"),
        }
    }
}

/// Where a source without a cursor starts crawling
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StartPoint {
    /// The source's "first" link
    First,
    /// The landing page (newest item)
    #[default]
    Last,
    /// A fixed seed URL
    Url(String),
}

impl FromStr for StartPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "*first" => Ok(Self::First),
            "*last" | "" => Ok(Self::Last),
            lower if lower.starts_with("http://") || lower.starts_with("https://") => {
                Ok(Self::Url(s.to_string()))
            }
            _ => Err(format!(
                "bad initial '{}' (expected *first, *last or an http(s) URL)",
                s
            )),
        }
    }
}

impl fmt::Display for StartPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => f.write_str("*first"),
            Self::Last => f.write_str("*last"),
            Self::Url(url) => f.write_str(url),
        }
    }
}

/// Drives one source through crawl or poll mode
pub struct CrawlEngine {
    name: String,
    mode: RunMode,
    start: StartPoint,
    batch_size: usize,
    adapter: Box<dyn SourceAdapter>,
    store: StateStore,
    state: Option<SourceState>,
    results: Vec<ContentItem>,
}

impl CrawlEngine {
    /// Create an engine for a source.
    ///
    /// The crawl batch is the source's batch size capped at `max_batch_size`.
    pub fn new(
        source: &SourceConfig,
        adapter: Box<dyn SourceAdapter>,
        store: StateStore,
        state: Option<SourceState>,
        max_batch_size: usize,
    ) -> Self {
        Self {
            name: source.name.clone(),
            mode: source.mode,
            start: source.initial.clone(),
            batch_size: source.batch_size.min(max_batch_size),
            adapter,
            store,
            state,
            results: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn adapter(&self) -> &dyn SourceAdapter {
        self.adapter.as_ref()
    }

    /// Cursor loaded at construction
    pub fn state(&self) -> Option<&SourceState> {
        self.state.as_ref()
    }

    /// New items fetched so far, in fetch order
    pub fn results(&self) -> &[ContentItem] {
        &self.results
    }

    /// Take the fetched items out of the engine
    pub fn take_results(&mut self) -> Vec<ContentItem> {
        std::mem::take(&mut self.results)
    }

    /// Run the source in its configured mode.
    ///
    /// Errors end the run for this source only: they are logged and the
    /// items fetched before the failure are kept.
    #[instrument(skip(self, uow), fields(source = %self.name, mode = %self.mode))]
    pub async fn run(&mut self, uow: &UnitOfWork) -> usize {
        let outcome = match self.mode {
            RunMode::Crawl => self.crawl(uow, self.batch_size).await,
            RunMode::Poll => self.poll(uow).await,
        };

        if let Err(e) = outcome {
            error!(source = %self.name, error = %e, kept = self.results.len(), "Source run aborted");
        }
        info!(source = %self.name, new_items = self.results.len(), "Source run finished");
        self.results.len()
    }

    /// Walk forward from the cursor (or the configured start) collecting at
    /// most `batch_size` new items.
    pub async fn crawl(&mut self, uow: &UnitOfWork, batch_size: usize) -> Result<usize, HarvestError> {
        let mut remaining = batch_size.min(self.batch_size);
        let found_before = self.results.len();
        if remaining == 0 {
            return Ok(0);
        }

        let mut url = self.resume_url();
        if url.is_none() && self.start == StartPoint::First {
            let landing = self.adapter.fetch_page(None).await?;
            match landing.links.first {
                Some(ref first) if *first != landing.url => url = Some(first.clone()),
                _ => debug!(source = %self.name, "Landing page is the first page"),
            }
        }

        let mut visited = HashSet::new();
        loop {
            let page = self.adapter.fetch_page(url.as_deref()).await?;
            if !visited.insert(page.url.clone()) {
                warn!(source = %self.name, url = %page.url, "Navigation loops back, stopping");
                break;
            }

            let next = page.links.next_from(&page.url).map(str::to_string);
            if self.collect(uow, page).await? {
                remaining -= 1;
            }

            if remaining == 0 {
                debug!(source = %self.name, "Batch exhausted");
                break;
            }
            match next {
                Some(next) => url = Some(next),
                None => {
                    debug!(source = %self.name, "No further pages");
                    break;
                }
            }
        }

        Ok(self.results.len() - found_before)
    }

    /// Check the newest item and collect it when new.
    pub async fn poll(&mut self, uow: &UnitOfWork) -> Result<usize, HarvestError> {
        let landing = self.adapter.fetch_page(None).await?;
        let mut page = match landing.links.last_from(&landing.url) {
            Some(last) => {
                let last = last.to_string();
                self.adapter.fetch_page(Some(&last)).await?
            }
            None => landing,
        };

        let mut visited = HashSet::from([page.url.clone()]);
        while let Some(next) = page.links.next_from(&page.url).map(str::to_string) {
            if !visited.insert(next.clone()) {
                warn!(source = %self.name, url = %next, "Navigation loops back, stopping");
                break;
            }
            page = self.adapter.fetch_page(Some(&next)).await?;
            visited.insert(page.url.clone());
        }

        Ok(usize::from(self.collect(uow, page).await?))
    }

    /// URL to resume from, when a cursor exists
    fn resume_url(&self) -> Option<String> {
        if let Some(url) = self.state.as_ref().and_then(|s| s.last_url.clone()) {
            return Some(url);
        }
        match &self.start {
            StartPoint::Url(url) => Some(url.clone()),
            StartPoint::First | StartPoint::Last => None,
        }
    }

    /// Dedup-check a page and download its media when new
    async fn collect(&mut self, uow: &UnitOfWork, page: PageInfo) -> Result<bool, HarvestError> {
        if self.store.is_retrieved(uow, self.adapter.as_ref(), &page).await? {
            debug!(source = %self.name, item = %page.item_id, "Already retrieved");
            return Ok(false);
        }

        let media = self.adapter.fetch_media(&page).await?;
        let extension = self.adapter.extension_for(&media.mime).ok_or_else(|| {
            HarvestError::fetch(&page.media_url, format!("unsupported media type '{}'", media.mime))
        })?;

        let item = ContentItem::new(self.name.clone(), page, media, extension);
        info!(
            source = %self.name,
            item = %item.item_id(),
            size = item.media_size(),
            "New item"
        );
        self.results.push(item);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_mode() {
        assert_eq!("Crawl".parse::<RunMode>(), Ok(RunMode::Crawl));
        assert_eq!("poll".parse::<RunMode>(), Ok(RunMode::Poll));
        assert!("walk".parse::<RunMode>().is_err());
    }

    #[test]
    fn test_parse_start_point() {
        assert_eq!("*first".parse::<StartPoint>(), Ok(StartPoint::First));
        assert_eq!("*LAST".parse::<StartPoint>(), Ok(StartPoint::Last));
        assert_eq!(
            "https://xkcd.com/1/".parse::<StartPoint>(),
            Ok(StartPoint::Url("https://xkcd.com/1/".to_string()))
        );
        assert!("xkcd.com/1/".parse::<StartPoint>().is_err());
    }
}
