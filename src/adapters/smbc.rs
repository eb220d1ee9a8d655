//! smbc-comics.com adapter.
//!
//! Each page embeds a JSON-LD block with the comic's name, canonical URL,
//! image and publication date. Items are identified by their publication
//! minute (`20240326T0814`), since the site has no comic numbers.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::DateTime;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{HttpClient, SourceAdapter};
use crate::config::SourceConfig;
use crate::core::HarvestError;
use crate::domain::{Media, NavLinks, PageInfo};

pub const DEFAULT_KEY: &str = "smbc";
pub const DEFAULT_URL: &str = "https://www.smbc-comics.com/";

const TITLE_PREFIX: &str = "Saturday Morning Breakfast Cereal - ";

/// Adapter for Comic Easel pages carrying JSON-LD metadata
#[derive(Debug, Clone)]
pub struct SmbcAdapter {
    key: String,
    landing_url: String,
    http: HttpClient,
}

/// Registry factory. Honors `key` and the `url` parameter.
pub(super) fn build(source: &SourceConfig, http: &HttpClient) -> Result<Box<dyn SourceAdapter>, HarvestError> {
    let landing_url = source
        .params
        .get("url")
        .cloned()
        .unwrap_or_else(|| DEFAULT_URL.to_string());
    Url::parse(&landing_url)
        .map_err(|e| HarvestError::config(&source.name, format!("bad url '{}': {}", landing_url, e)))?;

    Ok(Box::new(SmbcAdapter {
        key: source.key.clone().unwrap_or_else(|| DEFAULT_KEY.to_string()),
        landing_url,
        http: http.clone(),
    }))
}

impl SmbcAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            landing_url: DEFAULT_URL.to_string(),
            http,
        }
    }
}

#[async_trait]
impl SourceAdapter for SmbcAdapter {
    fn key(&self) -> &str {
        &self.key
    }

    async fn fetch_page(&self, url: Option<&str>) -> Result<PageInfo, HarvestError> {
        let url = url.unwrap_or(&self.landing_url);
        let document = self.http.get_text(url).await?;
        parse_page(&document.body, &document.url)
    }

    async fn fetch_media(&self, page: &PageInfo) -> Result<Media, HarvestError> {
        self.http.get_media(&page.media_url).await
    }

    /// One directory per publication year
    fn storage_path(&self, page: &PageInfo) -> PathBuf {
        let year = page.item_id.get(..4).unwrap_or("0000");
        PathBuf::from(&self.key).join(year)
    }

    fn media_filename(&self, page: &PageInfo, extension: &str) -> String {
        match page.info_str("slug") {
            Some(slug) => format!("{}.{}-{}.{}", self.key, page.item_id, slug, extension),
            None => format!("{}.{}.{}", self.key, page.item_id, extension),
        }
    }

    fn metadata_filename(&self, page: &PageInfo) -> String {
        format!("{}.{}.yml", self.key, page.item_id)
    }
}

/// The JSON-LD fields the adapter relies on
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ComicMetadata {
    name: String,
    url: String,
    image: String,
    date_published: String,
    #[serde(default)]
    author: Option<serde_json::Value>,
    #[serde(default)]
    about: Option<String>,
}

fn selector(css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css).map_err(|e| HarvestError::config(DEFAULT_KEY, format!("bad selector '{}': {:?}", css, e)))
}

/// Extract page data from an SMBC page body. `here` is the URL the body
/// was fetched from.
pub fn parse_page(body: &str, here: &str) -> Result<PageInfo, HarvestError> {
    let html = Html::parse_document(body);

    let script = html
        .select(&selector(r#"script[type="application/ld+json"]"#)?)
        .next()
        .ok_or_else(|| HarvestError::fetch(here, "page has no JSON-LD metadata"))?;
    let metadata: ComicMetadata = serde_json::from_str(&script.text().collect::<String>())
        .map_err(|e| HarvestError::fetch(here, format!("unreadable JSON-LD metadata: {}", e)))?;

    let item_id = item_id_from_date(&metadata.date_published).ok_or_else(|| {
        HarvestError::fetch(here, format!("bad publication date '{}'", metadata.date_published))
    })?;
    let page_url = Url::parse(&metadata.url)
        .map_err(|e| HarvestError::fetch(here, format!("bad canonical url '{}': {}", metadata.url, e)))?;

    let img = html
        .select(&selector("img#cc-comic")?)
        .next()
        .ok_or_else(|| HarvestError::fetch(here, "no comic image"))?;
    let src = img.value().attr("src").unwrap_or(metadata.image.as_str());
    let media_url = page_url
        .join(src)
        .map_err(|e| HarvestError::fetch(here, format!("bad image src '{}': {}", src, e)))?;

    let title = metadata
        .name
        .strip_prefix(TITLE_PREFIX)
        .unwrap_or(&metadata.name)
        .to_string();

    let mut page = PageInfo::new(item_id.clone(), page_url.to_string(), media_url.to_string())
        .with_links(nav_links(&html, &page_url)?)
        .with_info("title", title)
        .with_info("url", page_url.to_string())
        .with_info("id", item_id)
        .with_info("datePublished", metadata.date_published.clone());
    if let Some(comment) = img.value().attr("title") {
        page = page.with_info("comment", comment);
    }
    if let Some(slug) = slug(&page_url) {
        page = page.with_info("slug", slug);
    }
    if let Some(author) = metadata.author {
        page = page.with_info("author", author);
    }
    if let Some(about) = metadata.about {
        page = page.with_info("about", about);
    }

    debug!(item = %page.item_id, media = %page.media_url, "Parsed smbc page");
    Ok(page)
}

fn nav_links(html: &Html, here: &Url) -> Result<NavLinks, HarvestError> {
    let mut links = NavLinks::default();

    for anchor in html.select(&selector("nav.cc-nav a[rel]")?) {
        let (Some(rel), Some(href)) = (anchor.value().attr("rel"), anchor.value().attr("href")) else {
            continue;
        };
        let Ok(dest) = here.join(href) else {
            debug!(%href, "Skipping unparseable navigation link");
            continue;
        };
        if dest == *here {
            continue;
        }

        let slot = match rel.split_whitespace().next().unwrap_or_default() {
            "first" => &mut links.first,
            "prev" => &mut links.prev,
            "next" => &mut links.next,
            "last" => &mut links.last,
            _ => continue,
        };
        *slot = Some(dest.to_string());
    }

    Ok(links)
}

/// `2024-03-26T08:14:46-04:00` becomes `20240326T0814`
fn item_id_from_date(published: &str) -> Option<String> {
    let date = DateTime::parse_from_rfc3339(published.trim()).ok()?;
    Some(date.format("%Y%m%dT%H%M").to_string())
}

/// Last path segment of the canonical URL, e.g. `fraction` for `/comic/fraction`
fn slug(url: &Url) -> Option<String> {
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    (!segment.contains('.')).then(|| segment.to_string())
}
