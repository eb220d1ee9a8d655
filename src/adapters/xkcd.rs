//! xkcd.com adapter.
//!
//! Pages carry their title and canonical URL in OpenGraph `meta` tags, with
//! the `<title>` element and the "Permanent link" line as fallbacks. The
//! comic number is the last path segment of the canonical URL; navigation
//! comes from the `ul.comicNav` bar.

use std::path::PathBuf;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use super::{HttpClient, SourceAdapter};
use crate::config::SourceConfig;
use crate::core::HarvestError;
use crate::domain::{Media, NavLinks, PageInfo};

pub const DEFAULT_KEY: &str = "xkcd";
pub const DEFAULT_URL: &str = "https://xkcd.com/";

/// Items per storage directory
const ID_PATH_DIVIDER: u64 = 100;

const PERMALINK_MARKER: &str = "Permanent link to this comic:";

/// Adapter for xkcd-style comic pages
#[derive(Debug, Clone)]
pub struct XkcdAdapter {
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

    Ok(Box::new(XkcdAdapter {
        key: source.key.clone().unwrap_or_else(|| DEFAULT_KEY.to_string()),
        landing_url,
        http: http.clone(),
    }))
}

impl XkcdAdapter {
    pub fn new(http: HttpClient) -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            landing_url: DEFAULT_URL.to_string(),
            http,
        }
    }

    fn numeric_id(page: &PageInfo) -> u64 {
        page.item_id.parse().unwrap_or(0)
    }
}

#[async_trait]
impl SourceAdapter for XkcdAdapter {
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

    fn storage_path(&self, page: &PageInfo) -> PathBuf {
        let group = (Self::numeric_id(page) / ID_PATH_DIVIDER) * ID_PATH_DIVIDER;
        PathBuf::from(&self.key).join(format!("{:04}", group))
    }

    fn media_filename(&self, page: &PageInfo, extension: &str) -> String {
        let id = Self::numeric_id(page);
        match page.info_str("image_stem") {
            Some(stem) => format!("{}.{:05}-{}.{}", self.key, id, stem, extension),
            None => format!("{}.{:05}.{}", self.key, id, extension),
        }
    }

    fn metadata_filename(&self, page: &PageInfo) -> String {
        format!("{}.{:05}.yml", self.key, Self::numeric_id(page))
    }
}

fn selector(css: &str) -> Result<Selector, HarvestError> {
    Selector::parse(css).map_err(|e| HarvestError::config(DEFAULT_KEY, format!("bad selector '{}': {:?}", css, e)))
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Extract page data from an xkcd page body. `here` is the URL the body
/// was fetched from.
pub fn parse_page(body: &str, here: &str) -> Result<PageInfo, HarvestError> {
    let html = Html::parse_document(body);
    let base = Url::parse(here).map_err(|e| HarvestError::fetch(here, e))?;

    let mut title = None;
    let mut canonical = None;
    for meta in html.select(&selector("meta[property]")?) {
        let property = meta.value().attr("property").unwrap_or_default();
        let content = meta.value().attr("content").map(str::to_string);
        match property.trim_start_matches("og:") {
            "title" => title = content,
            "url" => canonical = content,
            _ => {}
        }
    }

    let title = match title {
        Some(title) => title,
        None => html
            .select(&selector("head title")?)
            .next()
            .map(text_of)
            .map(|t| t.strip_prefix("xkcd:").unwrap_or(t.as_str()).trim().to_string())
            .ok_or_else(|| HarvestError::fetch(here, "page has no title"))?,
    };
    let canonical = match canonical {
        Some(url) => url,
        None => permalink(body).unwrap_or_else(|| here.to_string()),
    };

    let item_id = extract_id(&canonical).ok_or_else(|| {
        HarvestError::fetch(here, format!("no comic number in '{}'", canonical))
    })?;
    // File names are derived from the number
    if item_id.parse::<u64>().is_err() {
        return Err(HarvestError::fetch(
            here,
            format!("comic number '{}' out of range", item_id),
        ));
    }
    let page_url = Url::parse(&canonical).unwrap_or_else(|_| base.clone());

    let links = nav_links(&html, &page_url)?;

    let img = html
        .select(&selector("img[alt]")?)
        .find(|img| img.value().attr("alt") == Some(title.as_str()))
        .ok_or_else(|| HarvestError::fetch(here, format!("no image titled '{}'", title)))?;
    let src = img
        .value()
        .attr("src")
        .ok_or_else(|| HarvestError::fetch(here, "comic image has no src"))?;
    let media_url = page_url
        .join(src)
        .map_err(|e| HarvestError::fetch(here, format!("bad image src '{}': {}", src, e)))?;

    let mut page = PageInfo::new(item_id.clone(), page_url.to_string(), media_url.to_string())
        .with_links(links)
        .with_info("title", title)
        .with_info("url", page_url.to_string())
        .with_info("id", item_id);
    if let Some(comment) = img.value().attr("title") {
        page = page.with_info("comment", comment);
    }
    if let Some(stem) = image_stem(media_url.path()) {
        page = page.with_info("image_stem", stem);
    }

    debug!(item = %page.item_id, media = %page.media_url, "Parsed xkcd page");
    Ok(page)
}

/// Link text following the "Permanent link" marker
fn permalink(body: &str) -> Option<String> {
    let rest = &body[body.find(PERMALINK_MARKER)? + PERMALINK_MARKER.len()..];
    let fragment = Html::parse_fragment(rest);
    let anchor = Selector::parse("a").ok()?;
    let link = fragment.select(&anchor).next().map(text_of)?;
    (!link.is_empty()).then_some(link)
}

fn nav_links(html: &Html, here: &Url) -> Result<NavLinks, HarvestError> {
    let mut links = NavLinks::default();

    for anchor in html.select(&selector("ul.comicNav a")?) {
        let label = text_of(anchor);
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        // "#" is the page itself and "/" the newest comic, neither usable
        if href == "#" || href == "/" {
            continue;
        }
        let Ok(dest) = here.join(href) else {
            debug!(%href, "Skipping unparseable navigation link");
            continue;
        };
        if dest == *here {
            continue;
        }

        let slot = match label.as_str() {
            "|<" => &mut links.first,
            "< Prev" => &mut links.prev,
            "Next >" => &mut links.next,
            ">|" => &mut links.last,
            _ => continue,
        };
        *slot = Some(dest.to_string());
    }

    Ok(links)
}

/// Comic number: the last non-empty path segment, all digits
fn extract_id(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    segment
        .chars()
        .all(|c| c.is_ascii_digit())
        .then(|| segment.to_string())
}

/// File stem of the image, e.g. `barrel_cropped_(1)` for `/comics/barrel_cropped_(1).jpg`
fn image_stem(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, _ext) = name.rsplit_once('.')?;
    (!stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
<title>xkcd: Barrel - Part 1</title>
<meta property="og:title" content="Barrel - Part 1">
<meta property="og:url" content="https://xkcd.com/2/">
</head>
<body>
<ul class="comicNav">
<li><a href="/1/">|&lt;</a></li>
<li><a rel="prev" href="/1/" accesskey="p">&lt; Prev</a></li>
<li><a href="//c.xkcd.com/random/comic/">Random</a></li>
<li><a rel="next" href="/3/" accesskey="n">Next &gt;</a></li>
<li><a href="/">&gt;|</a></li>
</ul>
<div id="comic">
<img src="//imgs.xkcd.com/comics/tree_cropped_(1).jpg" title="'Petit' being a reference to Le Petit Prince" alt="Barrel - Part 1" />
</div>
Permanent link to this comic: <a href="https://xkcd.com/2/">https://xkcd.com/2/</a>
</body>
</html>"#;

    #[test]
    fn test_parse_page() {
        let page = parse_page(PAGE, "https://xkcd.com/2/").unwrap();

        assert_eq!(page.item_id, "2");
        assert_eq!(page.url, "https://xkcd.com/2/");
        assert_eq!(page.media_url, "https://imgs.xkcd.com/comics/tree_cropped_(1).jpg");
        assert_eq!(page.info_str("title"), Some("Barrel - Part 1"));
        assert_eq!(
            page.info_str("comment"),
            Some("'Petit' being a reference to Le Petit Prince")
        );
        assert_eq!(page.info_str("image_stem"), Some("tree_cropped_(1)"));

        assert_eq!(page.links.first.as_deref(), Some("https://xkcd.com/1/"));
        assert_eq!(page.links.prev.as_deref(), Some("https://xkcd.com/1/"));
        assert_eq!(page.links.next.as_deref(), Some("https://xkcd.com/3/"));
        assert_eq!(page.links.last, None);
    }

    #[test]
    fn test_parse_page_without_og_metas() {
        let body = PAGE
            .replace(r#"<meta property="og:title" content="Barrel - Part 1">"#, "")
            .replace(r#"<meta property="og:url" content="https://xkcd.com/2/">"#, "");

        let page = parse_page(&body, "https://xkcd.com/").unwrap();
        assert_eq!(page.item_id, "2");
        assert_eq!(page.url, "https://xkcd.com/2/");
        assert_eq!(page.info_str("title"), Some("Barrel - Part 1"));
    }

    #[test]
    fn test_newest_page_has_no_forward_links() {
        let body = PAGE
            .replace(r#"href="/3/""#, r##"href="#""##)
            .replace(r#"<a href="/">"#, r##"<a href="#">"##);

        let page = parse_page(&body, "https://xkcd.com/2/").unwrap();
        assert_eq!(page.links.next, None);
        assert_eq!(page.links.last, None);
    }

    #[test]
    fn test_page_without_number_fails() {
        let body = PAGE.replace("https://xkcd.com/2/", "https://xkcd.com/about/");
        let err = parse_page(&body, "https://xkcd.com/about/").unwrap_err();
        assert!(matches!(err, HarvestError::Fetch { .. }));
    }

    #[test]
    fn test_oversized_comic_number_fails() {
        let huge = "https://xkcd.com/123456789012345678901234567890/";
        let body = PAGE.replace("https://xkcd.com/2/", huge);
        let err = parse_page(&body, huge).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_file_naming() {
        let adapter = XkcdAdapter::new(HttpClient::new().unwrap());
        let page = PageInfo::new("1234", "https://xkcd.com/1234/", "https://imgs.xkcd.com/comics/x.png")
            .with_info("image_stem", "douglas_engelbart");

        assert_eq!(adapter.storage_path(&page), PathBuf::from("xkcd").join("1200"));
        assert_eq!(
            adapter.media_filename(&page, "png"),
            "xkcd.01234-douglas_engelbart.png"
        );
        assert_eq!(adapter.metadata_filename(&page), "xkcd.01234.yml");
    }
}
