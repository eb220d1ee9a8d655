//! HTTP client shared by the built-in adapters.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::sniff_mime;
use crate::core::HarvestError;
use crate::domain::Media;

const USER_AGENT: &str = concat!("gleaner/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A fetched text document
#[derive(Debug, Clone)]
pub struct Document {
    /// URL after redirects
    pub url: String,
    pub body: String,
}

/// Thin wrapper around a `reqwest::Client`
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a client with the harvester's user agent and timeout
    pub fn new() -> Result<Self, HarvestError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HarvestError::config("http", e))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, HarvestError> {
        debug!(%url, "GET");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HarvestError::fetch(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::fetch(url, format!("HTTP {}", status)));
        }
        Ok(response)
    }

    /// Fetch a page as text
    pub async fn get_text(&self, url: &str) -> Result<Document, HarvestError> {
        let response = self.get(url).await?;
        let final_url = response.url().to_string();
        let body = response
            .text()
            .await
            .map_err(|e| HarvestError::fetch(url, e))?;
        Ok(Document {
            url: final_url,
            body,
        })
    }

    /// Fetch binary media, taking the MIME type from `Content-Type` and
    /// falling back to the leading bytes when the header is missing or
    /// generic.
    pub async fn get_media(&self, url: &str) -> Result<Media, HarvestError> {
        let response = self.get(url).await?;
        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase());

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HarvestError::fetch(url, e))?
            .to_vec();

        let mime = match declared {
            Some(mime) if mime != "application/octet-stream" && !mime.is_empty() => mime,
            _ => sniff_mime(&bytes)
                .map(str::to_string)
                .ok_or_else(|| HarvestError::fetch(url, "unable to determine media type"))?,
        };

        debug!(%url, %mime, size = bytes.len(), "Media fetched");
        Ok(Media { bytes, mime })
    }
}
