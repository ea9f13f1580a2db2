//! YouTube channel page → channel RSS feed resolution.
//!
//! Channel pages (`/@handle`, `/channel/…`, `/user/…`, `/c/…`) are not feeds.
//! Their `/about` page embeds the channel feed address as `"rssUrl":"…"`.
use futures::StreamExt;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::feed::parser::is_youtube_feed;
use crate::util::host_matches;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_DISCOVERY_SIZE: usize = 5 * 1024 * 1024; // 5MB
const RSS_URL_MARKER: &str = "\"rssUrl\":\"";
const CHANNEL_FEED_PREFIX: &str = "https://www.youtube.com/feeds/videos.xml?channel_id=";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("request timed out")]
    Timeout,
    #[error("response too large")]
    TooLarge,
    #[error("no channel feed address on page")]
    NotFound,
}

/// The `/about` page of a YouTube channel URL, or `None` when `url` is not a
/// channel page (including when it already is a channel feed).
pub fn channel_about_url(url: &str) -> Option<String> {
    if !host_matches(url, "youtube.com") || is_youtube_feed(url) {
        return None;
    }
    let parsed = Url::parse(url.trim()).ok()?;
    let path = parsed.path().trim_end_matches('/');
    let is_channel = path.starts_with("/@")
        || ["/channel/", "/user/", "/c/"]
            .iter()
            .any(|prefix| path.starts_with(prefix));
    if !is_channel {
        return None;
    }

    let about_path = if path.ends_with("/about") {
        path.to_owned()
    } else {
        format!("{path}/about")
    };
    let mut about = parsed;
    about.set_path(&about_path);
    about.set_query(None);
    about.set_fragment(None);
    Some(about.into())
}

/// Pull the channel feed address out of a channel page.
pub fn extract_rss_url(html: &str) -> Option<String> {
    let start = html.find(RSS_URL_MARKER)? + RSS_URL_MARKER.len();
    let rest = &html[start..];
    let raw = &rest[..rest.find('"')?];
    let url = raw.replace("\\u0026", "&").replace("\\/", "/");
    url.starts_with(CHANNEL_FEED_PREFIX).then_some(url)
}

/// Fetch a channel `/about` page and extract its feed address.
pub async fn fetch_rss_url(
    client: &reqwest::Client,
    about_url: &str,
) -> Result<String, DiscoveryError> {
    let response = tokio::time::timeout(DISCOVERY_TIMEOUT, client.get(about_url).send())
        .await
        .map_err(|_| DiscoveryError::Timeout)?
        .map_err(DiscoveryError::Network)?;

    if !response.status().is_success() {
        return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
    }

    let bytes = read_discovery_bytes(response).await?;
    extract_rss_url(&String::from_utf8_lossy(&bytes)).ok_or(DiscoveryError::NotFound)
}

/// Resolve a YouTube channel page to its RSS feed.
///
/// Returns `None` for anything that is not a channel page and for every
/// lookup failure, so callers keep the URL they were given.
pub async fn resolve_youtube_feed_url(client: &reqwest::Client, url: &str) -> Option<String> {
    let about_url = channel_about_url(url)?;
    match fetch_rss_url(client, &about_url).await {
        Ok(rss) => {
            tracing::info!(channel = %url, feed = %rss, "Resolved YouTube channel feed");
            Some(rss)
        }
        Err(e) => {
            tracing::warn!(channel = %url, error = %e, "YouTube channel resolution failed");
            None
        }
    }
}

async fn read_discovery_bytes(response: reqwest::Response) -> Result<Vec<u8>, DiscoveryError> {
    if let Some(len) = response.content_length() {
        if len > MAX_DISCOVERY_SIZE as u64 {
            return Err(DiscoveryError::TooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len() + chunk.len() > MAX_DISCOVERY_SIZE {
            return Err(DiscoveryError::TooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}
