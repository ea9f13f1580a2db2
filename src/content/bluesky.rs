use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use html_escape::{encode_double_quoted_attribute, encode_text};
use serde_json::Value;
use thiserror::Error;
use url::Url;

use super::{EnrichedPost, Enricher};
use crate::storage::parse_count;
use crate::util::{host_matches, RateLimiter};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_RESPONSE_SIZE: u64 = 2 * 1024 * 1024; // 2MB

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Request timed out after 10s")]
    Timeout,
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    #[error("Response too large")]
    ResponseTooLarge,
    #[error("Invalid API URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Handle {0} did not resolve to a DID")]
    UnresolvedHandle(String),
}

/// Split a `bsky.app/profile/{handle}/post/{rkey}` link.
pub fn parse_post_link(link: &str) -> Option<(String, String)> {
    if !host_matches(link, "bsky.app") {
        return None;
    }
    let url = Url::parse(link.trim()).ok()?;
    let parts: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    match parts.as_slice() {
        ["profile", handle, "post", rkey, ..] => Some(((*handle).to_owned(), (*rkey).to_owned())),
        _ => None,
    }
}

/// Enriches Bluesky post links through the public AppView API.
#[derive(Debug, Clone)]
pub struct BlueskyEnricher {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl BlueskyEnricher {
    /// `base_url` is the XRPC root, e.g. `https://public.api.bsky.app/xrpc`.
    pub fn new(client: reqwest::Client, base_url: &str, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            limiter,
        }
    }

    async fn fetch_thread(&self, handle: &str, rkey: &str) -> Result<Value, EnrichError> {
        let resolved = self
            .get_json("com.atproto.identity.resolveHandle", &[("handle", handle)])
            .await?;
        let did = resolved
            .get("did")
            .and_then(Value::as_str)
            .filter(|did| !did.is_empty())
            .ok_or_else(|| EnrichError::UnresolvedHandle(handle.to_owned()))?;

        let uri = format!("at://{did}/app.bsky.feed.post/{rkey}");
        self.get_json("app.bsky.feed.getPostThread", &[("uri", uri.as_str())])
            .await
    }

    async fn get_json(&self, method: &str, params: &[(&str, &str)]) -> Result<Value, EnrichError> {
        let url = Url::parse_with_params(&format!("{}/{}", self.base_url, method), params)?;

        self.limiter.acquire().await;
        let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.get(url).send())
            .await
            .map_err(|_| EnrichError::Timeout)?
            .map_err(EnrichError::Network)?;

        if !response.status().is_success() {
            return Err(EnrichError::HttpStatus(response.status().as_u16()));
        }
        if response
            .content_length()
            .is_some_and(|len| len > MAX_RESPONSE_SIZE)
        {
            return Err(EnrichError::ResponseTooLarge);
        }

        let bytes = response.bytes().await?;
        if bytes.len() as u64 > MAX_RESPONSE_SIZE {
            return Err(EnrichError::ResponseTooLarge);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl Enricher for BlueskyEnricher {
    async fn fetch_summary(&self, link: &str) -> Option<EnrichedPost> {
        let (handle, rkey) = parse_post_link(link)?;
        match self.fetch_thread(&handle, &rkey).await {
            Ok(raw) => Some(post_from_thread(raw)),
            Err(e) => {
                tracing::debug!(link = %link, error = %e, "Bluesky lookup failed, keeping feed summary");
                None
            }
        }
    }
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn post_from_thread(raw: Value) -> EnrichedPost {
    let post = &raw["thread"]["post"];
    let author = &post["author"];
    let author_handle = text_field(author, "handle");
    let author_display = text_field(author, "displayName").or_else(|| author_handle.clone());

    let rendered = render_summary(&raw);
    EnrichedPost {
        summary_html: if rendered.is_empty() {
            raw.to_string()
        } else {
            rendered
        },
        like_count: parse_count(&post["likeCount"]),
        author_avatar: text_field(author, "avatar"),
        author_handle,
        author_display,
        raw,
    }
}

/// Render a `getPostThread` response as summary HTML: the post text, any
/// attached images and an engagement line.
pub fn render_summary(thread: &Value) -> String {
    let post = &thread["thread"]["post"];
    if !post.is_object() {
        return String::new();
    }
    let record = &post["record"];
    let text = record["text"].as_str().unwrap_or_default();

    let mut parts = Vec::new();
    if !text.is_empty() {
        parts.push(format!("<div>{}</div>", encode_text(text).replace('\n', "<br/>")));
    }

    let embed = [&post["embed"], &record["embed"]]
        .into_iter()
        .find(|e| e.is_object());
    let images: String = embed
        .filter(|e| {
            e["$type"]
                .as_str()
                .is_some_and(|t| t.starts_with("app.bsky.embed.images"))
        })
        .and_then(|e| e["images"].as_array())
        .into_iter()
        .flatten()
        .filter_map(|img| {
            let src = text_field(img, "fullsize").or_else(|| text_field(img, "thumb"))?;
            let alt = img["alt"].as_str().unwrap_or_default();
            Some(format!(
                "<div><img src=\"{}\" alt=\"{}\" style=\"max-width:100%;height:auto;\"/></div>",
                encode_double_quoted_attribute(&src),
                encode_double_quoted_attribute(alt)
            ))
        })
        .collect();
    if !images.is_empty() {
        parts.push(images);
    }

    let count = |key: &str| parse_count(&post[key]).unwrap_or(0);
    parts.push(format!(
        "<div><small>Replies: {} · Reposts: {} · Likes: {} · Quotes: {}</small></div>",
        count("replyCount"),
        count("repostCount"),
        count("likeCount"),
        count("quoteCount")
    ));
    parts.join("\n")
}
