use crate::content::Enricher;
use crate::feed::parser::{build_item, parse_feed, FetchedFeed};
use crate::storage::Item;
use crate::util::RateLimiter;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

const MAX_RETRIES: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("feedfold/", env!("CARGO_PKG_VERSION"));

/// Errors that can occur while fetching one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Request exceeded the 30-second timeout
    #[error("Request timed out")]
    Timeout,
    /// The body is not RSS, Atom or JSON Feed
    #[error("Parse error: {0}")]
    Parse(String),
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

/// Retrieves and parses one remote feed document.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError>;
}

/// Build the shared HTTP client: pooled connections, bounded redirects.
pub fn build_http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(redirect_policy())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(REQUEST_TIMEOUT)
        .build()
}

fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 5 {
            return attempt.error("Too many redirects (max 5)");
        }
        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }
        tracing::debug!(
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );
        attempt.follow()
    })
}

/// [`FeedFetcher`] over HTTP with retry on 429, 5xx and truncated bodies.
#[derive(Debug, Clone)]
pub struct HttpFeedFetcher {
    client: reqwest::Client,
    backoff_base: Duration,
}

impl HttpFeedFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            backoff_base: Duration::from_secs(1),
        }
    }

    /// Scale the retry delays (`base * 2^attempt`).
    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base * 2u32.pow(retry + 1) // 2s, 4s, 8s
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let mut retry_count = 0;

        loop {
            let response = tokio::time::timeout(REQUEST_TIMEOUT, self.client.get(url).send())
                .await
                .map_err(|_| FetchError::Timeout)?
                .map_err(FetchError::Network)?;
            let status = response.status();

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                if retry_count >= MAX_RETRIES {
                    return Err(if status.is_server_error() {
                        FetchError::HttpStatus(status.as_u16())
                    } else {
                        FetchError::RateLimited(MAX_RETRIES)
                    });
                }
                let delay = self.backoff(retry_count);
                tracing::warn!(
                    feed = %url,
                    status = %status,
                    retry = retry_count,
                    delay_ms = delay.as_millis() as u64,
                    "Feed server refused, backing off"
                );
                tokio::time::sleep(delay).await;
                retry_count += 1;
                continue;
            }

            // 4xx other than 429 fail immediately
            if !status.is_success() {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            match read_limited_bytes(response, MAX_FEED_SIZE).await {
                Ok(bytes) => return Ok(bytes),
                Err(FetchError::IncompleteResponse { expected, received })
                    if retry_count < MAX_RETRIES =>
                {
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        feed = %url,
                        expected = expected,
                        received = received,
                        attempt = retry_count + 1,
                        "Retrying incomplete download"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedFeed, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        parse_feed(&bytes).map_err(|e| FetchError::Parse(e.to_string()))
    }
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

// ============================================================================
// Refresh
// ============================================================================

/// Outcome of refreshing one feed.
#[derive(Debug)]
pub struct FetchResult {
    pub feed_url: String,
    /// Converted items, or why the feed contributed none.
    pub result: Result<Vec<Item>, FetchError>,
}

/// Refresh settings shared by every feed of one pass.
pub struct RefreshOptions<'a> {
    pub limiter: &'a RateLimiter,
    /// Feeds fetched at the same time. Zero is treated as one.
    pub concurrency: usize,
    pub enricher: Option<&'a dyn Enricher>,
}

/// Fetch and convert every feed.
///
/// Feeds run with bounded concurrency, each start gated by the rate limiter.
/// Results come back in input order. A failing feed is logged and reported in
/// its [`FetchResult`]; the other feeds are unaffected.
pub async fn refresh_all(
    fetcher: &dyn FeedFetcher,
    feeds: &[String],
    options: RefreshOptions<'_>,
) -> Vec<FetchResult> {
    if feeds.is_empty() {
        return Vec::new();
    }
    let RefreshOptions {
        limiter,
        concurrency,
        enricher,
    } = options;

    let results: Vec<FetchResult> = stream::iter(feeds)
        .map(|url| async move {
            limiter.acquire().await;
            let result = match fetcher.fetch(url).await {
                Ok(feed) => Ok(convert(url, feed, enricher).await),
                Err(e) => {
                    tracing::warn!(feed = %url, error = %e, "Feed refresh failed");
                    Err(e)
                }
            };
            FetchResult {
                feed_url: url.clone(),
                result,
            }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let failed = results.iter().filter(|r| r.result.is_err()).count();
    tracing::info!(feeds = feeds.len(), failed = failed, "Refreshed feeds");
    results
}

async fn convert(url: &str, feed: FetchedFeed, enricher: Option<&dyn Enricher>) -> Vec<Item> {
    let mut items = Vec::with_capacity(feed.entries.len());
    for entry in &feed.entries {
        let enriched = match (enricher, entry.link.as_deref()) {
            (Some(enricher), Some(link)) => enricher.fetch_summary(link).await,
            _ => None,
        };
        items.push(build_item(
            url,
            entry,
            &feed.title,
            feed.image.as_deref(),
            enriched,
        ));
    }
    items
}

/// Flatten refresh results into one item list, in feed order.
pub fn collect_items(results: Vec<FetchResult>) -> Vec<Item> {
    results
        .into_iter()
        .filter_map(|r| r.result.ok())
        .flatten()
        .collect()
}
