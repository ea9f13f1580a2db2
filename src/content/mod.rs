//! Third-party enrichment of fetched entries.
//!
//! An [`Enricher`] looks at an entry's link and, when it recognises the
//! target, returns richer metadata that replaces the entry's own summary.

mod bluesky;

use async_trait::async_trait;
use serde_json::Value;

pub use bluesky::{parse_post_link, render_summary, BlueskyEnricher, EnrichError};

/// Metadata recovered for one linked post.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichedPost {
    /// HTML rendering used as the item summary.
    pub summary_html: String,
    pub like_count: Option<i64>,
    pub author_avatar: Option<String>,
    pub author_handle: Option<String>,
    /// Display name, falling back to the handle.
    pub author_display: Option<String>,
    /// The raw lookup response, kept on the item.
    pub raw: Value,
}

impl EnrichedPost {
    /// Name to use as the item title.
    pub fn author_title(&self) -> Option<&str> {
        self.author_display.as_deref().filter(|name| !name.is_empty())
    }
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Look up `link`. Any failure, or a link this enricher does not handle,
    /// yields `None`.
    async fn fetch_summary(&self, link: &str) -> Option<EnrichedPost>;
}
