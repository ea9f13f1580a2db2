//! Remote feed collaborators.
//!
//! - [`parser`] - feed-rs parsing and entry → cache item conversion
//! - [`fetcher`] - HTTP fetching with retry, and the rate-limited refresh pass
//! - [`opml`] - OPML subscription import/export
//! - [`discovery`] - YouTube channel page → channel feed resolution

pub mod discovery;
pub mod fetcher;
pub mod opml;
pub mod parser;

pub use discovery::resolve_youtube_feed_url;
pub use fetcher::{
    build_http_client, collect_items, refresh_all, FeedFetcher, FetchError, FetchResult,
    HttpFeedFetcher, RefreshOptions,
};
pub use opml::{export_opml, parse_opml, OpmlError, OpmlFeed};
pub use parser::{display_feed_title, FeedEntry, FetchedFeed};
