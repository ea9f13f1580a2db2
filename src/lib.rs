//! feedfold: feed subscriptions, folders, tags and bookmarks derived from
//! append-only event logs, with a refreshable item cache.
//!
//! - [`storage`] - event logs, item cache, bookmark store
//! - [`state`] - pure folds from events to current state
//! - [`query`] - item filtering, sorting and pagination
//! - [`feed`] - fetching, parsing, OPML, YouTube channel resolution
//! - [`content`] - link enrichment (Bluesky)
//! - [`app`] - the boundary operations
pub mod app;
pub mod config;
pub mod content;
pub mod feed;
pub mod query;
pub mod state;
pub mod storage;
pub mod util;

pub use app::{App, AppError, FeedStateView, ItemRequest, ItemsResponse, StatusResponse};
pub use config::{Config, DataPaths};
