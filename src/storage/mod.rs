mod bookmarks;
mod event_log;
mod item_cache;
mod types;

pub use bookmarks::{materialize, sorted_by_recency, BookmarkStore};
pub use event_log::EventLog;
pub use item_cache::{format_refreshed, ItemCache};
pub use types::{CacheError, Event, Item, LogError};
pub(crate) use types::parse_count;
