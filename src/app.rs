//! Boundary operations over the event logs and the item cache.
//!
//! Every operation reloads the subscription log, derives the current state
//! and validates against it before appending anything. Validation failures
//! leave the logs and the cache untouched; no-op conditions succeed with a
//! status message.
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::{Config, DataPaths};
use crate::content::{BlueskyEnricher, Enricher};
use crate::feed::{
    build_http_client, collect_items, display_feed_title, export_opml, parse_opml, refresh_all,
    resolve_youtube_feed_url, FeedFetcher, HttpFeedFetcher, OpmlFeed, RefreshOptions,
};
use crate::query::{self, ItemQuery, ItemView, SortKey, TimeRange, ViewFilter};
use crate::state::{normalize_tag, FeedState, FolderPath, DEFAULT_FOLDER};
use crate::storage::{
    format_refreshed, BookmarkStore, CacheError, Event, EventLog, Item, ItemCache, LogError,
};
use crate::util::RateLimiter;

/// Folder filter value that lists bookmarks instead of cached items.
pub const BOOKMARKS_FILTER: &str = "__bookmarks__";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum AppError {
    /// The request was rejected before anything was written.
    #[error("{0}")]
    Validation(String),

    #[error("Event log error: {0}")]
    Storage(#[from] LogError),

    #[error("Item cache error: {0}")]
    Cache(#[from] CacheError),
}

fn invalid(message: &str) -> AppError {
    AppError::Validation(message.to_owned())
}

// ============================================================================
// Responses
// ============================================================================

/// Snapshot of the subscription state returned by every feed and folder
/// operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedStateView {
    pub feeds: Vec<String>,
    pub folders: Vec<FolderPath>,
    pub feed_folders: BTreeMap<String, Vec<FolderPath>>,
    pub favorites: Vec<String>,
    pub tags: BTreeMap<String, Vec<String>>,
    pub feed_titles: BTreeMap<String, String>,
    pub last_refreshed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items_cached: Option<usize>,
}

impl FeedStateView {
    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Acknowledgement for bookmark and viewed-status writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

/// Raw item-query parameters as a caller supplies them.
///
/// Values are normalized leniently: anything unrecognized falls back to its
/// default instead of failing the request.
#[derive(Debug, Clone, Default)]
pub struct ItemRequest {
    /// Page length, `"all"`, or a number. Zero or negative means everything.
    pub limit: Option<String>,
    /// 1-based page number.
    pub page: Option<String>,
    pub view: Option<String>,
    pub include_viewed: bool,
    pub favorites_only: bool,
    pub sort: Option<String>,
    pub range: Option<String>,
    /// Folder path, or [`BOOKMARKS_FILTER`].
    pub folder: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct NormalizedRequest {
    query: ItemQuery,
    page: usize,
    folder: Option<String>,
    favorites_only: bool,
}

impl ItemRequest {
    fn normalize(&self, default_page_size: usize) -> NormalizedRequest {
        let limit = match self.limit.as_deref().map(str::trim) {
            None | Some("") => default_page_size as i64,
            Some(raw) if raw.eq_ignore_ascii_case("all") => 0,
            Some(raw) => raw.parse::<i64>().unwrap_or(default_page_size as i64),
        };
        let limit = usize::try_from(limit).ok().filter(|l| *l > 0);

        let page = self
            .page
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(1)
            .max(1) as usize;

        let view = self
            .view
            .as_deref()
            .and_then(ViewFilter::parse)
            .unwrap_or(if self.include_viewed {
                ViewFilter::All
            } else {
                ViewFilter::Unviewed
            });

        let offset = limit.map_or(0, |l| (page - 1).saturating_mul(l));

        NormalizedRequest {
            query: ItemQuery {
                view,
                range: self
                    .range
                    .as_deref()
                    .and_then(TimeRange::parse)
                    .unwrap_or_default(),
                sort: self
                    .sort
                    .as_deref()
                    .and_then(SortKey::parse)
                    .unwrap_or_default(),
                offset,
                limit,
            },
            page,
            folder: self
                .folder
                .as_deref()
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_owned),
            favorites_only: self.favorites_only,
        }
    }
}

/// One page of items.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemsResponse {
    pub items: Vec<ItemView>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub sort: SortKey,
    pub range: TimeRange,
    pub view: ViewFilter,
    pub last_refreshed: Option<String>,
    pub feed_titles: BTreeMap<String, String>,
}

// ============================================================================
// Service
// ============================================================================

/// The feed service. Cheap to clone; clones share logs, cache and limiters.
#[derive(Clone)]
pub struct App {
    feed_log: Arc<EventLog>,
    bookmarks: Arc<BookmarkStore>,
    cache: Arc<ItemCache>,
    fetcher: Arc<dyn FeedFetcher>,
    enricher: Option<Arc<dyn Enricher>>,
    feed_limiter: Arc<RateLimiter>,
    /// Client for YouTube channel resolution. `None` stores URLs as given.
    resolver: Option<reqwest::Client>,
    concurrency: usize,
    default_page_size: usize,
}

impl App {
    /// Service over `paths` with the given fetcher, no enrichment, no channel
    /// resolution and the default limits.
    pub fn new(paths: &DataPaths, fetcher: Arc<dyn FeedFetcher>) -> Self {
        let defaults = Config::default();
        Self {
            feed_log: Arc::new(EventLog::new(&paths.feed_log)),
            bookmarks: Arc::new(BookmarkStore::new(&paths.bookmarks_log)),
            cache: Arc::new(ItemCache::new(&paths.cache_dir)),
            fetcher,
            enricher: None,
            feed_limiter: Arc::new(RateLimiter::new(defaults.feed_rate_per_second)),
            resolver: None,
            concurrency: defaults.fetch_concurrency,
            default_page_size: defaults.default_page_size,
        }
    }

    /// Fully wired service: HTTP fetcher, YouTube resolution and, when
    /// enabled, Bluesky enrichment.
    pub fn from_config(config: &Config, paths: &DataPaths) -> reqwest::Result<Self> {
        let client = build_http_client()?;
        let fetcher = Arc::new(HttpFeedFetcher::new(client.clone()));

        let mut app = Self::new(paths, fetcher)
            .with_feed_rate(config.feed_rate_per_second)
            .with_concurrency(config.fetch_concurrency)
            .with_default_page_size(config.default_page_size)
            .with_resolver(client.clone());
        if config.enrich_bluesky {
            let limiter = Arc::new(RateLimiter::new(config.enrich_rate_per_second));
            app = app.with_enricher(Arc::new(BlueskyEnricher::new(
                client,
                &config.bluesky_api_base,
                limiter,
            )));
        }
        Ok(app)
    }

    pub fn with_enricher(mut self, enricher: Arc<dyn Enricher>) -> Self {
        self.enricher = Some(enricher);
        self
    }

    pub fn with_resolver(mut self, client: reqwest::Client) -> Self {
        self.resolver = Some(client);
        self
    }

    pub fn with_feed_rate(mut self, per_second: usize) -> Self {
        self.feed_limiter = Arc::new(RateLimiter::new(per_second));
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size;
        self
    }

    async fn load_state(&self) -> Result<FeedState, AppError> {
        Ok(FeedState::derive(&self.feed_log.load().await?))
    }

    async fn last_refreshed(&self) -> Option<String> {
        self.cache.last_refreshed().await.map(format_refreshed)
    }

    async fn state_view(&self, state: &FeedState) -> FeedStateView {
        let cached = self.cache.load().await;
        FeedStateView {
            feeds: state.feeds.clone(),
            folders: state.folder_list(),
            feed_folders: state
                .feed_folders
                .iter()
                .map(|(url, set)| (url.clone(), set.iter().cloned().collect()))
                .collect(),
            favorites: state.favorites(),
            tags: state.present_tags(),
            feed_titles: feed_titles(&cached, state),
            last_refreshed: self.last_refreshed().await,
            message: None,
            resolved_url: None,
            imported: None,
            items_cached: None,
        }
    }

    async fn current_view(&self) -> Result<FeedStateView, AppError> {
        let state = self.load_state().await?;
        Ok(self.state_view(&state).await)
    }

    // ------------------------------------------------------------------------
    // Feeds
    // ------------------------------------------------------------------------

    pub async fn feed_state(&self) -> Result<FeedStateView, AppError> {
        self.current_view().await
    }

    /// Subscribe to `url`, or add a folder membership to an existing feed.
    ///
    /// YouTube channel pages are stored under their channel feed address.
    /// Only a new feed invalidates the item cache.
    pub async fn add_feed(
        &self,
        url: &str,
        folder: Option<&str>,
    ) -> Result<FeedStateView, AppError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(invalid("url is required"));
        }
        let resolved_url = match &self.resolver {
            Some(client) => resolve_youtube_feed_url(client, url).await,
            None => None,
        };
        let url = resolved_url.as_deref().unwrap_or(url);

        // The log keeps the folder as given; replay resolves it through moves.
        let raw_folder = folder.and_then(FolderPath::parse).unwrap_or(FolderPath::Default);
        let state = self.load_state().await?;
        let target = state
            .resolve(raw_folder.as_str())
            .unwrap_or(FolderPath::Default);
        let event = Event::AddFeed {
            url: url.to_owned(),
            folder: raw_folder.as_str().to_owned(),
        };

        let message = if !state.contains_feed(url) {
            self.feed_log.append(&event).await?;
            self.cache.invalidate().await?;
            tracing::info!(feed = %url, folder = %target, "Added feed");
            "added"
        } else if !state.folders_of(url).is_some_and(|set| set.contains(&target)) {
            self.feed_log.append(&event).await?;
            tracing::info!(feed = %url, folder = %target, "Added feed to folder");
            "added to folder"
        } else {
            "already in folder"
        };

        let mut view = self.current_view().await?.with_message(message);
        view.resolved_url = resolved_url;
        Ok(view)
    }

    pub async fn remove_feed(&self, url: &str) -> Result<FeedStateView, AppError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(invalid("url is required"));
        }
        let state = self.load_state().await?;
        if !state.contains_feed(url) {
            return Ok(self.state_view(&state).await.with_message("not present"));
        }

        self.feed_log
            .append(&Event::RemoveFeed {
                url: url.to_owned(),
            })
            .await?;
        self.cache.invalidate().await?;
        tracing::info!(feed = %url, "Removed feed");
        Ok(self.current_view().await?.with_message("removed"))
    }

    /// Subscribe to every feed of an OPML document not already present.
    ///
    /// New feeds land in the root folder. The cache is left alone: items for
    /// imported feeds appear after the next refresh.
    pub async fn import_opml(&self, content: &str) -> Result<FeedStateView, AppError> {
        let parsed = parse_opml(content)
            .map_err(|e| AppError::Validation(format!("failed to parse opml: {e}")))?;
        if parsed.is_empty() {
            let mut view = self.current_view().await?.with_message("no feeds found");
            view.imported = Some(0);
            return Ok(view);
        }

        let state = self.load_state().await?;
        let new_urls: Vec<&str> = parsed
            .iter()
            .map(|f| f.xml_url.as_str())
            .filter(|url| !state.contains_feed(url))
            .collect();
        for url in &new_urls {
            self.feed_log
                .append(&Event::AddFeed {
                    url: (*url).to_owned(),
                    folder: DEFAULT_FOLDER.to_owned(),
                })
                .await?;
        }
        tracing::info!(found = parsed.len(), imported = new_urls.len(), "Imported OPML");

        let mut view = self
            .current_view()
            .await?
            .with_message(format!("imported {} new feeds", new_urls.len()));
        view.imported = Some(new_urls.len());
        Ok(view)
    }

    /// Current subscriptions as an OPML 2.0 document.
    pub async fn export_opml(&self) -> anyhow::Result<String> {
        let state = self.load_state().await?;
        let titles = feed_titles(&self.cache.load().await, &state);
        let feeds: Vec<OpmlFeed> = state
            .feeds
            .iter()
            .map(|url| OpmlFeed {
                title: titles.get(url).cloned().unwrap_or_else(|| url.clone()),
                xml_url: url.clone(),
            })
            .collect();
        export_opml(&feeds)
    }

    /// Refetch every feed and replace the item cache.
    pub async fn refresh(&self) -> Result<FeedStateView, AppError> {
        let state = self.load_state().await?;
        let items = self.rebuild_cache(&state.feeds).await;
        self.cache.save(&items).await?;

        let mut view = self.state_view(&state).await.with_message("refreshed");
        view.items_cached = Some(items.len());
        Ok(view)
    }

    async fn rebuild_cache(&self, feeds: &[String]) -> Vec<Item> {
        let results = refresh_all(
            self.fetcher.as_ref(),
            feeds,
            RefreshOptions {
                limiter: self.feed_limiter.as_ref(),
                concurrency: self.concurrency,
                enricher: self.enricher.as_deref(),
            },
        )
        .await;
        collect_items(results)
    }

    // ------------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------------

    pub async fn tag_feed(&self, url: &str, tag: &str) -> Result<FeedStateView, AppError> {
        self.write_tag(url, tag, true).await
    }

    pub async fn untag_feed(&self, url: &str, tag: &str) -> Result<FeedStateView, AppError> {
        self.write_tag(url, tag, false).await
    }

    async fn write_tag(&self, url: &str, tag: &str, add: bool) -> Result<FeedStateView, AppError> {
        let url = url.trim();
        let tag = normalize_tag(tag);
        if url.is_empty() || tag.is_empty() {
            return Err(invalid("url and tag are required"));
        }
        let state = self.load_state().await?;
        if !state.contains_feed(url) {
            return Err(invalid("feed not present"));
        }

        let (url, event_tag) = (url.to_owned(), tag);
        let (event, message) = if add {
            (Event::TagFeed { url, tag: event_tag }, "tagged")
        } else {
            (Event::UntagFeed { url, tag: event_tag }, "untagged")
        };
        self.feed_log.append(&event).await?;
        Ok(self.current_view().await?.with_message(message))
    }

    // ------------------------------------------------------------------------
    // Folders
    // ------------------------------------------------------------------------

    /// Create folder `name`, under `parent` when given. The parent is taken
    /// literally, not resolved through moves.
    pub async fn add_folder(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<FeedStateView, AppError> {
        let parent = parent.and_then(FolderPath::parse);
        let folder =
            FolderPath::join(parent.as_ref(), name).ok_or_else(|| invalid("name is required"))?;

        let state = self.load_state().await?;
        if state.folder_list().contains(&folder) {
            return Ok(self.state_view(&state).await.with_message("already present"));
        }

        self.feed_log
            .append(&Event::AddFolder {
                folder: folder.as_str().to_owned(),
            })
            .await?;
        tracing::info!(folder = %folder, "Created folder");
        Ok(self.current_view().await?.with_message("folder created"))
    }

    /// Move `folder` and its subtree under `parent`, or to the top level when
    /// no parent is given. Both references are resolved through earlier moves.
    pub async fn move_folder(
        &self,
        folder: &str,
        parent: Option<&str>,
    ) -> Result<FeedStateView, AppError> {
        let state = self.load_state().await?;
        let source = named_folder(&state, folder)?;
        let parent = parent.and_then(|raw| state.resolve(raw));

        if !state.folder_exists(&source) {
            return Err(invalid("folder not present"));
        }
        if parent.as_ref().is_some_and(|p| p.is_within(&source)) {
            return Err(invalid("invalid parent"));
        }
        let new_path = FolderPath::join(parent.as_ref(), source.leaf())
            .ok_or_else(|| invalid("folder is required"))?;
        if new_path == source {
            return Ok(self.state_view(&state).await.with_message("no change"));
        }

        self.feed_log
            .append(&Event::MoveFolder {
                folder: source.as_str().to_owned(),
                parent: parent
                    .as_ref()
                    .map(|p| p.as_str().to_owned())
                    .unwrap_or_default(),
            })
            .await?;
        tracing::info!(from = %source, to = %new_path, "Moved folder");
        Ok(self.current_view().await?.with_message("folder moved"))
    }

    /// Remove `folder` and everything below it. Feeds left without a folder
    /// fall back to the root folder.
    pub async fn remove_folder(&self, folder: &str) -> Result<FeedStateView, AppError> {
        let state = self.load_state().await?;
        let target = named_folder(&state, folder)?;
        if !state.folder_exists(&target) {
            return Err(invalid("folder not present"));
        }

        self.feed_log
            .append(&Event::RemoveFolder {
                folder: target.as_str().to_owned(),
            })
            .await?;
        tracing::info!(folder = %target, "Removed folder");
        Ok(self.current_view().await?.with_message("folder removed"))
    }

    /// Replace every folder membership of `url` with `folder` (root when
    /// absent).
    pub async fn move_feed(
        &self,
        url: &str,
        folder: Option<&str>,
    ) -> Result<FeedStateView, AppError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(invalid("url is required"));
        }
        let state = self.load_state().await?;
        if !state.contains_feed(url) {
            return Err(invalid("feed not present"));
        }

        let raw_folder = folder.and_then(FolderPath::parse).unwrap_or(FolderPath::Default);
        let target = state
            .resolve(raw_folder.as_str())
            .unwrap_or(FolderPath::Default);
        let current = state
            .folders_of(url)
            .cloned()
            .unwrap_or_else(|| BTreeSet::from([FolderPath::Default]));
        if current == BTreeSet::from([target.clone()]) {
            return Ok(self.state_view(&state).await.with_message("no change"));
        }

        self.feed_log
            .append(&Event::MoveFeed {
                url: url.to_owned(),
                folder: raw_folder.as_str().to_owned(),
            })
            .await?;
        Ok(self.current_view().await?.with_message("moved"))
    }

    // ------------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------------

    /// Answer an item query from the cache, rebuilding it first when empty.
    pub async fn list_items(&self, request: &ItemRequest) -> Result<ItemsResponse, AppError> {
        let normalized = request.normalize(self.default_page_size);
        let NormalizedRequest {
            query: item_query,
            page,
            folder,
            favorites_only,
        } = normalized;

        if folder.as_deref() == Some(BOOKMARKS_FILTER) {
            return self.list_bookmarks(item_query, page).await;
        }

        let state = self.load_state().await?;
        let folder_filter = folder.and_then(|raw| state.resolve(&raw));

        let mut allowed: HashSet<String> = state.feeds.iter().cloned().collect();
        if favorites_only {
            let favorites: HashSet<String> = state.favorites().into_iter().collect();
            allowed.retain(|url| favorites.contains(url));
        }
        if let Some(filter) = &folder_filter {
            let in_folder = state.feeds_in_folder(filter);
            allowed.retain(|url| in_folder.contains(url));
        }

        let empty_response = |last_refreshed| ItemsResponse {
            items: Vec::new(),
            total: 0,
            page,
            page_size: item_query.limit.unwrap_or(0),
            sort: item_query.sort,
            range: item_query.range,
            view: item_query.view,
            last_refreshed,
            feed_titles: BTreeMap::new(),
        };
        if (favorites_only || folder_filter.is_some()) && allowed.is_empty() {
            return Ok(empty_response(self.last_refreshed().await));
        }

        let mut items = self.cache.load().await;
        if items.is_empty() && !state.feeds.is_empty() {
            tracing::info!(feeds = state.feeds.len(), "Item cache empty, rebuilding");
            items = self.rebuild_cache(&state.feeds).await;
            if let Err(e) = self.cache.save(&items).await {
                tracing::warn!(error = %e, "Failed to save rebuilt item cache");
            }
        }
        let titles = feed_titles(&items, &state);

        let bookmark_ids = self.bookmarks.ids().await?;
        let result = query::run(
            items,
            &allowed,
            &state.viewed,
            Some(&bookmark_ids),
            &item_query,
            Utc::now().timestamp(),
        );

        Ok(ItemsResponse {
            page_size: item_query.limit.unwrap_or(result.total),
            items: result.items,
            total: result.total,
            page,
            sort: item_query.sort,
            range: item_query.range,
            view: item_query.view,
            last_refreshed: self.last_refreshed().await,
            feed_titles: titles,
        })
    }

    async fn list_bookmarks(
        &self,
        item_query: ItemQuery,
        page: usize,
    ) -> Result<ItemsResponse, AppError> {
        let saved = self.bookmarks.list().await?;
        let total = saved.len();
        let items = query::paginate(saved, item_query.offset, item_query.limit)
            .map(|item| {
                let viewed = ["viewed", "_viewed"]
                    .iter()
                    .any(|key| item.extra.get(*key).is_some_and(is_truthy));
                ItemView::new(item, viewed, Some(true))
            })
            .collect();

        Ok(ItemsResponse {
            items,
            total,
            page,
            page_size: item_query.limit.unwrap_or(total),
            sort: item_query.sort,
            range: item_query.range,
            view: item_query.view,
            last_refreshed: self.last_refreshed().await,
            feed_titles: BTreeMap::new(),
        })
    }

    // ------------------------------------------------------------------------
    // Bookmarks and viewed status
    // ------------------------------------------------------------------------

    /// Save a snapshot of an item. `entry` must be a JSON object.
    pub async fn add_bookmark(&self, entry: Value) -> Result<StatusResponse, AppError> {
        if !entry.is_object() {
            return Err(invalid("entry is required"));
        }
        let item: Item = serde_json::from_value(entry)
            .map_err(|e| AppError::Validation(format!("invalid entry: {e}")))?;
        self.bookmarks.add(item).await?;
        Ok(StatusResponse {
            id: None,
            message: "bookmarked".into(),
        })
    }

    pub async fn remove_bookmark(&self, id: &str) -> Result<StatusResponse, AppError> {
        let id = required_id(id)?;
        self.bookmarks.remove(id).await?;
        Ok(StatusResponse {
            id: Some(id.to_owned()),
            message: "unbookmarked".into(),
        })
    }

    pub async fn mark_viewed(&self, id: &str) -> Result<StatusResponse, AppError> {
        let id = required_id(id)?;
        self.feed_log
            .append(&Event::MarkViewed {
                item_id: id.to_owned(),
            })
            .await?;
        Ok(StatusResponse {
            id: Some(id.to_owned()),
            message: "marked".into(),
        })
    }

    pub async fn unmark_viewed(&self, id: &str) -> Result<StatusResponse, AppError> {
        let id = required_id(id)?;
        self.feed_log
            .append(&Event::UnmarkViewed {
                item_id: id.to_owned(),
            })
            .await?;
        Ok(StatusResponse {
            id: Some(id.to_owned()),
            message: "unmarked".into(),
        })
    }
}

/// Resolve a folder reference that must name a non-root folder.
fn named_folder(state: &FeedState, raw: &str) -> Result<FolderPath, AppError> {
    if raw.trim() == DEFAULT_FOLDER {
        return Err(invalid("folder is required"));
    }
    state
        .resolve(raw)
        .filter(|path| !path.is_default())
        .ok_or_else(|| invalid("folder is required"))
}

fn required_id(id: &str) -> Result<&str, AppError> {
    let id = id.trim();
    if id.is_empty() {
        Err(invalid("id is required"))
    } else {
        Ok(id)
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

/// First non-empty display title per present feed, in cache order.
fn feed_titles(items: &[Item], state: &FeedState) -> BTreeMap<String, String> {
    let mut titles = BTreeMap::new();
    for item in items {
        if titles.contains_key(&item.feed) || !state.contains_feed(&item.feed) {
            continue;
        }
        let title = display_feed_title(&item.feed, &item.feed_title);
        if !title.is_empty() {
            titles.insert(item.feed.clone(), title);
        }
    }
    titles
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request() -> ItemRequest {
        ItemRequest::default()
    }

    #[test]
    fn test_normalize_defaults() {
        let n = request().normalize(30);
        assert_eq!(n.page, 1);
        assert_eq!(n.query.limit, Some(30));
        assert_eq!(n.query.offset, 0);
        assert_eq!(n.query.view, ViewFilter::Unviewed);
        assert_eq!(n.query.sort, SortKey::Recent);
        assert_eq!(n.query.range, TimeRange::All);
        assert_eq!(n.folder, None);
    }

    #[test]
    fn test_normalize_limit_forms() {
        let with_limit = |raw: &str| ItemRequest {
            limit: Some(raw.into()),
            ..request()
        };
        assert_eq!(with_limit("all").normalize(30).query.limit, None);
        assert_eq!(with_limit("ALL").normalize(30).query.limit, None);
        assert_eq!(with_limit("0").normalize(30).query.limit, None);
        assert_eq!(with_limit("-5").normalize(30).query.limit, None);
        assert_eq!(with_limit("12").normalize(30).query.limit, Some(12));
        assert_eq!(with_limit("lots").normalize(30).query.limit, Some(30));
    }

    #[test]
    fn test_normalize_page_and_offset() {
        let n = ItemRequest {
            limit: Some("10".into()),
            page: Some("3".into()),
            ..request()
        }
        .normalize(30);
        assert_eq!((n.page, n.query.offset), (3, 20));

        let n = ItemRequest {
            page: Some("-2".into()),
            ..request()
        }
        .normalize(30);
        assert_eq!((n.page, n.query.offset), (1, 0));

        // Unlimited pages ignore the page number for slicing.
        let n = ItemRequest {
            limit: Some("all".into()),
            page: Some("4".into()),
            ..request()
        }
        .normalize(30);
        assert_eq!((n.page, n.query.offset), (4, 0));
    }

    #[test]
    fn test_normalize_unknown_values_fall_back() {
        let n = ItemRequest {
            view: Some("starred".into()),
            include_viewed: true,
            sort: Some("popular".into()),
            range: Some("year".into()),
            folder: Some("   ".into()),
            ..request()
        }
        .normalize(30);
        assert_eq!(n.query.view, ViewFilter::All);
        assert_eq!(n.query.sort, SortKey::Recent);
        assert_eq!(n.query.range, TimeRange::All);
        assert_eq!(n.folder, None);
    }

    #[test]
    fn test_explicit_view_wins_over_include_viewed() {
        let n = ItemRequest {
            view: Some("viewed".into()),
            include_viewed: false,
            ..request()
        }
        .normalize(30);
        assert_eq!(n.query.view, ViewFilter::Viewed);
    }

    #[test]
    fn test_feed_titles_first_present_wins() {
        let state = FeedState::derive(&[Event::AddFeed {
            url: "https://a.example/rss".into(),
            folder: String::new(),
        }]);
        let item = |feed: &str, title: &str| Item {
            feed: feed.into(),
            feed_title: title.into(),
            ..Item::default()
        };
        let titles = feed_titles(
            &[
                item("https://a.example/rss", ""),
                item("https://a.example/rss", "A Blog"),
                item("https://a.example/rss", "Later"),
                item("https://gone.example/rss", "Removed"),
            ],
            &state,
        );
        assert_eq!(
            titles,
            BTreeMap::from([("https://a.example/rss".to_string(), "A Blog".to_string())])
        );
    }

    #[test]
    fn test_is_truthy() {
        assert!(is_truthy(&Value::Bool(true)));
        assert!(is_truthy(&serde_json::json!(1)));
        assert!(!is_truthy(&serde_json::json!(0)));
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&serde_json::json!("")));
    }
}
