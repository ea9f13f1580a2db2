//! Item query pipeline: filter, sort and paginate cached items.
use std::collections::HashSet;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::storage::Item;

// ============================================================================
// Query Parameters
// ============================================================================

/// Which items to keep by viewed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewFilter {
    All,
    Viewed,
    #[default]
    Unviewed,
}

impl ViewFilter {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "all" => Some(Self::All),
            "viewed" => Some(Self::Viewed),
            "unviewed" => Some(Self::Unviewed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Viewed => "viewed",
            Self::Unviewed => "unviewed",
        }
    }

    fn keeps(self, viewed: bool) -> bool {
        match self {
            Self::All => true,
            Self::Viewed => viewed,
            Self::Unviewed => !viewed,
        }
    }
}

/// Publication window relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    #[default]
    All,
    Today,
    Week,
    Month,
}

impl TimeRange {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "all" => Some(Self::All),
            "today" => Some(Self::Today),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
        }
    }

    /// Window length in seconds, `None` for no cutoff.
    pub fn window_secs(self) -> Option<i64> {
        match self {
            Self::All => None,
            Self::Today => Some(86_400),
            Self::Week => Some(604_800),
            Self::Month => Some(2_592_000),
        }
    }
}

/// Result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Recent,
    Views,
    Likes,
}

impl SortKey {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "recent" => Some(Self::Recent),
            "views" => Some(Self::Views),
            "likes" => Some(Self::Likes),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recent => "recent",
            Self::Views => "views",
            Self::Likes => "likes",
        }
    }

    /// Engagement metric for this key. Missing or negative counts rank below
    /// every real count, including zero.
    fn metric(self, item: &Item) -> i64 {
        let value = match self {
            Self::Recent => return 0,
            Self::Views => item.youtube_views,
            Self::Likes => item.like_count,
        };
        value.filter(|v| *v >= 0).unwrap_or(-1)
    }
}

/// A normalized item query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemQuery {
    pub view: ViewFilter,
    pub range: TimeRange,
    pub sort: SortKey,
    pub offset: usize,
    /// Page length. `None` returns everything from `offset` on.
    pub limit: Option<usize>,
}

// ============================================================================
// Results
// ============================================================================

/// An item as returned to callers: the cached fields without the internal
/// timestamp, annotated with viewed and bookmark status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub feed: String,
    pub feed_title: String,
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    pub published: String,
    pub summary: String,
    pub thumbnail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feed_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_views: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bluesky_author_avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bluesky_author_handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bluesky_author_display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bluesky_json: Option<Value>,
    pub viewed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bookmarked: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ItemView {
    pub fn new(item: Item, viewed: bool, bookmarked: Option<bool>) -> Self {
        let mut extra = item.extra;
        for key in ["viewed", "_viewed", "bookmarked"] {
            extra.remove(key);
        }
        Self {
            feed: item.feed,
            feed_title: item.feed_title,
            id: item.id,
            title: item.title,
            link: item.link,
            published: item.published,
            summary: item.summary,
            thumbnail: item.thumbnail,
            feed_image: item.feed_image,
            youtube_views: item.youtube_views,
            like_count: item.like_count,
            bluesky_author_avatar: item.bluesky_author_avatar,
            bluesky_author_handle: item.bluesky_author_handle,
            bluesky_author_display: item.bluesky_author_display,
            bluesky_json: item.bluesky_json,
            viewed,
            bookmarked,
            extra,
        }
    }
}

/// One page of results and the number of matches before pagination.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPage {
    pub items: Vec<ItemView>,
    pub total: usize,
}

// ============================================================================
// Pipeline
// ============================================================================

/// Run the query pipeline over cached items.
///
/// Only items of `allowed` feeds are considered, so an empty `allowed` set
/// yields an empty page. `now` is Unix seconds. When `bookmarked` is given
/// every returned item says whether it is bookmarked.
pub fn run(
    items: Vec<Item>,
    allowed: &HashSet<String>,
    viewed: &HashSet<String>,
    bookmarked: Option<&HashSet<String>>,
    query: &ItemQuery,
    now: i64,
) -> ItemPage {
    let cutoff = query.range.window_secs().map(|secs| now - secs);

    let mut matched: Vec<(Item, bool)> = items
        .into_iter()
        .filter(|item| allowed.contains(&item.feed))
        .map(|item| {
            let is_viewed = viewed.contains(&item.id);
            (item, is_viewed)
        })
        .filter(|(_, is_viewed)| query.view.keeps(*is_viewed))
        .filter(|(item, _)| cutoff.is_none_or(|c| item.timestamp >= c))
        .collect();

    let sort = query.sort;
    // `sort_by` is stable, so equal keys keep cache order.
    matched.sort_by(|(a, _), (b, _)| {
        (sort.metric(b), b.timestamp).cmp(&(sort.metric(a), a.timestamp))
    });

    let total = matched.len();
    let items = paginate(matched, query.offset, query.limit)
        .map(|(item, is_viewed)| {
            let is_bookmarked = bookmarked.map(|ids| ids.contains(&item.id));
            ItemView::new(item, is_viewed, is_bookmarked)
        })
        .collect();

    ItemPage { items, total }
}

/// Slice `[offset, offset + limit)` out of `items`.
pub fn paginate<T>(
    items: Vec<T>,
    offset: usize,
    limit: Option<usize>,
) -> impl Iterator<Item = T> {
    items
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const NOW: i64 = 1_700_000_000;

    fn item(feed: &str, id: &str, ts: i64) -> Item {
        Item {
            feed: feed.into(),
            id: id.into(),
            title: format!("Title {id}"),
            timestamp: ts,
            ..Item::default()
        }
    }

    fn set(values: &[&str]) -> HashSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn ids(page: &ItemPage) -> Vec<&str> {
        page.items.iter().map(|i| i.id.as_str()).collect()
    }

    fn all_query() -> ItemQuery {
        ItemQuery {
            view: ViewFilter::All,
            ..ItemQuery::default()
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!(SortKey::parse("Likes"), Some(SortKey::Likes));
        assert_eq!(TimeRange::parse(" WEEK "), Some(TimeRange::Week));
        assert_eq!(ViewFilter::parse("bogus"), None);
    }

    #[test]
    fn test_empty_allowed_set_returns_nothing() {
        let page = run(
            vec![item("a", "1", NOW)],
            &HashSet::new(),
            &HashSet::new(),
            None,
            &all_query(),
            NOW,
        );
        assert_eq!(page.total, 0);
        assert!(page.items.is_empty());
    }

    #[test]
    fn test_filters_by_allowed_feed() {
        let items = vec![item("a", "1", NOW), item("b", "2", NOW), item("a", "3", NOW - 1)];
        let page = run(items, &set(&["a"]), &HashSet::new(), None, &all_query(), NOW);
        assert_eq!(ids(&page), vec!["1", "3"]);
    }

    #[test]
    fn test_view_filters() {
        let items = || vec![item("a", "1", 3), item("a", "2", 2), item("a", "3", 1)];
        let viewed = set(&["2"]);
        let allowed = set(&["a"]);

        let query = |view| ItemQuery {
            view,
            ..ItemQuery::default()
        };
        let unviewed = run(items(), &allowed, &viewed, None, &query(ViewFilter::Unviewed), NOW);
        assert_eq!(ids(&unviewed), vec!["1", "3"]);

        let only_viewed = run(items(), &allowed, &viewed, None, &query(ViewFilter::Viewed), NOW);
        assert_eq!(ids(&only_viewed), vec!["2"]);
        assert!(only_viewed.items[0].viewed);

        let all = run(items(), &allowed, &viewed, None, &query(ViewFilter::All), NOW);
        assert_eq!(all.total, 3);
    }

    #[test]
    fn test_time_range_cutoff() {
        let items = vec![
            item("a", "fresh", NOW - 100),
            item("a", "edge", NOW - 86_400),
            item("a", "old", NOW - 86_401),
        ];
        let query = ItemQuery {
            range: TimeRange::Today,
            ..all_query()
        };
        let page = run(items, &set(&["a"]), &HashSet::new(), None, &query, NOW);
        assert_eq!(ids(&page), vec!["fresh", "edge"]);
    }

    #[test]
    fn test_likes_sort_puts_missing_last() {
        let mut five = item("a", "five", 1);
        five.like_count = Some(5);
        let none = item("a", "none", 3);
        let mut ten = item("a", "ten", 2);
        ten.like_count = Some(10);

        let query = ItemQuery {
            sort: SortKey::Likes,
            ..all_query()
        };
        let page = run(vec![five, none, ten], &set(&["a"]), &HashSet::new(), None, &query, NOW);
        assert_eq!(ids(&page), vec!["ten", "five", "none"]);
    }

    #[test]
    fn test_zero_views_ranks_above_missing_and_ties_break_on_recency() {
        let mut zero = item("a", "zero", 1);
        zero.youtube_views = Some(0);
        let missing = item("a", "missing", 5);
        let mut tie_old = item("a", "tie_old", 1);
        tie_old.youtube_views = Some(7);
        let mut tie_new = item("a", "tie_new", 2);
        tie_new.youtube_views = Some(7);

        let query = ItemQuery {
            sort: SortKey::Views,
            ..all_query()
        };
        let page = run(
            vec![zero, missing, tie_old, tie_new],
            &set(&["a"]),
            &HashSet::new(),
            None,
            &query,
            NOW,
        );
        assert_eq!(ids(&page), vec!["tie_new", "tie_old", "zero", "missing"]);
    }

    #[test]
    fn test_equal_timestamps_keep_cache_order() {
        let items = vec![item("a", "x", 5), item("a", "y", 5), item("a", "z", 5)];
        let page = run(items, &set(&["a"]), &HashSet::new(), None, &all_query(), NOW);
        assert_eq!(ids(&page), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_bookmark_annotation_only_when_requested() {
        let items = || vec![item("a", "1", 2), item("a", "2", 1)];
        let allowed = set(&["a"]);
        let marks = set(&["2"]);

        let with = run(items(), &allowed, &HashSet::new(), Some(&marks), &all_query(), NOW);
        assert_eq!(with.items[0].bookmarked, Some(false));
        assert_eq!(with.items[1].bookmarked, Some(true));

        let without = run(items(), &allowed, &HashSet::new(), None, &all_query(), NOW);
        assert_eq!(without.items[0].bookmarked, None);
    }

    #[test]
    fn test_view_strips_internal_fields() {
        let mut cached = item("a", "1", 42);
        cached.extra.insert("_viewed".into(), Value::Bool(true));
        cached.extra.insert("author".into(), Value::String("Ann".into()));
        let view = ItemView::new(cached, false, None);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("_ts").is_none());
        assert!(json.get("_viewed").is_none());
        assert!(json.get("bookmarked").is_none());
        assert_eq!(json["viewed"], Value::Bool(false));
        assert_eq!(json["author"], Value::String("Ann".into()));
    }

    proptest! {
        #[test]
        fn prop_pages_partition_sorted_list(
            stamps in prop::collection::vec(0i64..50, 0..60),
        ) {
            let items: Vec<Item> = stamps
                .iter()
                .enumerate()
                .map(|(i, ts)| item("a", &i.to_string(), *ts))
                .collect();
            let allowed = set(&["a"]);
            let none = HashSet::new();

            let everything = run(items.clone(), &allowed, &none, None, &all_query(), NOW);
            let page = |n: usize| {
                let query = ItemQuery { offset: n * 10, limit: Some(10), ..all_query() };
                run(items.clone(), &allowed, &none, None, &query, NOW)
            };
            let (first, second) = (page(0), page(1));

            prop_assert_eq!(first.total, everything.total);
            let first_ids: HashSet<String> = first.items.iter().map(|i| i.id.clone()).collect();
            prop_assert!(second.items.iter().all(|i| !first_ids.contains(&i.id)));

            let joined: Vec<String> = first.items.iter().chain(&second.items).map(|i| i.id.clone()).collect();
            let expected: Vec<String> = everything.items.iter().take(20).map(|i| i.id.clone()).collect();
            prop_assert_eq!(joined, expected);
        }
    }
}
