use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use html_escape::decode_html_entities;
use url::Url;

use crate::content::EnrichedPost;
use crate::storage::Item;
use crate::util::{clean_line, host_matches, http_url};

/// A parsed remote feed document, independent of the fetch mechanism.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedFeed {
    pub title: String,
    /// Channel image, http(s) only.
    pub image: Option<String>,
    pub entries: Vec<FeedEntry>,
}

/// One entry of a fetched feed with the fields item conversion needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedEntry {
    /// The entry's own identifier (guid/id), possibly empty.
    pub id: String,
    pub title: String,
    pub link: Option<String>,
    /// Publication (or update) time as RFC 3339, empty when unknown.
    pub published: String,
    /// Publication time as Unix seconds, 0 when unknown.
    pub timestamp: i64,
    pub author: String,
    pub summary: String,
    /// First http(s) media thumbnail, else first media content URL.
    pub media_image: Option<String>,
    /// View count from media community statistics.
    pub views: Option<i64>,
}

/// Parse RSS, Atom or JSON Feed bytes.
pub fn parse_feed(bytes: &[u8]) -> Result<FetchedFeed, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;
    Ok(convert_feed(feed))
}

fn convert_feed(feed: Feed) -> FetchedFeed {
    let title = feed
        .title
        .map(|t| clean_line(&decode_html_entities(&t.content)))
        .unwrap_or_default();
    let image = [feed.logo.as_ref(), feed.icon.as_ref()]
        .into_iter()
        .flatten()
        .find_map(|img| http_url(&img.uri));

    FetchedFeed {
        title,
        image,
        entries: feed.entries.into_iter().map(convert_entry).collect(),
    }
}

fn convert_entry(entry: Entry) -> FeedEntry {
    let when = entry.published.or(entry.updated);
    let summary = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .unwrap_or_default();
    let author = entry
        .authors
        .first()
        .map(|a| clean_line(&a.name))
        .unwrap_or_default();

    let media_image = entry
        .media
        .iter()
        .flat_map(|m| &m.thumbnails)
        .find_map(|t| http_url(&t.image.uri))
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| &m.content)
                .filter_map(|c| c.url.as_ref())
                .find_map(|u| http_url(u.as_ref()))
        });
    let views = entry
        .media
        .iter()
        .filter_map(|m| m.community.as_ref())
        .find_map(|c| c.stats_views)
        .and_then(|v| i64::try_from(v).ok());

    FeedEntry {
        id: entry.id.trim().to_owned(),
        title: entry
            .title
            .map(|t| clean_line(&decode_html_entities(&t.content)))
            .unwrap_or_default(),
        link: entry
            .links
            .first()
            .map(|l| l.href.trim().to_owned())
            .filter(|l| !l.is_empty()),
        published: when.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
        timestamp: when.map(|dt| dt.timestamp()).unwrap_or(0),
        author,
        summary,
        media_image,
        views,
    }
}

// ============================================================================
// Item Conversion
// ============================================================================

/// Stable cache id of an entry: `{feed}|{guid or link}`, else
/// `{feed}|{title}|{published}`.
pub fn entry_id(feed_url: &str, entry: &FeedEntry) -> String {
    let preferred = [Some(entry.id.as_str()), entry.link.as_deref()]
        .into_iter()
        .flatten()
        .find(|v| !v.is_empty());
    match preferred {
        Some(key) => format!("{feed_url}|{key}"),
        None => format!("{feed_url}|{}|{}", entry.title, entry.published),
    }
}

/// True for YouTube channel feeds (`youtube.com/feeds/videos.xml?channel_id=`).
pub fn is_youtube_feed(feed_url: &str) -> bool {
    let Ok(url) = Url::parse(feed_url.trim()) else {
        return false;
    };
    host_matches(feed_url, "youtube.com")
        && url.path().contains("feeds/videos.xml")
        && url.query_pairs().any(|(k, _)| k == "channel_id")
}

/// Title shown for a feed. YouTube channel feeds are prefixed so they stand
/// out in mixed lists.
pub fn display_feed_title(feed_url: &str, title: &str) -> String {
    let clean = clean_line(title);
    if !is_youtube_feed(feed_url) || clean.to_lowercase().starts_with("youtube:") {
        return clean;
    }
    if clean.is_empty() {
        "YouTube: Channel".to_owned()
    } else {
        format!("YouTube: {clean}")
    }
}

/// YouTube video id from an entry id (`yt:video:ID`) or watch/short link.
pub fn youtube_video_id(entry: &FeedEntry) -> Option<String> {
    if let Some((_, id)) = entry.id.split_once("yt:video:") {
        if !id.is_empty() {
            return Some(id.to_owned());
        }
    }
    let link = entry.link.as_deref()?;
    let id = if link.contains("youtube.com") {
        link.split_once("v=")?.1.split('&').next()
    } else {
        link.split_once("youtu.be/")?.1.split('?').next()
    };
    id.filter(|id| !id.is_empty()).map(str::to_owned)
}

/// Preview image: media thumbnail, media content, then the YouTube poster.
pub fn thumbnail(entry: &FeedEntry) -> String {
    entry
        .media_image
        .clone()
        .or_else(|| {
            youtube_video_id(entry).map(|id| format!("https://i.ytimg.com/vi/{id}/hqdefault.jpg"))
        })
        .unwrap_or_default()
}

/// Convert a fetched entry into a cache item.
///
/// `feed_title` is the raw channel title. An enrichment result replaces the
/// summary and title with the post's rendering and author.
pub fn build_item(
    feed_url: &str,
    entry: &FeedEntry,
    feed_title: &str,
    feed_image: Option<&str>,
    enriched: Option<EnrichedPost>,
) -> Item {
    let youtube = is_youtube_feed(feed_url);
    let display_title = display_feed_title(feed_url, feed_title);
    let id = entry_id(feed_url, entry);

    let title = [&entry.title, &entry.author, &display_title, &id]
        .into_iter()
        .find(|t| !t.is_empty())
        .cloned()
        .unwrap_or_else(|| "(no title)".to_owned());

    let mut item = Item {
        feed: feed_url.to_owned(),
        feed_title: display_title,
        id,
        title,
        link: entry.link.clone(),
        published: entry.published.clone(),
        summary: if youtube {
            String::new()
        } else {
            entry.summary.clone()
        },
        thumbnail: thumbnail(entry),
        timestamp: entry.timestamp,
        feed_image: feed_image
            .filter(|img| !youtube && !img.is_empty())
            .map(str::to_owned),
        youtube_views: if youtube { entry.views } else { None },
        ..Item::default()
    };

    if let Some(post) = enriched {
        if let Some(author) = post.author_title() {
            item.title = author.to_owned();
        }
        item.summary = post.summary_html;
        item.like_count = post.like_count;
        item.bluesky_author_avatar = post.author_avatar;
        item.bluesky_author_handle = post.author_handle;
        item.bluesky_author_display = post.author_display;
        item.bluesky_json = Some(post.raw);
    }

    item
}
