use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::storage::Event;

/// Tag that marks a feed as a favorite.
pub const FAVORITE_TAG: &str = "favorite";

/// Present feed URLs in first-insertion order.
///
/// A feed removed and added again moves to the end.
pub fn derive_feeds(events: &[Event]) -> Vec<String> {
    let mut feeds: Vec<String> = Vec::new();
    for event in events {
        match event {
            Event::AddFeed { url, .. } if !url.is_empty() => {
                if !feeds.iter().any(|f| f == url) {
                    feeds.push(url.clone());
                }
            }
            Event::RemoveFeed { url } if !url.is_empty() => {
                feeds.retain(|f| f != url);
            }
            _ => {}
        }
    }
    feeds
}

/// Normalize a tag the way it is stored.
pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

/// Feed URL → lowercase tags. Feeds whose last tag was removed are absent.
pub fn derive_tags(events: &[Event]) -> BTreeMap<String, BTreeSet<String>> {
    let mut tags: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for event in events {
        match event {
            Event::TagFeed { url, tag } => {
                let tag = normalize_tag(tag);
                if url.is_empty() || tag.is_empty() {
                    continue;
                }
                tags.entry(url.clone()).or_default().insert(tag);
            }
            Event::UntagFeed { url, tag } => {
                let tag = normalize_tag(tag);
                if let Some(set) = tags.get_mut(url) {
                    set.remove(&tag);
                    if set.is_empty() {
                        tags.remove(url);
                    }
                }
            }
            Event::RemoveFeed { url } => {
                tags.remove(url);
            }
            _ => {}
        }
    }
    tags
}

/// Feeds carrying the favorite tag, sorted.
pub fn favorites(tags: &BTreeMap<String, BTreeSet<String>>) -> Vec<String> {
    tags.iter()
        .filter(|(_, set)| set.contains(FAVORITE_TAG))
        .map(|(url, _)| url.clone())
        .collect()
}

/// Item ids currently marked as viewed.
pub fn viewed_ids(events: &[Event]) -> HashSet<String> {
    let mut viewed = HashSet::new();
    for event in events {
        match event {
            Event::MarkViewed { item_id } if !item_id.is_empty() => {
                viewed.insert(item_id.clone());
            }
            Event::UnmarkViewed { item_id } => {
                viewed.remove(item_id);
            }
            _ => {}
        }
    }
    viewed
}
