use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::DateTime;

use super::event_log::EventLog;
use super::types::{Event, Item, LogError};

/// Saved items, backed by their own append-only log.
///
/// Each bookmark carries a full item snapshot, so it outlives the source feed
/// and the item cache.
#[derive(Debug)]
pub struct BookmarkStore {
    log: EventLog,
}

impl BookmarkStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            log: EventLog::new(path),
        }
    }

    pub async fn add(&self, entry: Item) -> Result<(), LogError> {
        self.log
            .append(&Event::AddEntry { entry: Some(entry) })
            .await
    }

    pub async fn remove(&self, item_id: &str) -> Result<(), LogError> {
        self.log
            .append(&Event::RemoveEntry {
                item_id: item_id.to_owned(),
            })
            .await
    }

    /// Current bookmarks keyed by item id.
    pub async fn materialized(&self) -> Result<BTreeMap<String, Item>, LogError> {
        Ok(materialize(&self.log.load().await?))
    }

    /// Current bookmarks, most recent first.
    pub async fn list(&self) -> Result<Vec<Item>, LogError> {
        Ok(sorted_by_recency(self.materialized().await?))
    }

    pub async fn ids(&self) -> Result<HashSet<String>, LogError> {
        Ok(self.materialized().await?.into_keys().collect())
    }
}

/// Fold bookmark events into the saved set.
///
/// The id of a snapshot is its `id`, else `guid`, else `link`; snapshots with
/// none of those are skipped. A later `add_entry` for the same id replaces the
/// earlier one.
pub fn materialize(events: &[Event]) -> BTreeMap<String, Item> {
    let mut saved = BTreeMap::new();
    for event in events {
        match event {
            Event::AddEntry { entry: Some(entry) } => {
                let Some(id) = snapshot_id(entry) else {
                    continue;
                };
                let mut item = entry.clone();
                item.id = id.clone();
                if item.timestamp == 0 {
                    item.timestamp = published_timestamp(&item.published).unwrap_or(0);
                }
                saved.insert(id, item);
            }
            Event::RemoveEntry { item_id } if !item_id.is_empty() => {
                saved.remove(item_id);
            }
            _ => {}
        }
    }
    saved
}

/// Order saved items by their embedded timestamp, newest first.
pub fn sorted_by_recency(saved: BTreeMap<String, Item>) -> Vec<Item> {
    let mut items: Vec<Item> = saved.into_values().collect();
    items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    items
}

fn snapshot_id(entry: &Item) -> Option<String> {
    let guid = entry
        .extra
        .get("guid")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    [entry.id.as_str(), guid, entry.link.as_deref().unwrap_or_default()]
        .into_iter()
        .map(str::trim)
        .find(|candidate| !candidate.is_empty())
        .map(str::to_owned)
}

fn published_timestamp(published: &str) -> Option<i64> {
    let published = published.trim();
    DateTime::parse_from_rfc2822(published)
        .or_else(|_| DateTime::parse_from_rfc3339(published))
        .ok()
        .map(|dt| dt.timestamp())
}
