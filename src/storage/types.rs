use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while writing to or reading from an append-only event log.
#[derive(Debug, Error)]
pub enum LogError {
    /// The log file or its parent directory could not be read or written
    #[error("Event log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// An event could not be encoded as a JSON line
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Errors raised while writing the item cache snapshot.
///
/// Reads never produce this error: an unreadable snapshot is treated as empty.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Item cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode item cache: {0}")]
    Encode(#[from] serde_json::Error),
}

// ============================================================================
// Events
// ============================================================================

/// One entry of an append-only log.
///
/// String fields hold the trimmed raw value from the log line. A missing or
/// non-scalar field decodes to an empty string, which every fold treats as
/// "absent" and skips.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    AddFeed { url: String, folder: String },
    RemoveFeed { url: String },
    AddFolder { folder: String },
    MoveFolder { folder: String, parent: String },
    RemoveFolder { folder: String },
    MoveFeed { url: String, folder: String },
    TagFeed { url: String, tag: String },
    UntagFeed { url: String, tag: String },
    MarkViewed { item_id: String },
    UnmarkViewed { item_id: String },
    AddEntry { entry: Option<Item> },
    RemoveEntry { item_id: String },
    /// An action this build does not know about. Kept so the log position is
    /// preserved, ignored by every fold.
    Unknown { action: String },
}

impl Event {
    /// The `action` discriminator written to the log.
    pub fn action(&self) -> &str {
        match self {
            Event::AddFeed { .. } => "add_feed",
            Event::RemoveFeed { .. } => "remove_feed",
            Event::AddFolder { .. } => "add_folder",
            Event::MoveFolder { .. } => "move_folder",
            Event::RemoveFolder { .. } => "remove_folder",
            Event::MoveFeed { .. } => "move_feed",
            Event::TagFeed { .. } => "tag_feed",
            Event::UntagFeed { .. } => "untag_feed",
            Event::MarkViewed { .. } => "mark_viewed",
            Event::UnmarkViewed { .. } => "unmark_viewed",
            Event::AddEntry { .. } => "add_entry",
            Event::RemoveEntry { .. } => "remove_entry",
            Event::Unknown { action } => action,
        }
    }

    /// Decode a log line that has already been parsed as JSON.
    ///
    /// Returns `None` only when the value is not an object. Every other
    /// malformation degrades to empty fields.
    pub fn from_value(value: &Value) -> Option<Event> {
        let obj = value.as_object()?;
        let field = |key: &str| scalar_text(obj.get(key));

        let event = match field("action").as_str() {
            "add_feed" => Event::AddFeed {
                url: field("url"),
                folder: field("folder"),
            },
            "remove_feed" => Event::RemoveFeed { url: field("url") },
            "add_folder" => Event::AddFolder {
                folder: field("folder"),
            },
            "move_folder" => Event::MoveFolder {
                folder: field("folder"),
                parent: field("parent"),
            },
            "remove_folder" => Event::RemoveFolder {
                folder: field("folder"),
            },
            "move_feed" => Event::MoveFeed {
                url: field("url"),
                folder: field("folder"),
            },
            "tag_feed" => Event::TagFeed {
                url: field("url"),
                tag: field("tag"),
            },
            "untag_feed" => Event::UntagFeed {
                url: field("url"),
                tag: field("tag"),
            },
            "mark_viewed" => Event::MarkViewed {
                item_id: field("item_id"),
            },
            "unmark_viewed" => Event::UnmarkViewed {
                item_id: field("item_id"),
            },
            "add_entry" => Event::AddEntry {
                entry: obj
                    .get("entry")
                    .filter(|v| v.is_object())
                    .and_then(|v| serde_json::from_value(v.clone()).ok()),
            },
            "remove_entry" => Event::RemoveEntry {
                item_id: field("item_id"),
            },
            other => Event::Unknown {
                action: other.to_owned(),
            },
        };
        Some(event)
    }

    /// Encode as the JSON object written to the log.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        let action = self.action();
        let value = match self {
            Event::AddFeed { url, folder } | Event::MoveFeed { url, folder } => {
                json!({ "action": action, "url": url, "folder": folder })
            }
            Event::RemoveFeed { url } => json!({ "action": action, "url": url }),
            Event::AddFolder { folder } | Event::RemoveFolder { folder } => {
                json!({ "action": action, "folder": folder })
            }
            Event::MoveFolder { folder, parent } => {
                json!({ "action": action, "folder": folder, "parent": parent })
            }
            Event::TagFeed { url, tag } | Event::UntagFeed { url, tag } => {
                json!({ "action": action, "url": url, "tag": tag })
            }
            Event::MarkViewed { item_id }
            | Event::UnmarkViewed { item_id }
            | Event::RemoveEntry { item_id } => json!({ "action": action, "item_id": item_id }),
            Event::AddEntry { entry } => {
                json!({ "action": action, "entry": serde_json::to_value(entry)? })
            }
            Event::Unknown { .. } => json!({ "action": action }),
        };
        Ok(value)
    }
}

/// Render a JSON scalar the way a loosely typed log producer would have meant
/// it: strings trimmed, numbers and booleans stringified, anything else empty.
fn scalar_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_owned(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

// ============================================================================
// Items
// ============================================================================

/// A cached feed entry, also used as the bookmark snapshot.
///
/// Decoding is lenient: wrong-typed fields fall back to their defaults so that
/// one odd value never discards a whole cache snapshot or bookmark. Fields this
/// type does not model are preserved in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    #[serde(default, deserialize_with = "lenient_string")]
    pub feed: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub feed_title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub link: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub published: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub summary: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub thumbnail: String,
    /// Unix seconds used for recency ordering and time-range filtering.
    #[serde(rename = "_ts", default, deserialize_with = "lenient_timestamp")]
    pub timestamp: i64,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub feed_image: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub youtube_views: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub like_count: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub bluesky_author_avatar: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub bluesky_author_handle: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_opt_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub bluesky_author_display: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bluesky_json: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let s = lenient_string(d)?;
    Ok(if s.is_empty() { None } else { Some(s) })
}

/// Engagement counts arrive as integers, floats, or strings like `"1,204"`.
/// Negative or unparseable values become `None`.
fn lenient_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(parse_count(&value))
}

pub(crate) fn parse_count(value: &Value) -> Option<i64> {
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.replace(',', "").trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.filter(|n| *n >= 0)
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    match value {
        Value::Number(n) => Ok(n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0)),
        Value::String(s) => Ok(s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0)),
        _ => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_decode_add_feed() {
        let value = json!({"action": "add_feed", "url": " https://a.example/rss ", "folder": "Tech"});
        assert_eq!(
            Event::from_value(&value),
            Some(Event::AddFeed {
                url: "https://a.example/rss".into(),
                folder: "Tech".into()
            })
        );
    }

    #[test]
    fn test_decode_missing_fields_become_empty() {
        let value = json!({"action": "move_folder"});
        assert_eq!(
            Event::from_value(&value),
            Some(Event::MoveFolder {
                folder: String::new(),
                parent: String::new()
            })
        );
    }

    #[test]
    fn test_decode_non_string_fields() {
        let value = json!({"action": "tag_feed", "url": 42, "tag": ["x"]});
        assert_eq!(
            Event::from_value(&value),
            Some(Event::TagFeed {
                url: "42".into(),
                tag: String::new()
            })
        );
    }

    #[test]
    fn test_decode_unknown_action() {
        let value = json!({"action": "rename_feed", "url": "x"});
        assert_eq!(
            Event::from_value(&value),
            Some(Event::Unknown {
                action: "rename_feed".into()
            })
        );
    }

    #[test]
    fn test_decode_non_object_is_none() {
        assert_eq!(Event::from_value(&json!([1, 2])), None);
        assert_eq!(Event::from_value(&json!("add_feed")), None);
    }

    #[test]
    fn test_add_entry_with_bad_entry_is_none() {
        let value = json!({"action": "add_entry", "entry": "not an object"});
        assert_eq!(
            Event::from_value(&value),
            Some(Event::AddEntry { entry: None })
        );
    }

    #[test]
    fn test_encode_move_folder() {
        let event = Event::MoveFolder {
            folder: "Tech".into(),
            parent: "Work".into(),
        };
        assert_eq!(
            event.to_value().unwrap(),
            json!({"action": "move_folder", "folder": "Tech", "parent": "Work"})
        );
    }

    #[test]
    fn test_item_lenient_decode() {
        let value = json!({
            "feed": "https://a.example/rss",
            "id": "https://a.example/rss|1",
            "title": null,
            "link": null,
            "_ts": 1700000000.75,
            "like_count": "1,204",
            "youtube_views": -3,
            "guid": "abc"
        });
        let item: Item = serde_json::from_value(value).unwrap();
        assert_eq!(item.title, "");
        assert_eq!(item.link, None);
        assert_eq!(item.timestamp, 1_700_000_000);
        assert_eq!(item.like_count, Some(1204));
        assert_eq!(item.youtube_views, None);
        assert_eq!(item.extra.get("guid"), Some(&json!("abc")));
    }

    #[test]
    fn test_item_odd_timestamp_is_zero() {
        for ts in [json!(true), json!([1, 2]), json!({"at": 5}), json!("soon")] {
            let value = json!({"feed": "https://a.example/rss", "id": "x", "_ts": ts});
            let item: Item = serde_json::from_value(value).unwrap();
            assert_eq!(item.timestamp, 0);
            assert_eq!(item.id, "x");
        }
    }

    #[test]
    fn test_item_serializes_timestamp_key() {
        let item = Item {
            id: "x".into(),
            timestamp: 5,
            ..Item::default()
        };
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["_ts"], json!(5));
        assert!(value.get("like_count").is_none());
    }
}
