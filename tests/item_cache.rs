//! Integration tests for the item cache snapshot on disk.
//!
//! The cache must never fail a read: anything unreadable is treated as an
//! empty cache so the next query rebuilds it.

use chrono::Utc;
use feedfold::storage::{format_refreshed, Item, ItemCache};
use pretty_assertions::assert_eq;
use serde_json::json;

fn item(id: &str, ts: i64) -> Item {
    Item {
        feed: "https://a.example/rss".into(),
        feed_title: "A Blog".into(),
        id: format!("https://a.example/rss|{id}"),
        title: format!("Post {id}"),
        link: Some(format!("https://a.example/{id}")),
        timestamp: ts,
        ..Item::default()
    }
}

#[tokio::test]
async fn test_missing_snapshot_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ItemCache::new(dir.path().join("never-created"));
    assert!(cache.load().await.is_empty());
    assert_eq!(cache.last_refreshed().await, None);
    cache.invalidate().await.unwrap();
}

#[tokio::test]
async fn test_corrupt_snapshot_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ItemCache::new(dir.path());
    std::fs::write(cache.path(), b"[{\"id\": \"trunc").unwrap();
    assert!(cache.load().await.is_empty());

    std::fs::write(cache.path(), b"{\"items\": []}").unwrap();
    assert!(cache.load().await.is_empty());
}

#[tokio::test]
async fn test_undecodable_entries_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ItemCache::new(dir.path());
    let snapshot = json!([
        {"feed": "https://a.example/rss", "id": "x", "_ts": "1700000000", "youtube_views": "1,204"},
        "not an item",
        42,
        {"feed": "https://a.example/rss", "id": "y", "custom": {"kept": true}}
    ]);
    std::fs::write(cache.path(), serde_json::to_vec(&snapshot).unwrap()).unwrap();

    let loaded = cache.load().await;
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0].timestamp, 1_700_000_000);
    assert_eq!(loaded[0].youtube_views, Some(1204));
    assert_eq!(loaded[1].extra["custom"], json!({"kept": true}));
}

#[tokio::test]
async fn test_save_replaces_and_invalidate_deletes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ItemCache::new(dir.path().join("cache"));

    cache.save(&[item("1", 10), item("2", 20)]).await.unwrap();
    cache.save(&[item("3", 30)]).await.unwrap();
    let loaded = cache.load().await;
    assert_eq!(loaded, vec![item("3", 30)]);

    cache.invalidate().await.unwrap();
    assert!(!cache.path().exists());
    assert!(cache.load().await.is_empty());
    cache.invalidate().await.unwrap();
}

#[tokio::test]
async fn test_last_refreshed_tracks_save() {
    let dir = tempfile::tempdir().unwrap();
    let cache = ItemCache::new(dir.path());
    let before = Utc::now().timestamp();

    cache.save(&[item("1", 10)]).await.unwrap();
    let refreshed = cache.last_refreshed().await.unwrap();
    assert!(refreshed.timestamp() >= before - 1);
    assert!(refreshed.timestamp() <= Utc::now().timestamp() + 1);

    let formatted = format_refreshed(refreshed);
    assert!(formatted.ends_with("+00:00"));
    assert!(!formatted.contains('.'));
}

#[tokio::test]
async fn test_concurrent_saves_leave_one_whole_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let cache = std::sync::Arc::new(ItemCache::new(dir.path()));

    let mut handles = Vec::new();
    for n in 0..8 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            let items: Vec<Item> = (0..50).map(|i| item(&format!("{n}-{i}"), i)).collect();
            cache.save(&items).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let loaded = cache.load().await;
    assert_eq!(loaded.len(), 50);
    let writer = loaded[0].id.split('|').nth(1).unwrap().split('-').next().unwrap();
    assert!(loaded
        .iter()
        .all(|i| i.id.contains(&format!("|{writer}-"))));
}
