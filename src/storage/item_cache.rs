use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::types::{CacheError, Item};

/// File name of the snapshot inside the cache directory.
const SNAPSHOT_FILE: &str = "items.json";

/// Snapshot store for fetched items.
///
/// The snapshot is a single JSON array replaced wholesale on every save. It is
/// a materialized view: callers invalidate it when the feed set changes and
/// rebuild it on refresh or when it is found empty.
#[derive(Debug)]
pub struct ItemCache {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ItemCache {
    /// Create a cache storing its snapshot under `dir`.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            path: dir.as_ref().join(SNAPSHOT_FILE),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cached items.
    ///
    /// Any failure (missing file, unreadable file, invalid JSON, not an array)
    /// yields an empty list so the caller rebuilds. Individual entries that
    /// fail to decode are dropped.
    pub async fn load(&self) -> Vec<Item> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read item cache");
                return Vec::new();
            }
        };

        let values = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(serde_json::Value::Array(values)) => values,
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "Item cache is not a JSON array, ignoring");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Item cache is corrupt, ignoring");
                return Vec::new();
            }
        };

        let total = values.len();
        let items: Vec<Item> = values
            .into_iter()
            .filter_map(|v| serde_json::from_value(v).ok())
            .collect();
        if items.len() < total {
            tracing::warn!(
                path = %self.path.display(),
                dropped = total - items.len(),
                "Dropped undecodable cache entries"
            );
        }
        items
    }

    /// Replace the snapshot with `items`.
    ///
    /// Writes to a uniquely named temp file beside the snapshot, syncs it and
    /// renames it into place, so a concurrent reader sees either the old or the
    /// new snapshot in full.
    pub async fn save(&self, items: &[Item]) -> Result<(), CacheError> {
        let content = serde_json::to_vec(items)?;

        let _guard = self.write_lock.lock().await;

        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let temp_path = self.temp_path();
        if let Err(e) = write_synced(&temp_path, &content).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        // On Windows, rename fails if destination exists, so remove it first
        #[cfg(windows)]
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            let _ = tokio::fs::remove_file(&self.path).await;
        }

        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        tracing::info!(path = %self.path.display(), items = items.len(), "Saved item cache");
        Ok(())
    }

    /// Delete the snapshot. A missing snapshot is not an error.
    pub async fn invalidate(&self) -> Result<(), CacheError> {
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "Invalidated item cache");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// When the snapshot was last written, from file metadata.
    pub async fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        let modified = tokio::fs::metadata(&self.path).await.ok()?.modified().ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    /// SEC-009: Randomized temp filename so concurrent writers and leftover
    /// files from a crashed save never collide.
    fn temp_path(&self) -> PathBuf {
        use std::time::{SystemTime, UNIX_EPOCH};
        let random_suffix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        self.path.with_extension(format!(
            "tmp.{}.{:016x}",
            std::process::id(),
            random_suffix
        ))
    }
}

async fn write_synced(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(content).await?;
    file.sync_all().await?;
    Ok(())
}

/// Format a refresh time the way responses report it: UTC, whole seconds.
pub fn format_refreshed(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, false)
}
