//! Configuration file parser for ~/.config/feedfold/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning for each one
//! since they are usually typos. Data paths can be overridden per process
//! through `FEED_LOG_PATH`, `BOOKMARKS_LOG_PATH` and `FEED_CACHE_DIR`.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const FEED_LOG_ENV: &str = "FEED_LOG_PATH";
pub const BOOKMARKS_LOG_ENV: &str = "BOOKMARKS_LOG_PATH";
pub const CACHE_DIR_ENV: &str = "FEED_CACHE_DIR";

const KNOWN_KEYS: [&str; 9] = [
    "feed_log_path",
    "bookmarks_log_path",
    "cache_dir",
    "feed_rate_per_second",
    "enrich_rate_per_second",
    "fetch_concurrency",
    "default_page_size",
    "enrich_bluesky",
    "bluesky_api_base",
];

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Unset data paths are placed under the config directory by
/// [`Config::data_paths`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Subscription/folder/tag/viewed event log.
    pub feed_log_path: Option<PathBuf>,

    /// Bookmark event log.
    pub bookmarks_log_path: Option<PathBuf>,

    /// Directory holding the item cache snapshot.
    pub cache_dir: Option<PathBuf>,

    /// Feed fetches started per second during a refresh. 0 = unlimited.
    pub feed_rate_per_second: usize,

    /// Enrichment lookups per second. 0 = unlimited.
    pub enrich_rate_per_second: usize,

    /// Feeds fetched at the same time during a refresh.
    pub fetch_concurrency: usize,

    /// Page length when an item query does not give one.
    pub default_page_size: usize,

    /// Replace Bluesky post summaries with the AppView rendering.
    pub enrich_bluesky: bool,

    /// XRPC root of the Bluesky AppView.
    pub bluesky_api_base: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_log_path: None,
            bookmarks_log_path: None,
            cache_dir: None,
            feed_rate_per_second: 3,
            enrich_rate_per_second: 35,
            fetch_concurrency: 4,
            default_page_size: 30,
            enrich_bluesky: true,
            bluesky_api_base: "https://public.api.bsky.app/xrpc".to_string(),
        }
    }
}

/// Where the logs and the cache live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub feed_log: PathBuf,
    pub bookmarks_log: PathBuf,
    pub cache_dir: PathBuf,
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            concurrency = config.fetch_concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply the path overrides from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply path overrides from `lookup`. Empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        };
        if let Some(path) = var(FEED_LOG_ENV) {
            self.feed_log_path = Some(path);
        }
        if let Some(path) = var(BOOKMARKS_LOG_ENV) {
            self.bookmarks_log_path = Some(path);
        }
        if let Some(path) = var(CACHE_DIR_ENV) {
            self.cache_dir = Some(path);
        }
        self
    }

    /// Resolve data paths, placing unset ones under `base_dir`.
    pub fn data_paths(&self, base_dir: &Path) -> DataPaths {
        DataPaths {
            feed_log: self
                .feed_log_path
                .clone()
                .unwrap_or_else(|| base_dir.join("feeds.jsonl")),
            bookmarks_log: self
                .bookmarks_log_path
                .clone()
                .unwrap_or_else(|| base_dir.join("bookmarks.jsonl")),
            cache_dir: self
                .cache_dir
                .clone()
                .unwrap_or_else(|| base_dir.join("cache")),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_config(content: &str) -> (TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.feed_rate_per_second, 3);
        assert_eq!(config.enrich_rate_per_second, 35);
        assert_eq!(config.fetch_concurrency, 4);
        assert_eq!(config.default_page_size, 30);
        assert!(config.enrich_bluesky);
        assert_eq!(config.bluesky_api_base, "https://public.api.bsky.app/xrpc");
        assert!(config.feed_log_path.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_page_size, 30);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch_concurrency, 4);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("fetch_concurrency = 8\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.fetch_concurrency, 8);
        assert_eq!(config.feed_rate_per_second, 3);
        assert!(config.enrich_bluesky);
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
feed_log_path = "/data/feeds.jsonl"
bookmarks_log_path = "/data/bookmarks.jsonl"
cache_dir = "/var/cache/feedfold"
feed_rate_per_second = 1
enrich_rate_per_second = 0
fetch_concurrency = 2
default_page_size = 50
enrich_bluesky = false
bluesky_api_base = "http://localhost:2584/xrpc"
"#,
        );
        let config = Config::load(&path).unwrap();
        assert_eq!(config.feed_log_path, Some(PathBuf::from("/data/feeds.jsonl")));
        assert_eq!(
            config.bookmarks_log_path,
            Some(PathBuf::from("/data/bookmarks.jsonl"))
        );
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/feedfold")));
        assert_eq!(config.feed_rate_per_second, 1);
        assert_eq!(config.enrich_rate_per_second, 0);
        assert_eq!(config.fetch_concurrency, 2);
        assert_eq!(config.default_page_size, 50);
        assert!(!config.enrich_bluesky);
        assert_eq!(config.bluesky_api_base, "http://localhost:2584/xrpc");
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("fetch_concurrency = \"many\"\n");
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("default_page_size = 10\ntheme = \"dark\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.default_page_size, 10);
    }

    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_data_paths_default_under_base() {
        let paths = Config::default().data_paths(Path::new("/home/u/.config/feedfold"));
        assert_eq!(
            paths,
            DataPaths {
                feed_log: PathBuf::from("/home/u/.config/feedfold/feeds.jsonl"),
                bookmarks_log: PathBuf::from("/home/u/.config/feedfold/bookmarks.jsonl"),
                cache_dir: PathBuf::from("/home/u/.config/feedfold/cache"),
            }
        );
    }

    #[test]
    fn test_env_overrides_win_over_file() {
        let config = Config {
            feed_log_path: Some(PathBuf::from("/from/file.jsonl")),
            ..Config::default()
        }
        .with_overrides(|key| match key {
            FEED_LOG_ENV => Some("/from/env.jsonl".into()),
            CACHE_DIR_ENV => Some("  ".into()),
            _ => None,
        });
        assert_eq!(config.feed_log_path, Some(PathBuf::from("/from/env.jsonl")));
        assert_eq!(config.cache_dir, None);
        assert_eq!(config.bookmarks_log_path, None);
    }
}
