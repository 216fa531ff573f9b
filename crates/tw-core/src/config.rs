//! Configuration parsing for the feed engine.
//!
//! All modules read their settings from a single JSON config file. The only
//! required block is `backend`; tuning blocks fall back to defaults chosen to
//! match the hosted service's rate limits.
//!
//! # Example config
//!
//! ```json
//! {
//!   "backend": { "base_url": "https://api.example.com", "user_id": "u_1901" },
//!   "feed": { "region": "US", "sort": "score", "page_size": 20 },
//!   "batch": { "bulk_chunk_size": 100, "interactive_chunk_size": 12, "stagger_ms": 200 },
//!   "vote": { "settle_notify_delay_ms": 500 }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::types::{FeedSortKey, Region};

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Backend connection settings.
    pub backend: BackendConfig,

    /// Feed query settings.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Batch fetch tuning.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Vote settlement tuning.
    #[serde(default)]
    pub vote: VoteConfig,
}

/// Backend connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the community backend, e.g. `https://api.example.com`.
    pub base_url: String,

    /// Per-request timeout in seconds (default: 10).
    pub request_timeout_sec: Option<u64>,

    /// Identity whose votes and bookmarks are loaded. Anonymous when absent.
    pub user_id: Option<String>,
}

impl BackendConfig {
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec.unwrap_or(10))
    }
}

/// Feed query settings.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FeedConfig {
    /// Market region the feed starts in (default: US).
    pub region: Option<Region>,

    /// Sort key the feed starts with (default: score).
    pub sort: Option<FeedSortKey>,

    /// Rows requested per page (default: 20).
    pub page_size: Option<u32>,

    /// Debounce between automatic page-load attempts in milliseconds
    /// (default: 250).
    pub autoload_debounce_ms: Option<u64>,
}

impl FeedConfig {
    pub fn effective_region(&self) -> Region {
        self.region.unwrap_or_default()
    }

    pub fn effective_sort(&self) -> FeedSortKey {
        self.sort.unwrap_or_default()
    }

    pub fn effective_page_size(&self) -> usize {
        self.page_size.unwrap_or(20).max(1) as usize
    }

    pub fn effective_autoload_debounce(&self) -> Duration {
        Duration::from_millis(self.autoload_debounce_ms.unwrap_or(250))
    }
}

/// Batch fetch tuning.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BatchConfig {
    /// Chunk size for full-feed loads (default: 100).
    pub bulk_chunk_size: Option<u32>,

    /// Chunk size for interactive loads such as search hits (default: 12).
    pub interactive_chunk_size: Option<u32>,

    /// Delay between successive chunk dispatches in milliseconds
    /// (default: 200).
    pub stagger_ms: Option<u64>,

    /// Range parameter for the history backfill query (default: `"1mo"`).
    pub history_range: Option<String>,

    /// Interval parameter for the history backfill query (default: `"1d"`).
    pub history_interval: Option<String>,
}

impl BatchConfig {
    pub fn effective_bulk_chunk_size(&self) -> usize {
        self.bulk_chunk_size.unwrap_or(100).max(1) as usize
    }

    pub fn effective_interactive_chunk_size(&self) -> usize {
        self.interactive_chunk_size.unwrap_or(12).max(1) as usize
    }

    pub fn effective_stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms.unwrap_or(200))
    }

    pub fn effective_history_range(&self) -> String {
        self.history_range.clone().unwrap_or_else(|| "1mo".to_string())
    }

    pub fn effective_history_interval(&self) -> String {
        self.history_interval.clone().unwrap_or_else(|| "1d".to_string())
    }
}

/// Vote settlement tuning.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VoteConfig {
    /// Delay between a confirmed vote and the settlement notification in
    /// milliseconds (default: 500). Zero disables the delay.
    pub settle_notify_delay_ms: Option<u64>,
}

impl VoteConfig {
    pub fn effective_settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_notify_delay_ms.unwrap_or(500))
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_defaults() {
        let json = r#"{ "backend": { "base_url": "https://api.example.com" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.backend.effective_timeout(), Duration::from_secs(10));
        assert!(config.backend.user_id.is_none());
        assert_eq!(config.feed.effective_region(), Region::Us);
        assert_eq!(config.feed.effective_sort(), FeedSortKey::Score);
        assert_eq!(config.feed.effective_page_size(), 20);
        assert_eq!(config.batch.effective_bulk_chunk_size(), 100);
        assert_eq!(config.batch.effective_interactive_chunk_size(), 12);
        assert_eq!(config.batch.effective_stagger(), Duration::from_millis(200));
        assert_eq!(config.vote.effective_settle_delay(), Duration::from_millis(500));
    }

    #[test]
    fn full_config_overrides() {
        let json = r#"{
            "backend": {
                "base_url": "http://localhost:8000",
                "request_timeout_sec": 3,
                "user_id": "u_7"
            },
            "feed": {
                "region": "IN",
                "sort": "comments",
                "page_size": 50,
                "autoload_debounce_ms": 100
            },
            "batch": { "bulk_chunk_size": 25, "stagger_ms": 0 },
            "vote": { "settle_notify_delay_ms": 0 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.backend.user_id.as_deref(), Some("u_7"));
        assert_eq!(config.feed.effective_region(), Region::India);
        assert_eq!(config.feed.effective_sort(), FeedSortKey::Comments);
        assert_eq!(config.feed.effective_page_size(), 50);
        assert_eq!(config.batch.effective_bulk_chunk_size(), 25);
        assert_eq!(config.batch.effective_stagger(), Duration::ZERO);
        assert_eq!(config.vote.effective_settle_delay(), Duration::ZERO);
        // Unset fields still fall back.
        assert_eq!(config.batch.effective_interactive_chunk_size(), 12);
    }

    #[test]
    fn zero_page_size_clamped() {
        let json = r#"{
            "backend": { "base_url": "x" },
            "feed": { "page_size": 0 },
            "batch": { "bulk_chunk_size": 0 }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.feed.effective_page_size(), 1);
        assert_eq!(config.batch.effective_bulk_chunk_size(), 1);
    }
}
