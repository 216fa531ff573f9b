//! # tw-api
//!
//! Backend interface for the Tickwall feed engine.
//!
//! Two traits split the surface by concern:
//!
//! - [`MarketApi`]: market data reads (batched quotes, history ranges)
//! - [`CommunityApi`]: feed pages, votes, bookmarks, symbol search
//!
//! [`HttpApi`] implements both against the hosted REST backend. The engine
//! crates depend only on the traits, so tests drive them with scripted
//! in-memory implementations.

pub mod http;

pub use http::HttpApi;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;

use tw_core::types::{
    FeedPage, FeedSortKey, HistoryBar, MarketSnapshot, Region, SymbolInfo, VoteReceipt, VoteTarget,
};

/// Market data reads.
#[async_trait]
pub trait MarketApi: Send + Sync {
    /// Batched quote query for up to one chunk of symbols.
    ///
    /// Symbols the backend does not know are simply absent from the returned
    /// map; that absence is meaningful (the symbol settles as unavailable).
    async fn fetch_quotes(
        &self,
        symbols: &[String],
        region: Region,
    ) -> Result<HashMap<String, MarketSnapshot>>;

    /// Historical bars for one symbol, oldest first.
    async fn fetch_history(
        &self,
        symbol: &str,
        range: &str,
        interval: &str,
    ) -> Result<Vec<HistoryBar>>;
}

/// Community feed reads and mutations.
#[async_trait]
pub trait CommunityApi: Send + Sync {
    /// One page of the community feed.
    async fn fetch_feed_page(
        &self,
        region: Region,
        sort: FeedSortKey,
        offset: usize,
        limit: usize,
    ) -> Result<FeedPage>;

    /// Record a vote value (`-1`, `0`, `1`) and return the authoritative
    /// post-mutation state.
    async fn cast_vote(&self, target: &VoteTarget, value: i8) -> Result<VoteReceipt>;

    /// Toggle a bookmark; returns the resulting membership.
    async fn toggle_bookmark(&self, symbol: &str, region: Region) -> Result<bool>;

    /// The caller's full bookmark set for a region.
    async fn fetch_bookmarks(&self, user_id: &str, region: Region) -> Result<Vec<String>>;

    /// Symbol search within a region.
    async fn search_symbols(&self, query: &str, region: Region) -> Result<Vec<SymbolInfo>>;
}
