//! Community feed row structures.

use serde::{Deserialize, Serialize};

use super::market::MarketSnapshot;

/// One row of the community feed: a tracked symbol plus its discussion
/// aggregates.
///
/// `snapshot` is not part of the backend feed payload. It is attached at
/// read time from the ticker store, so a row renders as soon as the feed
/// page lands and fills in market data when the batch fetch settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedItem {
    /// Ticker symbol, unique within the feed's region.
    pub symbol: String,

    /// Number of discussion threads tracking this symbol.
    #[serde(default)]
    pub thread_count: u32,

    /// Total comment count across those threads.
    #[serde(default)]
    pub comment_count: u32,

    /// Net community score (upvotes minus downvotes).
    #[serde(default)]
    pub score: i64,

    #[serde(default)]
    pub upvotes: u32,

    #[serde(default)]
    pub downvotes: u32,

    /// The caller's own vote on this symbol: `-1`, `0`, or `1`.
    /// `None` when the caller is anonymous.
    pub my_vote: Option<i8>,

    /// Market snapshot merged in from the ticker store at read time.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub snapshot: Option<MarketSnapshot>,
}

impl FeedItem {
    /// Bare row with just a symbol, used by tests and placeholder rendering.
    pub fn bare(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            thread_count: 0,
            comment_count: 0,
            score: 0,
            upvotes: 0,
            downvotes: 0,
            my_vote: None,
            snapshot: None,
        }
    }
}

/// One page of feed rows plus the more-rows indicator.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Whether the backend has more rows past this page.
    pub has_more: bool,
}
