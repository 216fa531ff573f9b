//! Feed pagination with monotonic accumulation.
//!
//! The pager accumulates rows across pages and only ever shrinks through an
//! explicit [`reset`](FeedPager::reset). Page loads are single-flight: the
//! scroll-visibility trigger and the session's debounced autoload loop may
//! both fire redundantly, and redundant calls no-op here instead of racing.
//!
//! A reset bumps the pager generation. A page response that comes back for
//! an older generation is discarded wholesale, so switching region or sort
//! mid-flight can never splice stale rows into the new feed.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashSet;
use tracing::{debug, warn};

use tw_api::CommunityApi;
use tw_core::types::{FeedItem, FeedSortKey, Region, VoteReceipt};

/// Outcome of one [`FeedPager::load_next_page`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum PageLoad {
    /// The page landed; `new_symbols` lists rows not seen before.
    Loaded { new_symbols: Vec<String>, has_more: bool },
    /// Another load was already in flight; nothing was dispatched.
    AlreadyFetching,
    /// The feed is exhausted; nothing was dispatched.
    Exhausted,
    /// The pager was reset while the request was in flight; the response
    /// was discarded.
    Superseded,
    /// The page request failed; accumulated rows are untouched and the
    /// next trigger retries the same offset.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Idle,
    Fetching,
}

struct PagerInner {
    region: Region,
    sort: FeedSortKey,
    items: Vec<FeedItem>,
    seen: AHashSet<String>,
    /// Offset for the next page request. Counts raw returned rows, not kept
    /// rows, so server-side pagination stays aligned when duplicates drop.
    offset: usize,
    has_more: bool,
    state: FetchState,
    generation: u64,
}

/// Single-flight incremental loader for one feed configuration.
pub struct FeedPager {
    api: Arc<dyn CommunityApi>,
    page_size: usize,
    inner: Mutex<PagerInner>,
}

impl FeedPager {
    pub fn new(
        api: Arc<dyn CommunityApi>,
        region: Region,
        sort: FeedSortKey,
        page_size: usize,
    ) -> Self {
        Self {
            api,
            page_size: page_size.max(1),
            inner: Mutex::new(PagerInner {
                region,
                sort,
                items: Vec::new(),
                seen: AHashSet::new(),
                offset: 0,
                has_more: true,
                state: FetchState::Idle,
                generation: 0,
            }),
        }
    }

    fn locked(&self) -> MutexGuard<'_, PagerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fetch the next page if the pager is idle and more rows exist.
    pub async fn load_next_page(&self) -> PageLoad {
        let (generation, region, sort, offset) = {
            let mut inner = self.locked();
            if inner.state == FetchState::Fetching {
                return PageLoad::AlreadyFetching;
            }
            if !inner.has_more {
                return PageLoad::Exhausted;
            }
            inner.state = FetchState::Fetching;
            (inner.generation, inner.region, inner.sort, inner.offset)
        };

        let result = self.api.fetch_feed_page(region, sort, offset, self.page_size).await;

        let mut inner = self.locked();
        if inner.generation != generation {
            // A reset happened mid-flight. The current generation owns the
            // fetch slot now; this response must not touch anything.
            debug!("[pager] dropping page response from superseded generation {generation}");
            return PageLoad::Superseded;
        }
        inner.state = FetchState::Idle;
        match result {
            Ok(page) => {
                let returned = page.items.len();
                let mut new_symbols = Vec::new();
                for item in page.items {
                    if inner.seen.insert(item.symbol.clone()) {
                        new_symbols.push(item.symbol.clone());
                        inner.items.push(item);
                    }
                }
                inner.offset += returned;
                inner.has_more = page.has_more;
                debug!(
                    "[pager] page at offset {offset}: {returned} rows ({} new), has_more={}",
                    new_symbols.len(),
                    page.has_more
                );
                PageLoad::Loaded { new_symbols, has_more: page.has_more }
            }
            Err(e) => {
                warn!("[pager] page load failed at offset {offset}: {e:#}");
                PageLoad::Failed
            }
        }
    }

    /// Drop all rows and start over with a new feed configuration.
    ///
    /// Any in-flight page load is superseded and its response discarded.
    pub fn reset(&self, region: Region, sort: FeedSortKey) {
        let mut inner = self.locked();
        inner.region = region;
        inner.sort = sort;
        inner.items.clear();
        inner.seen.clear();
        inner.offset = 0;
        inner.has_more = true;
        inner.state = FetchState::Idle;
        inner.generation += 1;
        debug!("[pager] reset to {region}/{sort} (generation {})", inner.generation);
    }

    /// Accumulated rows in feed order.
    pub fn items(&self) -> Vec<FeedItem> {
        self.locked().items.clone()
    }

    /// Symbols of all accumulated rows, in feed order.
    pub fn symbols(&self) -> Vec<String> {
        self.locked().items.iter().map(|i| i.symbol.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.locked().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().items.is_empty()
    }

    pub fn has_more(&self) -> bool {
        self.locked().has_more
    }

    pub fn is_fetching(&self) -> bool {
        self.locked().state == FetchState::Fetching
    }

    /// Current vote state of a row: `(own vote, score)`.
    pub fn vote_baseline(&self, symbol: &str) -> Option<(i8, i64)> {
        let inner = self.locked();
        let item = inner.items.iter().find(|i| i.symbol == symbol)?;
        Some((item.my_vote.unwrap_or(0), item.score))
    }

    /// Fold a settled vote into the matching row's aggregates.
    pub fn apply_vote_receipt(&self, symbol: &str, receipt: &VoteReceipt) {
        let mut inner = self.locked();
        if let Some(item) = inner.items.iter_mut().find(|i| i.symbol == symbol) {
            item.score = receipt.score;
            item.upvotes = receipt.upvotes;
            item.downvotes = receipt.downvotes;
            item.my_vote = Some(receipt.value);
        }
    }
}
