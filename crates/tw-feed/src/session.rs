//! Session orchestration.
//!
//! A [`FeedSession`] ties the pager, the batch scheduler, vote controls, and
//! bookmark sync together over shared stores and API handles. It owns the
//! shutdown channel every background task selects against, so one `stop()`
//! quiesces page loading, batch dispatch, and autoload at once.
//!
//! Rendering pulls [`FeedSession::visible_items`]: accumulated feed rows
//! merged with the freshest store snapshots, bookmarked symbols first.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tw_api::{CommunityApi, MarketApi};
use tw_core::bookmark_store::BookmarkStore;
use tw_core::config::AppConfig;
use tw_core::ticker_store::TickerStore;
use tw_core::types::{FeedItem, FeedSortKey, Region, SymbolInfo, TargetKind, VoteTarget};

use crate::bookmarks::BookmarkSync;
use crate::pager::{FeedPager, PageLoad};
use crate::scheduler::{BatchOptions, BatchScheduler};
use crate::vote::{SettleCallback, VoteController, VoteOutcome};

/// Initial configuration for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub region: Region,
    pub sort: FeedSortKey,
    /// Identity whose votes and bookmarks are loaded. Anonymous when absent.
    pub user_id: Option<String>,
    pub page_size: usize,
    /// Interval between automatic next-page attempts.
    pub autoload_debounce: Duration,
    pub batch: BatchOptions,
    /// Delay between a confirmed vote and the settlement notification.
    pub settle_delay: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            region: Region::default(),
            sort: FeedSortKey::default(),
            user_id: None,
            page_size: 20,
            autoload_debounce: Duration::from_millis(250),
            batch: BatchOptions::default(),
            settle_delay: Duration::from_millis(500),
        }
    }
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            region: config.feed.effective_region(),
            sort: config.feed.effective_sort(),
            user_id: config.backend.user_id.clone(),
            page_size: config.feed.effective_page_size(),
            autoload_debounce: config.feed.effective_autoload_debounce(),
            batch: BatchOptions::from_config(&config.batch),
            settle_delay: config.vote.effective_settle_delay(),
        }
    }
}

struct SessionState {
    region: Region,
    sort: FeedSortKey,
    user_id: Option<String>,
}

/// One community-feed session over shared stores.
pub struct FeedSession {
    tickers: Arc<TickerStore>,
    bookmarks: Arc<BookmarkStore>,
    community: Arc<dyn CommunityApi>,
    pager: Arc<FeedPager>,
    scheduler: BatchScheduler,
    sync: BookmarkSync,
    state: Mutex<SessionState>,
    autoload_debounce: Duration,
    settle_delay: Duration,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FeedSession {
    /// Build a session with fresh private stores.
    pub fn new(
        market: Arc<dyn MarketApi>,
        community: Arc<dyn CommunityApi>,
        opts: SessionOptions,
    ) -> Arc<Self> {
        Self::with_stores(
            market,
            community,
            Arc::new(TickerStore::new()),
            Arc::new(BookmarkStore::new()),
            opts,
        )
    }

    /// Build a session over existing stores.
    ///
    /// The ticker and bookmark stores outlive sessions; passing them in lets
    /// a remount reuse everything already cached.
    pub fn with_stores(
        market: Arc<dyn MarketApi>,
        community: Arc<dyn CommunityApi>,
        tickers: Arc<TickerStore>,
        bookmarks: Arc<BookmarkStore>,
        opts: SessionOptions,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let pager = Arc::new(FeedPager::new(
            Arc::clone(&community),
            opts.region,
            opts.sort,
            opts.page_size,
        ));
        let scheduler =
            BatchScheduler::new(Arc::clone(&tickers), market, opts.batch.clone(), shutdown_rx);
        let sync = BookmarkSync::new(Arc::clone(&community), Arc::clone(&bookmarks));
        Arc::new(Self {
            tickers,
            bookmarks,
            community,
            pager,
            scheduler,
            sync,
            state: Mutex::new(SessionState {
                region: opts.region,
                sort: opts.sort,
                user_id: opts.user_id,
            }),
            autoload_debounce: opts.autoload_debounce,
            settle_delay: opts.settle_delay,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn locked_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ----- lifecycle -----

    /// Load the identity's bookmarks and the first feed page.
    ///
    /// The bookmark refresh is best effort; the feed renders without it.
    pub async fn start(&self) -> PageLoad {
        let (region, user) = {
            let state = self.locked_state();
            (state.region, state.user_id.clone())
        };
        if let Some(user_id) = user {
            if let Err(e) = self.sync.refresh(&user_id, region).await {
                warn!("[session] bookmark refresh failed: {e:#}");
            }
        }
        self.load_next_page().await
    }

    /// Spawn the auto-continuation loop.
    ///
    /// While more rows exist and no fetch is in flight, the next page loads
    /// after each debounce interval. The loop stays alive across resets and
    /// exits on shutdown.
    pub fn run_autoload(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let mut shutdown = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                if *shutdown.borrow() {
                    break;
                }
                let stopped = tokio::select! {
                    _ = tokio::time::sleep(session.autoload_debounce) => false,
                    _ = shutdown.changed() => true,
                };
                if stopped || *shutdown.borrow() {
                    break;
                }
                if session.pager.is_fetching() || !session.pager.has_more() {
                    continue;
                }
                session.load_next_page().await;
            }
            debug!("[session] autoload loop stopped");
        });
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner).push(handle);
    }

    /// Stop all background work. Idempotent.
    ///
    /// Signals the shutdown channel, which also makes running batch cycles
    /// abort their unsettled tickets, then waits for the session's own tasks
    /// to finish.
    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        for task in tasks {
            let _ = task.await;
        }
        info!("[session] stopped");
    }

    // ----- feed -----

    /// Load the next feed page and schedule market data for its rows.
    pub async fn load_next_page(&self) -> PageLoad {
        let outcome = self.pager.load_next_page().await;
        if let PageLoad::Loaded { new_symbols, has_more } = &outcome {
            debug!(
                "[session] page loaded: {} new symbol(s), has_more={has_more}",
                new_symbols.len()
            );
            self.schedule_missing();
        }
        outcome
    }

    /// Hand the complete candidate list to the batch scheduler.
    ///
    /// The store filters out covered symbols, and because the list is always
    /// complete, candidates dropped by a running cycle are picked up again
    /// on the next trigger.
    fn schedule_missing(&self) {
        let region = self.locked_state().region;
        self.scheduler.schedule_feed_load(region, self.pager.symbols());
    }

    /// Accumulated rows merged with store snapshots, bookmarked first.
    pub fn visible_items(&self) -> Vec<FeedItem> {
        let mut items = self.pager.items();
        for item in &mut items {
            // The store is refreshed after the page was fetched, so a Ready
            // snapshot there beats whatever the row embedded.
            if let Some(snapshot) = self.tickers.snapshot(&item.symbol) {
                item.snapshot = Some(snapshot);
            }
        }
        self.bookmarks.order_front(items, |item| &item.symbol)
    }

    pub fn has_more(&self) -> bool {
        self.pager.has_more()
    }

    /// Switch market region: reset paging, reload bookmarks, load page one.
    pub async fn set_region(&self, region: Region) {
        let (changed, sort, user) = {
            let mut state = self.locked_state();
            let changed = state.region != region;
            state.region = region;
            (changed, state.sort, state.user_id.clone())
        };
        if !changed {
            return;
        }
        info!("[session] switching region to {region}");
        self.pager.reset(region, sort);
        if let Some(user_id) = user {
            if let Err(e) = self.sync.refresh(&user_id, region).await {
                warn!("[session] bookmark refresh failed: {e:#}");
            }
        }
        self.load_next_page().await;
    }

    /// Switch feed ordering: reset paging and load page one.
    pub async fn set_sort(&self, sort: FeedSortKey) {
        let (changed, region) = {
            let mut state = self.locked_state();
            let changed = state.sort != sort;
            state.sort = sort;
            (changed, state.region)
        };
        if !changed {
            return;
        }
        info!("[session] switching sort to {sort}");
        self.pager.reset(region, sort);
        self.load_next_page().await;
    }

    /// Adopt a new identity (or none) and realign the bookmark set.
    ///
    /// Feed rows keep their previous per-user vote marks until the next
    /// reset; votes are server data and refresh with the feed.
    pub async fn set_identity(&self, user_id: Option<String>) {
        let region = {
            let mut state = self.locked_state();
            state.user_id = user_id.clone();
            state.region
        };
        match user_id {
            Some(id) => {
                if let Err(e) = self.sync.refresh(&id, region).await {
                    warn!("[session] bookmark refresh failed: {e:#}");
                }
            }
            None => self.bookmarks.clear(),
        }
    }

    // ----- market data -----

    /// Drop a symbol's cached data and fetch it again.
    pub fn refresh_symbol(&self, symbol: &str) {
        self.tickers.force_refresh(symbol);
        let region = self.locked_state().region;
        self.scheduler.schedule_interactive(region, vec![symbol.to_string()]);
    }

    /// Symbol search, warming the cache for every hit.
    pub async fn lookup_symbols(&self, query: &str) -> Result<Vec<SymbolInfo>> {
        let region = self.locked_state().region;
        let hits = self.community.search_symbols(query, region).await?;
        if !hits.is_empty() {
            let symbols = hits.iter().map(|hit| hit.symbol.clone()).collect();
            self.scheduler.schedule_interactive(region, symbols);
        }
        Ok(hits)
    }

    // ----- interactions -----

    /// Toggle a bookmark and return the confirmed membership.
    ///
    /// A newly bookmarked symbol outside the loaded feed gets its market
    /// data fetched right away.
    pub async fn toggle_bookmark(&self, symbol: &str) -> Result<bool> {
        let region = self.locked_state().region;
        let member = self.sync.toggle(symbol, region).await?;
        if member {
            self.scheduler.schedule_interactive(region, vec![symbol.to_string()]);
        }
        Ok(member)
    }

    /// Build a vote control for any target.
    ///
    /// Settlement of a stock vote refreshes the matching feed row's
    /// aggregates; other target kinds settle without touching the feed.
    pub fn vote_controller(
        &self,
        target: VoteTarget,
        initial_value: i8,
        initial_score: i64,
    ) -> Arc<VoteController> {
        let pager = Arc::clone(&self.pager);
        let callback: SettleCallback = Arc::new(move |outcome: VoteOutcome| {
            if outcome.target.kind == TargetKind::Stock {
                pager.apply_vote_receipt(&outcome.target.id, &outcome.receipt);
            }
        });
        VoteController::new(
            Arc::clone(&self.community),
            target,
            initial_value,
            initial_score,
            self.settle_delay,
            Some(callback),
        )
    }

    /// Vote control for a loaded feed row, seeded from its current state.
    ///
    /// `None` when the symbol is not in the accumulated feed.
    pub fn stock_vote_controller(&self, symbol: &str) -> Option<Arc<VoteController>> {
        let (value, score) = self.pager.vote_baseline(symbol)?;
        Some(self.vote_controller(VoteTarget::stock(symbol), value, score))
    }

    // ----- shared state handles -----

    pub fn tickers(&self) -> &Arc<TickerStore> {
        &self.tickers
    }

    pub fn bookmarks(&self) -> &Arc<BookmarkStore> {
        &self.bookmarks
    }
}
