//! Batched market data loading with staggered chunk dispatch.
//!
//! A load cycle:
//!
//! 1. Claim candidates in the ticker store. Already-cached and in-flight
//!    symbols drop out here, so two overlapping cycles never fetch the same
//!    symbol twice.
//! 2. Partition the claims into fixed-size chunks.
//! 3. Dispatch one quote batch per chunk, separated by a stagger delay to
//!    stay under the backend's burst limits.
//! 4. Merge each response as it settles. Symbols missing from a response
//!    settle as unavailable.
//! 5. For rows that came back without sparkline data, run the one-time
//!    history backfill.
//!
//! Full-feed loads additionally hold a cycle flag: while one cycle runs,
//! further full-feed requests are dropped, since the next feed render
//! re-requests with the complete candidate list anyway. Interactive loads
//! (search hits, single-symbol refreshes) bypass the flag and use a smaller
//! chunk size.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use tw_api::MarketApi;
use tw_core::config::BatchConfig;
use tw_core::ticker_store::{FetchTicket, TickerStore};
use tw_core::types::{HistoryBar, MarketSnapshot, PricePoint, Region};

/// Tuning for batch dispatch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Chunk size for full-feed loads.
    pub bulk_chunk_size: usize,
    /// Chunk size for interactive loads.
    pub interactive_chunk_size: usize,
    /// Delay between successive chunk dispatches.
    pub stagger: Duration,
    /// Range parameter for history backfill queries.
    pub history_range: String,
    /// Interval parameter for history backfill queries.
    pub history_interval: String,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            bulk_chunk_size: 100,
            interactive_chunk_size: 12,
            stagger: Duration::from_millis(200),
            history_range: "1mo".to_string(),
            history_interval: "1d".to_string(),
        }
    }
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            bulk_chunk_size: config.effective_bulk_chunk_size(),
            interactive_chunk_size: config.effective_interactive_chunk_size(),
            stagger: config.effective_stagger(),
            history_range: config.effective_history_range(),
            history_interval: config.effective_history_interval(),
        }
    }
}

/// Coordinates batched quote fetching against one [`TickerStore`].
pub struct BatchScheduler {
    store: Arc<TickerStore>,
    api: Arc<dyn MarketApi>,
    opts: BatchOptions,
    /// Held while a full-feed load cycle is running.
    feed_cycle: Arc<AtomicBool>,
    shutdown: watch::Receiver<bool>,
}

impl BatchScheduler {
    pub fn new(
        store: Arc<TickerStore>,
        api: Arc<dyn MarketApi>,
        opts: BatchOptions,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            api,
            opts,
            feed_cycle: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    /// Start a full-feed load cycle for every candidate that needs data.
    ///
    /// Returns `false` when a cycle is already running and the request was
    /// dropped. A request whose candidates are all covered is a successful
    /// no-op.
    pub fn schedule_feed_load(&self, region: Region, symbols: Vec<String>) -> bool {
        if self
            .feed_cycle
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(
                "[batch] feed cycle already running, dropping request ({} candidates)",
                symbols.len()
            );
            return false;
        }

        let tickets = self.store.begin_fetch(&symbols);
        if tickets.is_empty() {
            self.feed_cycle.store(false, Ordering::SeqCst);
            return true;
        }
        info!(
            "[batch] feed load: {} of {} candidates need fetching",
            tickets.len(),
            symbols.len()
        );

        let store = Arc::clone(&self.store);
        let api = Arc::clone(&self.api);
        let opts = self.opts.clone();
        let chunk_size = opts.bulk_chunk_size;
        let flag = Arc::clone(&self.feed_cycle);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            run_cycle("feed", store, api, region, tickets, chunk_size, opts, shutdown).await;
            // The flag clears only after every chunk of this cycle settled.
            flag.store(false, Ordering::SeqCst);
        });
        true
    }

    /// Start an interactive load (search hits, refreshed symbols).
    ///
    /// Bypasses the feed-cycle flag so a long bulk load cannot starve a
    /// user-initiated lookup.
    pub fn schedule_interactive(&self, region: Region, symbols: Vec<String>) {
        let tickets = self.store.begin_fetch(&symbols);
        if tickets.is_empty() {
            return;
        }
        debug!("[batch] interactive load: {} symbol(s)", tickets.len());

        let store = Arc::clone(&self.store);
        let api = Arc::clone(&self.api);
        let opts = self.opts.clone();
        let chunk_size = opts.interactive_chunk_size;
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            run_cycle("interactive", store, api, region, tickets, chunk_size, opts, shutdown).await;
        });
    }
}

/// Drive one load cycle: chunk, stagger, dispatch, wait for settlement.
#[allow(clippy::too_many_arguments)]
async fn run_cycle(
    label: &'static str,
    store: Arc<TickerStore>,
    api: Arc<dyn MarketApi>,
    region: Region,
    tickets: Vec<FetchTicket>,
    chunk_size: usize,
    opts: BatchOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    if *shutdown.borrow() {
        store.abort_fetch(&tickets);
        return;
    }

    let mut chunks: Vec<Vec<FetchTicket>> =
        tickets.chunks(chunk_size.max(1)).map(<[_]>::to_vec).collect();
    let total = chunks.len();

    let mut handles = Vec::new();
    for idx in 0..chunks.len() {
        if idx > 0 {
            let stopped = tokio::select! {
                _ = tokio::time::sleep(opts.stagger) => false,
                _ = shutdown.changed() => true,
            };
            if stopped || *shutdown.borrow() {
                break;
            }
        }
        let chunk = std::mem::take(&mut chunks[idx]);
        debug!("[{label}] dispatching chunk {}/{total} ({} symbols)", idx + 1, chunk.len());
        handles.push(tokio::spawn(fetch_chunk(
            Arc::clone(&store),
            Arc::clone(&api),
            region,
            chunk,
            opts.clone(),
            shutdown.clone(),
        )));
    }

    // Claims for chunks that never dispatched are released so their symbols
    // stay fetchable after shutdown or restart.
    for chunk in chunks.iter().filter(|c| !c.is_empty()) {
        store.abort_fetch(chunk);
    }

    let dispatched = handles.len();
    join_all(handles).await;
    debug!("[{label}] cycle complete ({dispatched}/{total} chunks dispatched)");
}

/// Fetch one chunk and settle its tickets in the store.
async fn fetch_chunk(
    store: Arc<TickerStore>,
    api: Arc<dyn MarketApi>,
    region: Region,
    tickets: Vec<FetchTicket>,
    opts: BatchOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let symbols: Vec<String> = tickets.iter().map(|t| t.symbol().to_string()).collect();
    let outcome = tokio::select! {
        result = api.fetch_quotes(&symbols, region) => Some(result),
        _ = shutdown.changed() => None,
    };
    let Some(result) = outcome else {
        debug!("[batch] chunk cancelled ({} symbols)", tickets.len());
        store.abort_fetch(&tickets);
        return;
    };

    match result {
        Ok(mut quotes) => {
            let mut settled = Vec::with_capacity(tickets.len());
            let mut needs_series = Vec::new();
            for ticket in tickets {
                match quotes.remove(ticket.symbol()) {
                    Some(snap) => {
                        if !snap.has_series() {
                            needs_series.push(ticket.symbol().to_string());
                        }
                        settled.push((ticket, Some(snap)));
                    }
                    // Absent from the response: the backend does not know
                    // the symbol.
                    None => settled.push((ticket, None)),
                }
            }
            store.merge_chunk(settled);

            for symbol in needs_series {
                if *shutdown.borrow() {
                    break;
                }
                if !store.claim_backfill(&symbol) {
                    continue;
                }
                backfill_series(store.as_ref(), api.as_ref(), &symbol, &opts).await;
            }
        }
        Err(e) => {
            // The whole batch failed. Settling every claim as unavailable
            // turns spinners into placeholders instead of refetch loops.
            warn!("[batch] quote batch failed ({} symbols): {e:#}", tickets.len());
            let settled = tickets.into_iter().map(|t| (t, None)).collect();
            store.merge_chunk(settled);
        }
    }
}

/// Fetch history for one symbol and fill the empty snapshot fields.
async fn backfill_series(
    store: &TickerStore,
    api: &dyn MarketApi,
    symbol: &str,
    opts: &BatchOptions,
) {
    match api.fetch_history(symbol, &opts.history_range, &opts.history_interval).await {
        Ok(bars) if !bars.is_empty() => {
            let fill = snapshot_from_history(&bars);
            if store.apply_backfill(symbol, &fill) {
                debug!("[batch] history backfill for {symbol}: {} bars", bars.len());
            }
        }
        Ok(_) => debug!("[batch] no history available for {symbol}"),
        Err(e) => warn!("[batch] history backfill failed for {symbol}: {e:#}"),
    }
}

/// Derive quote fields from history bars: the last close is the price, the
/// prior close anchors change and change percent.
fn snapshot_from_history(bars: &[HistoryBar]) -> MarketSnapshot {
    let series: Vec<PricePoint> = bars
        .iter()
        .map(|b| PricePoint { timestamp_ms: b.timestamp_ms, price: b.close })
        .collect();
    let last = bars.last();
    let prev = bars.len().checked_sub(2).and_then(|i| bars.get(i));
    let (change, change_percent) = match (last, prev) {
        (Some(l), Some(p)) if p.close != 0.0 => {
            let delta = l.close - p.close;
            (Some(delta), Some(delta / p.close * 100.0))
        }
        _ => (None, None),
    };
    MarketSnapshot {
        last_price: last.map(|b| b.close),
        change,
        change_percent,
        currency: None,
        series,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicBool;

    use anyhow::Result;
    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use tw_core::ticker_store::TickerEntry;

    struct MockMarket {
        quotes: Mutex<HashMap<String, MarketSnapshot>>,
        history: Mutex<HashMap<String, Vec<HistoryBar>>>,
        latency: Duration,
        fail_batches: AtomicBool,
        /// (virtual dispatch time, symbols) per quote batch.
        batches: Mutex<Vec<(Instant, Vec<String>)>>,
        history_calls: Mutex<Vec<String>>,
    }

    impl MockMarket {
        fn new(latency: Duration) -> Self {
            Self {
                quotes: Mutex::new(HashMap::new()),
                history: Mutex::new(HashMap::new()),
                latency,
                fail_batches: AtomicBool::new(false),
                batches: Mutex::new(Vec::new()),
                history_calls: Mutex::new(Vec::new()),
            }
        }

        fn add_quote(&self, symbol: &str, snap: MarketSnapshot) {
            self.quotes.lock().unwrap().insert(symbol.to_string(), snap);
        }

        fn batch_log(&self) -> Vec<(Instant, Vec<String>)> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MarketApi for MockMarket {
        async fn fetch_quotes(
            &self,
            symbols: &[String],
            _region: Region,
        ) -> Result<HashMap<String, MarketSnapshot>> {
            self.batches.lock().unwrap().push((Instant::now(), symbols.to_vec()));
            tokio::time::sleep(self.latency).await;
            if self.fail_batches.load(Ordering::SeqCst) {
                anyhow::bail!("quote backend down");
            }
            let data = self.quotes.lock().unwrap();
            Ok(symbols
                .iter()
                .filter_map(|s| data.get(s).map(|v| (s.clone(), v.clone())))
                .collect())
        }

        async fn fetch_history(
            &self,
            symbol: &str,
            _range: &str,
            _interval: &str,
        ) -> Result<Vec<HistoryBar>> {
            self.history_calls.lock().unwrap().push(symbol.to_string());
            Ok(self.history.lock().unwrap().get(symbol).cloned().unwrap_or_default())
        }
    }

    fn quote(price: f64, with_series: bool) -> MarketSnapshot {
        MarketSnapshot {
            last_price: Some(price),
            change: Some(0.0),
            change_percent: Some(0.0),
            currency: Some("USD".to_string()),
            series: if with_series {
                vec![PricePoint { timestamp_ms: 1, price }]
            } else {
                Vec::new()
            },
        }
    }

    fn syms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn scheduler_with(
        api: Arc<MockMarket>,
        opts: BatchOptions,
    ) -> (BatchScheduler, Arc<TickerStore>, watch::Sender<bool>) {
        let store = Arc::new(TickerStore::new());
        let (tx, rx) = watch::channel(false);
        let sched = BatchScheduler::new(Arc::clone(&store), api, opts, rx);
        (sched, store, tx)
    }

    /// Let spawned tasks and virtual timers run to quiescence.
    async fn settle(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_are_staggered() {
        let api = Arc::new(MockMarket::new(Duration::ZERO));
        for i in 0..25 {
            api.add_quote(&format!("S{i}"), quote(1.0, true));
        }
        let opts = BatchOptions { bulk_chunk_size: 10, ..BatchOptions::default() };
        let (sched, store, _tx) = scheduler_with(Arc::clone(&api), opts);

        let candidates: Vec<String> = (0..25).map(|i| format!("S{i}")).collect();
        assert!(sched.schedule_feed_load(Region::Us, candidates));
        settle(2_000).await;

        let log = api.batch_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].1.len(), 10);
        assert_eq!(log[1].1.len(), 10);
        assert_eq!(log[2].1.len(), 5);
        // Dispatch times are separated by the stagger delay.
        assert_eq!(log[1].0 - log[0].0, Duration::from_millis(200));
        assert_eq!(log[2].0 - log[1].0, Duration::from_millis(200));

        for i in 0..25 {
            assert!(store.snapshot(&format!("S{i}")).is_some());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_loads_never_duplicate_symbols() {
        let api = Arc::new(MockMarket::new(Duration::from_millis(300)));
        for s in ["A", "B", "C"] {
            api.add_quote(s, quote(1.0, true));
        }
        let (sched, store, _tx) = scheduler_with(Arc::clone(&api), BatchOptions::default());

        assert!(sched.schedule_feed_load(Region::Us, syms(&["A", "B"])));
        // B is already claimed, so the interactive load only fetches C.
        sched.schedule_interactive(Region::Us, syms(&["B", "C"]));
        settle(2_000).await;

        let log = api.batch_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].1, syms(&["A", "B"]));
        assert_eq!(log[1].1, syms(&["C"]));
        assert!(store.snapshot("B").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn feed_cycle_flag_drops_second_request() {
        let api = Arc::new(MockMarket::new(Duration::from_millis(300)));
        api.add_quote("A", quote(1.0, true));
        api.add_quote("B", quote(2.0, true));
        let (sched, store, _tx) = scheduler_with(Arc::clone(&api), BatchOptions::default());

        assert!(sched.schedule_feed_load(Region::Us, syms(&["A"])));
        // Second full-feed request while the cycle runs is dropped whole.
        assert!(!sched.schedule_feed_load(Region::Us, syms(&["B"])));
        settle(1_000).await;

        assert_eq!(api.batch_log().len(), 1);
        assert!(store.needs_fetch("B"));

        // After the cycle clears, the same request goes through.
        assert!(sched.schedule_feed_load(Region::Us, syms(&["B"])));
        settle(1_000).await;
        assert!(store.snapshot("B").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn interactive_load_bypasses_feed_cycle() {
        let api = Arc::new(MockMarket::new(Duration::from_millis(500)));
        api.add_quote("A", quote(1.0, true));
        api.add_quote("X", quote(9.0, true));
        let (sched, store, _tx) = scheduler_with(Arc::clone(&api), BatchOptions::default());

        assert!(sched.schedule_feed_load(Region::Us, syms(&["A"])));
        sched.schedule_interactive(Region::Us, syms(&["X"]));

        // Both batches are dispatched immediately, before either settles.
        settle(10).await;
        assert_eq!(api.batch_log().len(), 2);

        settle(2_000).await;
        assert!(store.snapshot("X").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_and_failed_symbols_settle_unavailable() {
        let api = Arc::new(MockMarket::new(Duration::ZERO));
        api.add_quote("A", quote(1.0, true));
        let (sched, store, _tx) = scheduler_with(Arc::clone(&api), BatchOptions::default());

        assert!(sched.schedule_feed_load(Region::Us, syms(&["A", "GONE"])));
        settle(1_000).await;

        assert!(matches!(store.get("A"), Some(TickerEntry::Ready(_))));
        assert_eq!(store.get("GONE"), Some(TickerEntry::Unavailable));
        // Unavailable is settled data: no refetch on the next cycle.
        assert!(sched.schedule_feed_load(Region::Us, syms(&["A", "GONE"])));
        settle(1_000).await;
        assert_eq!(api.batch_log().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_failure_clears_cycle_flag() {
        let api = Arc::new(MockMarket::new(Duration::ZERO));
        api.fail_batches.store(true, Ordering::SeqCst);
        let (sched, store, _tx) = scheduler_with(Arc::clone(&api), BatchOptions::default());

        assert!(sched.schedule_feed_load(Region::Us, syms(&["A", "B"])));
        settle(1_000).await;

        assert_eq!(store.get("A"), Some(TickerEntry::Unavailable));
        assert_eq!(store.get("B"), Some(TickerEntry::Unavailable));
        // The flag cleared even though the batch failed.
        assert!(sched.schedule_feed_load(Region::Us, syms(&["C"])));
    }

    #[tokio::test(start_paused = true)]
    async fn history_backfill_runs_once_for_seriesless_rows() {
        let api = Arc::new(MockMarket::new(Duration::ZERO));
        api.add_quote("FULL", quote(10.0, true));
        api.add_quote("BARE", quote(20.0, false));
        api.history.lock().unwrap().insert(
            "BARE".to_string(),
            vec![
                HistoryBar { timestamp_ms: 1_000, open: 18.0, close: 19.0 },
                HistoryBar { timestamp_ms: 2_000, open: 19.0, close: 20.0 },
            ],
        );
        let (sched, store, _tx) = scheduler_with(Arc::clone(&api), BatchOptions::default());

        assert!(sched.schedule_feed_load(Region::Us, syms(&["FULL", "BARE"])));
        settle(1_000).await;

        assert_eq!(api.history_calls.lock().unwrap().clone(), vec!["BARE".to_string()]);
        let bare = store.snapshot("BARE").unwrap();
        assert_eq!(bare.series.len(), 2);
        // Quote fields stay as the primary response delivered them.
        assert_eq!(bare.last_price, Some(20.0));
    }

    #[test]
    fn derived_quote_from_history() {
        let bars = vec![
            HistoryBar { timestamp_ms: 1, open: 0.0, close: 50.0 },
            HistoryBar { timestamp_ms: 2, open: 0.0, close: 40.0 },
            HistoryBar { timestamp_ms: 3, open: 0.0, close: 44.0 },
        ];
        let snap = snapshot_from_history(&bars);
        assert_eq!(snap.last_price, Some(44.0));
        assert_eq!(snap.change, Some(4.0));
        assert_eq!(snap.change_percent, Some(10.0));
        assert_eq!(snap.series.len(), 3);

        let single = snapshot_from_history(&bars[..1]);
        assert_eq!(single.last_price, Some(50.0));
        assert_eq!(single.change, None);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_cycle_releases_undispatched_claims() {
        let api = Arc::new(MockMarket::new(Duration::ZERO));
        for i in 0..4 {
            api.add_quote(&format!("S{i}"), quote(1.0, true));
        }
        let opts = BatchOptions { bulk_chunk_size: 2, ..BatchOptions::default() };
        let (sched, store, tx) = scheduler_with(Arc::clone(&api), opts);

        let candidates: Vec<String> = (0..4).map(|i| format!("S{i}")).collect();
        assert!(sched.schedule_feed_load(Region::Us, candidates));

        // Stop during the stagger gap, before chunk 2 dispatches.
        settle(50).await;
        tx.send(true).unwrap();
        settle(1_000).await;

        assert_eq!(api.batch_log().len(), 1);
        // Chunk 1 settled normally; chunk 2's claims were released.
        assert!(store.snapshot("S0").is_some());
        assert!(store.snapshot("S1").is_some());
        assert!(store.needs_fetch("S2"));
        assert!(store.needs_fetch("S3"));
    }
}
