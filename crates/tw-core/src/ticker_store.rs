//! Process-wide market snapshot store with in-flight fetch claims.
//!
//! Every feed surface reads market data out of one shared [`TickerStore`].
//! The store has no TTL: once a symbol resolves it stays resolved, and a
//! symbol only becomes fetchable again through [`TickerStore::force_refresh`].
//!
//! The fetch lifecycle is a three-step protocol:
//!
//! 1. [`begin_fetch`](TickerStore::begin_fetch) filters a candidate list down
//!    to symbols that are neither cached nor already being fetched, marks the
//!    survivors in-flight, and hands back one [`FetchTicket`] per survivor.
//!    The filter and the marking happen under a single lock acquisition, so
//!    two racing callers can never both claim the same symbol.
//! 2. [`merge_chunk`](TickerStore::merge_chunk) settles tickets with results.
//!    Each ticket carries the dispatch token issued at claim time; a ticket
//!    whose token has been superseded (by `force_refresh` plus a re-claim)
//!    is discarded, so late responses never overwrite newer state.
//! 3. [`abort_fetch`](TickerStore::abort_fetch) releases claims without
//!    writing results, used when a dispatch is cancelled before its request
//!    settles.
//!
//! Failed or missing symbols settle as [`TickerEntry::Unavailable`], which is
//! terminal data, not an error state: it stops refetch loops against symbols
//! the backend does not know.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::{AHashMap, AHashSet};
use tracing::debug;

use crate::types::MarketSnapshot;

/// Listener invoked after snapshots merge, with the affected symbols.
///
/// Called outside the store lock, so a listener may re-enter the store.
pub type StoreListener = Arc<dyn Fn(&[String]) + Send + Sync>;

/// Read result for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum TickerEntry {
    /// A fetch succeeded. The snapshot may still gain series data through
    /// the one-time history backfill.
    Ready(MarketSnapshot),
    /// A fetch settled and yielded nothing. Rendered as a placeholder and
    /// never refetched until a forced refresh.
    Unavailable,
}

/// Claim on one symbol, issued by [`TickerStore::begin_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    symbol: String,
    token: u64,
}

impl FetchTicket {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

#[derive(Default)]
struct StoreInner {
    entries: AHashMap<String, TickerEntry>,
    in_flight: AHashSet<String>,
    /// Newest dispatch token per symbol. A settlement is applied only when
    /// its ticket still carries this token.
    latest_token: AHashMap<String, u64>,
    /// Symbols whose one-time history backfill has been claimed.
    backfilled: AHashSet<String>,
    next_token: u64,
}

/// Shared snapshot cache. One instance lives for the whole process and is
/// shared across every feed session.
#[derive(Default)]
pub struct TickerStore {
    inner: Mutex<StoreInner>,
    listeners: Mutex<Vec<StoreListener>>,
}

impl TickerStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current entry for a symbol, if any fetch has settled.
    pub fn get(&self, symbol: &str) -> Option<TickerEntry> {
        self.locked().entries.get(symbol).cloned()
    }

    /// Ready snapshot for a symbol; `None` for unknown or unavailable symbols.
    pub fn snapshot(&self, symbol: &str) -> Option<MarketSnapshot> {
        match self.locked().entries.get(symbol) {
            Some(TickerEntry::Ready(snap)) => Some(snap.clone()),
            _ => None,
        }
    }

    /// Whether a fetch for this symbol would actually dispatch.
    pub fn needs_fetch(&self, symbol: &str) -> bool {
        let inner = self.locked();
        !inner.entries.contains_key(symbol) && !inner.in_flight.contains(symbol)
    }

    pub fn is_in_flight(&self, symbol: &str) -> bool {
        self.locked().in_flight.contains(symbol)
    }

    /// Claim every candidate symbol that is neither cached nor in flight.
    ///
    /// Duplicate candidates yield a single ticket. Returns an empty vec when
    /// everything is already covered.
    pub fn begin_fetch(&self, symbols: &[String]) -> Vec<FetchTicket> {
        let mut inner = self.locked();
        let mut tickets = Vec::new();
        for symbol in symbols {
            if inner.entries.contains_key(symbol) || !inner.in_flight.insert(symbol.clone()) {
                continue;
            }
            inner.next_token += 1;
            let token = inner.next_token;
            inner.latest_token.insert(symbol.clone(), token);
            tickets.push(FetchTicket { symbol: symbol.clone(), token });
        }
        tickets
    }

    /// Settle a batch of tickets with their fetch results.
    ///
    /// `None` marks a symbol [`TickerEntry::Unavailable`], but never
    /// downgrades an existing `Ready` entry. Tickets whose token has been
    /// superseded are discarded without touching state. Returns the symbols
    /// actually written, after notifying listeners about them.
    pub fn merge_chunk(
        &self,
        settled: Vec<(FetchTicket, Option<MarketSnapshot>)>,
    ) -> Vec<String> {
        let mut applied = Vec::new();
        {
            let mut inner = self.locked();
            for (ticket, result) in settled {
                if inner.latest_token.get(&ticket.symbol) != Some(&ticket.token) {
                    debug!("[store] discarding superseded result for {}", ticket.symbol);
                    continue;
                }
                if !inner.in_flight.remove(&ticket.symbol) {
                    // Already settled or aborted; nothing to write.
                    continue;
                }
                match result {
                    Some(snap) => {
                        inner.entries.insert(ticket.symbol.clone(), TickerEntry::Ready(snap));
                    }
                    None => {
                        inner
                            .entries
                            .entry(ticket.symbol.clone())
                            .or_insert(TickerEntry::Unavailable);
                    }
                }
                applied.push(ticket.symbol);
            }
        }
        if !applied.is_empty() {
            self.notify(&applied);
        }
        applied
    }

    /// Release claims without writing results.
    ///
    /// Used when a dispatch is cancelled; the symbols become fetchable again
    /// immediately. Tickets superseded in the meantime are left alone.
    pub fn abort_fetch(&self, tickets: &[FetchTicket]) {
        let mut inner = self.locked();
        for ticket in tickets {
            if inner.latest_token.get(&ticket.symbol) == Some(&ticket.token) {
                inner.in_flight.remove(&ticket.symbol);
            }
        }
    }

    /// Drop a symbol's entry so the next load fetches it fresh.
    ///
    /// Also invalidates any outstanding dispatch for the symbol and re-arms
    /// its one-time backfill. Used after a symbol is newly bookmarked or a
    /// manual refresh action.
    pub fn force_refresh(&self, symbol: &str) {
        let mut inner = self.locked();
        inner.entries.remove(symbol);
        inner.in_flight.remove(symbol);
        inner.backfilled.remove(symbol);
        // A late result from a pre-refresh dispatch must not repopulate the
        // slot with data the user explicitly asked to replace.
        inner.next_token += 1;
        let token = inner.next_token;
        inner.latest_token.insert(symbol.to_string(), token);
    }

    /// Claim the one-time history backfill for a symbol.
    ///
    /// Returns `true` exactly once per symbol lifetime (until a forced
    /// refresh re-arms it), and only while the symbol is `Ready`.
    pub fn claim_backfill(&self, symbol: &str) -> bool {
        let mut inner = self.locked();
        if !matches!(inner.entries.get(symbol), Some(TickerEntry::Ready(_))) {
            return false;
        }
        inner.backfilled.insert(symbol.to_string())
    }

    /// Merge backfill data into a `Ready` snapshot, filling only fields the
    /// primary fetch left empty.
    ///
    /// The entry is replaced wholesale rather than edited in place, so a
    /// clone taken by a concurrent reader never sees a partial merge.
    /// Returns whether anything was written.
    pub fn apply_backfill(&self, symbol: &str, fill: &MarketSnapshot) -> bool {
        let applied = {
            let mut inner = self.locked();
            let Some(TickerEntry::Ready(current)) = inner.entries.get(symbol) else {
                return false;
            };
            let mut merged = current.clone();
            if merged.last_price.is_none() {
                merged.last_price = fill.last_price;
            }
            if merged.change.is_none() {
                merged.change = fill.change;
            }
            if merged.change_percent.is_none() {
                merged.change_percent = fill.change_percent;
            }
            if merged.currency.is_none() {
                merged.currency = fill.currency.clone();
            }
            if merged.series.is_empty() {
                merged.series = fill.series.clone();
            }
            let changed = merged != *current;
            if changed {
                inner.entries.insert(symbol.to_string(), TickerEntry::Ready(merged));
            }
            changed
        };
        if applied {
            self.notify(&[symbol.to_string()]);
        }
        applied
    }

    /// Register a listener for merged snapshot changes.
    pub fn subscribe(&self, listener: StoreListener) {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    fn notify(&self, symbols: &[String]) {
        let listeners: Vec<StoreListener> = self
            .listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for listener in listeners {
            listener(symbols);
        }
    }
}
