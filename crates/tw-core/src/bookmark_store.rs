//! Per-user bookmark membership set with epoch-guarded refresh.
//!
//! The set is refreshed wholesale from the backend whenever the identity or
//! region changes. Each refresh is tagged with an epoch at dispatch time and
//! applied only if no newer refresh started meanwhile, so a slow response for
//! an old identity can never overwrite a newer set.
//!
//! Optimistic toggles flip membership locally first; the caller rolls the
//! flip back if the backend rejects it.

use std::sync::{Mutex, MutexGuard, PoisonError};

use ahash::AHashSet;

use crate::types::Region;

/// Identity and region a bookmark set belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookmarkScope {
    pub user_id: String,
    pub region: Region,
}

#[derive(Default)]
struct BookmarkInner {
    /// Scope of the currently applied set.
    scope: Option<BookmarkScope>,
    /// Scope of the most recently issued refresh.
    pending_scope: Option<BookmarkScope>,
    symbols: AHashSet<String>,
    epoch: u64,
}

/// Shared bookmark membership set. One instance lives for the whole process.
#[derive(Default)]
pub struct BookmarkStore {
    inner: Mutex<BookmarkInner>,
}

impl BookmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> MutexGuard<'_, BookmarkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Issue a refresh epoch for the given scope.
    ///
    /// The returned epoch must be passed to [`replace`](Self::replace) when
    /// the backend responds; only the newest issued epoch will be applied.
    pub fn begin_refresh(&self, scope: BookmarkScope) -> u64 {
        let mut inner = self.locked();
        inner.epoch += 1;
        inner.pending_scope = Some(scope);
        inner.epoch
    }

    /// Replace the whole set with backend truth.
    ///
    /// Discarded (returns `false`) when a newer refresh or a clear was issued
    /// after this epoch.
    pub fn replace(&self, epoch: u64, symbols: Vec<String>) -> bool {
        let mut inner = self.locked();
        if epoch != inner.epoch {
            return false;
        }
        inner.symbols = symbols.into_iter().collect();
        inner.scope = inner.pending_scope.clone();
        true
    }

    /// Drop the set entirely (identity became anonymous).
    ///
    /// Also invalidates any refresh still in flight.
    pub fn clear(&self) {
        let mut inner = self.locked();
        inner.epoch += 1;
        inner.scope = None;
        inner.pending_scope = None;
        inner.symbols.clear();
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.locked().symbols.contains(symbol)
    }

    /// Optimistically toggle membership; returns the new membership.
    pub fn flip(&self, symbol: &str) -> bool {
        let mut inner = self.locked();
        if inner.symbols.remove(symbol) {
            false
        } else {
            inner.symbols.insert(symbol.to_string());
            true
        }
    }

    /// Pin membership to a known value (server truth or rollback).
    pub fn set(&self, symbol: &str, member: bool) {
        let mut inner = self.locked();
        if member {
            inner.symbols.insert(symbol.to_string());
        } else {
            inner.symbols.remove(symbol);
        }
    }

    /// Scope of the currently applied set.
    pub fn scope(&self) -> Option<BookmarkScope> {
        self.locked().scope.clone()
    }

    pub fn len(&self) -> usize {
        self.locked().symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locked().symbols.is_empty()
    }

    /// Stable partition: bookmarked items first, both groups keeping their
    /// incoming relative order.
    pub fn order_front<T>(&self, items: Vec<T>, key: impl Fn(&T) -> &str) -> Vec<T> {
        let inner = self.locked();
        let mut front = Vec::with_capacity(items.len());
        let mut back = Vec::new();
        for item in items {
            if inner.symbols.contains(key(&item)) {
                front.push(item);
            } else {
                back.push(item);
            }
        }
        front.append(&mut back);
        front
    }
}
