//! Backend synchronization for the bookmark set.
//!
//! Refreshes pull the whole set for the current identity; the store's epoch
//! guard drops responses that were overtaken by a newer refresh or a
//! sign-out. Toggles flip membership locally first and reconcile with the
//! backend's answer, rolling back on failure.

use std::sync::Arc;

use anyhow::Result;
use tracing::{debug, info, warn};

use tw_api::CommunityApi;
use tw_core::bookmark_store::{BookmarkScope, BookmarkStore};
use tw_core::types::Region;

/// Ties a [`BookmarkStore`] to the community backend.
pub struct BookmarkSync {
    api: Arc<dyn CommunityApi>,
    store: Arc<BookmarkStore>,
}

impl BookmarkSync {
    pub fn new(api: Arc<dyn CommunityApi>, store: Arc<BookmarkStore>) -> Self {
        Self { api, store }
    }

    /// Reload the set for an identity and region.
    ///
    /// Returns the number of applied bookmarks, or zero when the response
    /// was overtaken by a newer refresh and discarded.
    pub async fn refresh(&self, user_id: &str, region: Region) -> Result<usize> {
        let scope = BookmarkScope { user_id: user_id.to_string(), region };
        // Claim the epoch before the round trip so anything issued later
        // outranks this response.
        let epoch = self.store.begin_refresh(scope);

        let symbols = self.api.fetch_bookmarks(user_id, region).await?;
        let count = symbols.len();
        if self.store.replace(epoch, symbols) {
            info!("[bookmarks] loaded {count} bookmarks for {user_id} ({region})");
            Ok(count)
        } else {
            debug!("[bookmarks] discarding stale bookmark set for {user_id} ({region})");
            Ok(0)
        }
    }

    /// Toggle one symbol's membership, optimistically.
    ///
    /// Returns the confirmed membership. On backend failure the local flip
    /// is rolled back and the error propagated.
    pub async fn toggle(&self, symbol: &str, region: Region) -> Result<bool> {
        let optimistic = self.store.flip(symbol);
        match self.api.toggle_bookmark(symbol, region).await {
            Ok(member) => {
                if member != optimistic {
                    debug!("[bookmarks] {symbol} diverged: local={optimistic} server={member}");
                }
                self.store.set(symbol, member);
                Ok(member)
            }
            Err(e) => {
                warn!("[bookmarks] toggle failed for {symbol}, rolling back: {e:#}");
                self.store.set(symbol, !optimistic);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use tw_core::types::{FeedPage, FeedSortKey, SymbolInfo, VoteReceipt, VoteTarget};

    #[derive(Default)]
    struct MockBookmarks {
        sets: Mutex<VecDeque<Result<Vec<String>>>>,
        toggles: Mutex<VecDeque<Result<bool>>>,
        /// Per-call latency for `fetch_bookmarks`, defaulting to zero.
        latencies: Mutex<VecDeque<Duration>>,
    }

    impl MockBookmarks {
        fn push_set(&self, symbols: &[&str], latency_ms: u64) {
            self.sets
                .lock()
                .unwrap()
                .push_back(Ok(symbols.iter().map(|s| s.to_string()).collect()));
            self.latencies.lock().unwrap().push_back(Duration::from_millis(latency_ms));
        }

        fn push_toggle(&self, reply: Result<bool>) {
            self.toggles.lock().unwrap().push_back(reply);
        }
    }

    #[async_trait]
    impl CommunityApi for MockBookmarks {
        async fn fetch_feed_page(
            &self,
            _region: Region,
            _sort: FeedSortKey,
            _offset: usize,
            _limit: usize,
        ) -> Result<FeedPage> {
            unimplemented!("not used by bookmark tests")
        }

        async fn cast_vote(&self, _target: &VoteTarget, _value: i8) -> Result<VoteReceipt> {
            unimplemented!("not used by bookmark tests")
        }

        async fn toggle_bookmark(&self, _symbol: &str, _region: Region) -> Result<bool> {
            self.toggles.lock().unwrap().pop_front().unwrap_or(Ok(true))
        }

        async fn fetch_bookmarks(&self, _user_id: &str, _region: Region) -> Result<Vec<String>> {
            // Replies pair with call order, not completion order.
            let latency = self.latencies.lock().unwrap().pop_front().unwrap_or(Duration::ZERO);
            let reply = self.sets.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()));
            tokio::time::sleep(latency).await;
            reply
        }

        async fn search_symbols(&self, _query: &str, _region: Region) -> Result<Vec<SymbolInfo>> {
            unimplemented!("not used by bookmark tests")
        }
    }

    fn sync(api: &Arc<MockBookmarks>) -> (BookmarkSync, Arc<BookmarkStore>) {
        let store = Arc::new(BookmarkStore::new());
        (BookmarkSync::new(Arc::clone(api) as Arc<dyn CommunityApi>, Arc::clone(&store)), store)
    }

    #[tokio::test]
    async fn refresh_applies_backend_set() {
        let api = Arc::new(MockBookmarks::default());
        api.push_set(&["AAPL", "TSLA"], 0);
        let (sync, store) = sync(&api);

        let applied = sync.refresh("alice", Region::Us).await.unwrap();
        assert_eq!(applied, 2);
        assert!(store.contains("AAPL"));
        assert!(store.contains("TSLA"));
        assert_eq!(store.scope().unwrap().user_id, "alice");
    }

    #[tokio::test(start_paused = true)]
    async fn slow_response_for_old_identity_is_discarded() {
        let api = Arc::new(MockBookmarks::default());
        api.push_set(&["AAPL"], 100); // alice, slow
        api.push_set(&["TSLA"], 10); // bob, fast
        let (sync, store) = sync(&api);

        let (old, new) =
            tokio::join!(sync.refresh("alice", Region::Us), sync.refresh("bob", Region::Us));
        assert_eq!(old.unwrap(), 0);
        assert_eq!(new.unwrap(), 1);

        assert!(!store.contains("AAPL"));
        assert!(store.contains("TSLA"));
        assert_eq!(store.scope().unwrap().user_id, "bob");
    }

    #[tokio::test]
    async fn toggle_adds_then_removes() {
        let api = Arc::new(MockBookmarks::default());
        api.push_toggle(Ok(true));
        api.push_toggle(Ok(false));
        let (sync, store) = sync(&api);

        assert!(sync.toggle("AAPL", Region::Us).await.unwrap());
        assert!(store.contains("AAPL"));

        assert!(!sync.toggle("AAPL", Region::Us).await.unwrap());
        assert!(!store.contains("AAPL"));
    }

    #[tokio::test]
    async fn toggle_failure_rolls_back() {
        let api = Arc::new(MockBookmarks::default());
        api.push_toggle(Err(anyhow::anyhow!("backend down")));
        let (sync, store) = sync(&api);

        assert!(sync.toggle("AAPL", Region::Us).await.is_err());
        assert!(!store.contains("AAPL"));

        // Same rollback when removing an existing bookmark.
        store.set("TSLA", true);
        api.push_toggle(Err(anyhow::anyhow!("backend down")));
        assert!(sync.toggle("TSLA", Region::Us).await.is_err());
        assert!(store.contains("TSLA"));
    }

    #[tokio::test]
    async fn server_membership_wins_over_optimistic_flip() {
        let api = Arc::new(MockBookmarks::default());
        // Local flip says added; backend reports the symbol was removed.
        api.push_toggle(Ok(false));
        let (sync, store) = sync(&api);

        assert!(!sync.toggle("AAPL", Region::Us).await.unwrap());
        assert!(!store.contains("AAPL"));
    }
}
