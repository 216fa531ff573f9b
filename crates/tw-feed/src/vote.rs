//! Optimistic vote control with deferred settlement notification.
//!
//! Each votable entity gets one [`VoteController`]. A press is applied to
//! the visible state immediately and dispatched in the background; the
//! backend's receipt is authoritative and may differ from the optimistic
//! value when other voters raced the same target.
//!
//! Actions carry a sequence number. Only the newest dispatched action may
//! settle the control; confirmations and failures of superseded actions are
//! discarded, so rapid re-presses can never regress the state or fire the
//! settlement callback twice.
//!
//! The visible score is always derived, never accumulated:
//! `server_score + (visible_value - server_value)`. That makes rollback and
//! re-press arithmetic structural instead of delta bookkeeping.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use tw_api::CommunityApi;
use tw_core::types::{VoteDirection, VoteReceipt, VoteTarget};

/// Snapshot of a control's visible state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteView {
    /// Visible vote value: `-1`, `0`, or `1`.
    pub value: i8,
    /// Visible score including the optimistic delta.
    pub score: i64,
    /// Whether an action is awaiting backend confirmation.
    pub settling: bool,
}

/// Payload handed to the settlement callback.
#[derive(Debug, Clone)]
pub struct VoteOutcome {
    pub target: VoteTarget,
    pub receipt: VoteReceipt,
}

/// Fired once per completed action that changed the recorded vote, after
/// the settle delay.
pub type SettleCallback = Arc<dyn Fn(VoteOutcome) + Send + Sync>;

struct VoteInner {
    /// Last value confirmed by the backend.
    server_value: i8,
    /// Last score confirmed by the backend.
    server_score: i64,
    /// Optimistic value while an action is in flight.
    pending: Option<i8>,
    /// Sequence number of the most recently dispatched action.
    seq: u64,
    /// Highest sequence number that has settled.
    settled_seq: u64,
}

/// Two-phase optimistic vote state machine for one target.
pub struct VoteController {
    api: Arc<dyn CommunityApi>,
    target: VoteTarget,
    settle_delay: Duration,
    on_settled: Option<SettleCallback>,
    inner: Mutex<VoteInner>,
}

impl VoteController {
    pub fn new(
        api: Arc<dyn CommunityApi>,
        target: VoteTarget,
        initial_value: i8,
        initial_score: i64,
        settle_delay: Duration,
        on_settled: Option<SettleCallback>,
    ) -> Arc<Self> {
        Arc::new(Self {
            api,
            target,
            settle_delay,
            on_settled,
            inner: Mutex::new(VoteInner {
                server_value: initial_value,
                server_score: initial_score,
                pending: None,
                seq: 0,
                settled_seq: 0,
            }),
        })
    }

    fn locked(&self) -> MutexGuard<'_, VoteInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Visible state for rendering.
    pub fn view(&self) -> VoteView {
        let inner = self.locked();
        let visible = inner.pending.unwrap_or(inner.server_value);
        VoteView {
            value: visible,
            score: inner.server_score + i64::from(visible - inner.server_value),
            settling: inner.pending.is_some(),
        }
    }

    /// Apply a button press.
    ///
    /// Pressing the currently visible direction clears the vote; anything
    /// else adopts the pressed direction. The transition shows immediately
    /// and the mutation dispatches in the background. Pressing during
    /// settlement supersedes the in-flight action.
    pub fn cast(self: &Arc<Self>, direction: VoteDirection) {
        let (seq, requested, previous) = {
            let mut inner = self.locked();
            let visible = inner.pending.unwrap_or(inner.server_value);
            let requested = if visible == direction.value() { 0 } else { direction.value() };
            inner.seq += 1;
            inner.pending = Some(requested);
            (inner.seq, requested, visible)
        };
        debug!("[vote] {} action #{seq}: {previous} -> {requested}", self.target);

        let ctrl = Arc::clone(self);
        tokio::spawn(async move {
            match ctrl.api.cast_vote(&ctrl.target, requested).await {
                Ok(receipt) => ctrl.confirm(seq, previous, receipt),
                Err(e) => ctrl.reject(seq, &e),
            }
        });
    }

    /// Adopt a confirmation if its action is still the newest one.
    fn confirm(&self, seq: u64, previous: i8, receipt: VoteReceipt) {
        {
            let mut inner = self.locked();
            if seq != inner.seq || seq <= inner.settled_seq {
                debug!("[vote] {} discarding superseded confirmation #{seq}", self.target);
                return;
            }
            inner.server_value = receipt.value;
            inner.server_score = receipt.score;
            inner.pending = None;
            inner.settled_seq = seq;
        }
        debug!(
            "[vote] {} action #{seq} settled: value={} score={}",
            self.target, receipt.value, receipt.score
        );

        // Notify only when the action changed the recorded vote; a confirm
        // that lands back on the pre-action value moved no aggregates.
        if receipt.value == previous {
            return;
        }
        if let Some(cb) = &self.on_settled {
            // Deferred so the backend's read path has observed the write by
            // the time anyone refreshes aggregates in response.
            let cb = Arc::clone(cb);
            let outcome = VoteOutcome { target: self.target.clone(), receipt };
            let delay = self.settle_delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                cb(outcome);
            });
        }
    }

    /// Roll back the optimistic transition of a failed action.
    fn reject(&self, seq: u64, err: &anyhow::Error) {
        let mut inner = self.locked();
        if seq != inner.seq || seq <= inner.settled_seq {
            debug!("[vote] {} ignoring failure of superseded action #{seq}", self.target);
            return;
        }
        warn!("[vote] {} action #{seq} rejected, rolling back: {err:#}", self.target);
        inner.pending = None;
    }

    pub fn target(&self) -> &VoteTarget {
        &self.target
    }
}
