// src/core/store/watch.rs

//! Watch sets: the primitive that turns any store read into a long-poll.
//!
//! A caller builds an empty set, runs its read, and every index position the
//! read touches contributes its change channel. Waiting on the set resolves
//! when any channel fires, the caller's context is cancelled, or the
//! deadline elapses.

use crate::core::store::radix::ChangeSender;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Why a [`WatchSet::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A watched position changed in a subsequently committed transaction.
    Fired,
    /// The caller's context was cancelled.
    Cancelled,
    /// The deadline elapsed with no change.
    TimedOut,
}

/// The set of change channels a read touched.
#[derive(Default)]
pub struct WatchSet {
    channels: Vec<ChangeSender>,
}

impl WatchSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Adds a change channel to the set. Channels that already fired still
    /// resolve the wait immediately, so adding after a racing commit is safe.
    pub fn add(&mut self, channel: ChangeSender) {
        self.channels.push(channel);
    }

    /// Waits for any watched channel to fire, consuming the set. The change
    /// channels latch, so a commit that lands between the read and this call
    /// resolves immediately rather than being lost.
    pub async fn wait(self, cancel: &CancellationToken, deadline: Instant) -> WatchOutcome {
        let mut fired: FuturesUnordered<_> = self
            .channels
            .into_iter()
            .map(|ch| async move {
                let mut rx = ch.subscribe();
                // An error means the sender is gone, i.e. the node was
                // dropped with its tree; treat it as a change.
                let _ = rx.wait_for(|set| *set).await;
            })
            .collect();

        if fired.is_empty() {
            // Nothing to watch: only cancellation or the deadline can end
            // the wait.
            tokio::select! {
                _ = cancel.cancelled() => WatchOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => WatchOutcome::TimedOut,
            }
        } else {
            tokio::select! {
                _ = fired.next() => WatchOutcome::Fired,
                _ = cancel.cancelled() => WatchOutcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => WatchOutcome::TimedOut,
            }
        }
    }
}
