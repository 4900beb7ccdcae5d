// src/core/tasks/claim_batcher.rs

//! The claim update batcher. Volume workers funnel claim transitions through
//! here; the batcher coalesces them into bounded batches and flushes the
//! oldest batch to the log on every timer tick, amortizing append cost while
//! keeping any single log entry small.

use crate::core::errors::DroverError;
use crate::core::raft::{Command, CsiVolumeClaimRequest, ReplicatedLog};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

/// The cap on updates per batch, so a busy cluster never produces an
/// oversize log entry.
pub const BATCH_LIMIT: usize = 100;

/// Capacity of the submission channel; provides backpressure to workers.
const SUBMIT_CHANNEL_CAPACITY: usize = 64;

type BatchResult = Option<Result<u64, DroverError>>;

/// Resolves once the batch containing the submitter's updates commits (or
/// fails to append). Submitters receive the future of the *newest* batch
/// holding any of their updates; batches flush FIFO, so awaiting it implies
/// every earlier batch is durable too.
#[derive(Debug, Clone)]
pub struct BatchFuture {
    rx: watch::Receiver<BatchResult>,
}

impl BatchFuture {
    /// Blocks until the batch is durable, yielding the commit index.
    pub async fn results(mut self) -> Result<u64, DroverError> {
        let value = self
            .rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| DroverError::Internal("claim batcher is gone".to_string()))?;
        value.clone().expect("resolved batch future holds a result")
    }
}

struct BatchRequest {
    updates: Vec<CsiVolumeClaimRequest>,
    reply: oneshot::Sender<BatchFuture>,
}

/// The submitter handle. Cheap to clone; one per volume worker.
#[derive(Clone)]
pub struct ClaimBatcher {
    tx: mpsc::Sender<BatchRequest>,
}

impl ClaimBatcher {
    /// Creates the handle plus the task that must be spawned to drain it.
    pub fn new(raft: Arc<ReplicatedLog>, batch_duration: Duration) -> (Self, ClaimBatcherTask) {
        let (tx, rx) = mpsc::channel(SUBMIT_CHANNEL_CAPACITY);
        (
            ClaimBatcher { tx },
            ClaimBatcherTask {
                rx,
                raft,
                batch_duration,
            },
        )
    }

    /// Submits claim updates and returns the future that resolves when they
    /// are durable.
    pub async fn submit(
        &self,
        updates: Vec<CsiVolumeClaimRequest>,
    ) -> Result<BatchFuture, DroverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BatchRequest {
                updates,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DroverError::Internal("claim batcher is gone".to_string()))?;
        reply_rx
            .await
            .map_err(|_| DroverError::Internal("claim batcher is gone".to_string()))
    }
}

/// One pending batch. Sealed batches stopped accepting inserts when they
/// reached the size cap; they still shrink when a duplicate key moves to a
/// newer batch.
struct Batch {
    id: u64,
    updates: IndexMap<(String, String), CsiVolumeClaimRequest>,
    sealed: bool,
    tx: watch::Sender<BatchResult>,
}

impl Batch {
    fn new(id: u64) -> Self {
        Batch {
            id,
            updates: IndexMap::new(),
            sealed: false,
            tx: watch::channel(None).0,
        }
    }
}

/// The long-lived batcher loop.
pub struct ClaimBatcherTask {
    rx: mpsc::Receiver<BatchRequest>,
    raft: Arc<ReplicatedLog>,
    batch_duration: Duration,
}

impl ClaimBatcherTask {
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("claim batcher task started");
        let mut ticker = tokio::time::interval(self.batch_duration);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let mut pending: VecDeque<Batch> = VecDeque::new();
        // Which pending batch currently holds each (namespace, volume) key.
        let mut key_to_batch: HashMap<(String, String), u64> = HashMap::new();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                Some(req) = self.rx.recv() => {
                    Self::enqueue(req, &mut pending, &mut key_to_batch, &mut next_id);
                }
                _ = ticker.tick() => {
                    if let Some(batch) = pending.pop_front() {
                        for key in batch.updates.keys() {
                            key_to_batch.remove(key);
                        }
                        self.flush(batch).await;
                    }
                }
                _ = shutdown_rx.recv() => {
                    // Pending batches are deliberately not flushed: the
                    // process may no longer be leader, and the next leader
                    // rediscovers claim work from the authoritative state.
                    info!(pending = pending.len(), "claim batcher shutting down");
                    return;
                }
            }
        }
    }

    fn enqueue(
        req: BatchRequest,
        pending: &mut VecDeque<Batch>,
        key_to_batch: &mut HashMap<(String, String), u64>,
        next_id: &mut u64,
    ) {
        for update in req.updates {
            let key = (update.namespace.clone(), update.volume_id.clone());

            // A later update for a pending key supersedes the earlier
            // unbatched one wherever it sits.
            if let Some(old_id) = key_to_batch.remove(&key) {
                if let Some(old_batch) = pending.iter_mut().find(|b| b.id == old_id) {
                    old_batch.updates.shift_remove(&key);
                }
            }

            let needs_new = match pending.back() {
                Some(batch) => batch.sealed,
                None => true,
            };
            if needs_new {
                *next_id += 1;
                pending.push_back(Batch::new(*next_id));
            }
            let batch = pending.back_mut().expect("a pending batch exists");
            key_to_batch.insert(key.clone(), batch.id);
            batch.updates.insert(key, update);
            if batch.updates.len() >= BATCH_LIMIT {
                batch.sealed = true;
            }
        }

        let future = match pending.back() {
            Some(batch) => BatchFuture {
                rx: batch.tx.subscribe(),
            },
            // An empty submission still gets a future; resolve it with the
            // current commit index immediately.
            None => {
                let tx = watch::channel(None).0;
                let future = BatchFuture { rx: tx.subscribe() };
                tx.send_replace(Some(Ok(0)));
                future
            }
        };
        let _ = req.reply.send(future);
    }

    async fn flush(&self, batch: Batch) {
        let count = batch.updates.len();
        if count == 0 {
            batch.tx.send_replace(Some(Ok(self.raft.last_index())));
            return;
        }
        let updates: Vec<CsiVolumeClaimRequest> = batch.updates.into_values().collect();
        let result = self.raft.apply(Command::CsiVolumeClaimBatch(updates)).await;
        match &result {
            Ok(index) => debug!(count, index, "flushed claim batch"),
            Err(e) => warn!(count, error = %e, "claim batch append failed"),
        }
        batch.tx.send_replace(Some(result));
    }
}
