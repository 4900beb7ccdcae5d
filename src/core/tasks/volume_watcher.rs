// src/core/tasks/volume_watcher.rs

//! The leader-only volume claim watcher. One long-lived blocking query over
//! the volumes table discovers volumes with claims to release; each such
//! volume gets a lazily spawned worker that drives its past claims through
//! the release protocol and syncs the results through the claim batcher.

use crate::core::errors::DroverError;
use crate::core::query::{QueryOptions, blocking_query};
use crate::core::rpc::VolumeEndpoint;
use crate::core::store::schema::{TABLE_ALLOCS, TABLE_CSI_VOLUMES};
use crate::core::store::{ReadTxn, StateStore};
use crate::core::tasks::claim_batcher::ClaimBatcher;
use crate::core::raft::CsiVolumeClaimRequest;
use crate::core::types::volume::{CsiClaimState, CsiVolume, CsiVolumeClaim};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Base delay before a worker retries a failed release cycle.
const RETRY_BACKOFF: Duration = Duration::from_secs(1);

type VolumeKey = (String, String);

struct WorkerHandle {
    updates: watch::Sender<Arc<CsiVolume>>,
    cancel: CancellationToken,
}

pub struct VolumeWatcher {
    store: Arc<StateStore>,
    volumes: Arc<VolumeEndpoint>,
    batcher: ClaimBatcher,
    quiescent_timeout: Duration,
    workers: DashMap<VolumeKey, WorkerHandle>,
    /// Token of the currently enabled run, if any.
    run: Mutex<Option<CancellationToken>>,
}

impl VolumeWatcher {
    pub fn new(
        store: Arc<StateStore>,
        volumes: Arc<VolumeEndpoint>,
        batcher: ClaimBatcher,
        quiescent_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(VolumeWatcher {
            store,
            volumes,
            batcher,
            quiescent_timeout,
            workers: DashMap::new(),
            run: Mutex::new(None),
        })
    }

    /// Flips the watcher with leadership. Enabling starts the top-level
    /// watch loop; disabling cancels it and every worker and flushes the
    /// worker cache. Pending batches are left unflushed on step-down; the
    /// next leader rediscovers the work from the authoritative state.
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        let mut run = self.run.lock();
        match (enabled, run.as_ref()) {
            (true, None) => {
                let token = CancellationToken::new();
                *run = Some(token.clone());
                let watcher = self.clone();
                tokio::spawn(async move {
                    watcher.watch_loop(token).await;
                });
                info!("volume watcher enabled");
            }
            (false, Some(token)) => {
                token.cancel();
                *run = None;
                for entry in self.workers.iter() {
                    entry.value().cancel.cancel();
                }
                self.workers.clear();
                info!("volume watcher disabled");
            }
            _ => {}
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.run.lock().is_some()
    }

    /// The single long-lived blocking query over the volumes table.
    async fn watch_loop(self: Arc<Self>, token: CancellationToken) {
        let mut min_index = 0u64;
        while !token.is_cancelled() {
            let opts = QueryOptions {
                min_query_index: min_index,
                max_query_time: Some(Duration::from_secs(60)),
                ..Default::default()
            };
            let result = blocking_query(&self.store, &opts, &token, |snap, ws| {
                let volumes: Vec<Arc<CsiVolume>> = snap.csi_volumes(ws)?.collect();
                // A claim becomes releasable when its allocation turns
                // terminal, which never touches the volumes table; watch the
                // allocations too.
                snap.watch_table(TABLE_ALLOCS, ws);
                let index = snap.max_index(&[TABLE_CSI_VOLUMES, TABLE_ALLOCS]).max(1);
                Ok((volumes, index))
            })
            .await;

            let (volumes, index) = match result {
                Ok(ok) => ok,
                Err(e) => {
                    warn!(error = %e, "volume watch query failed");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                    continue;
                }
            };
            if token.is_cancelled() {
                break;
            }
            min_index = index;

            let snap = self.store.snapshot();
            for volume in volumes {
                match volume_needs_release(&snap, &volume) {
                    Ok(true) => self.notify(volume),
                    Ok(false) => {}
                    Err(e) => warn!(
                        namespace = %volume.namespace,
                        volume = %volume.id,
                        error = %e,
                        "failed to inspect volume claims"
                    ),
                }
            }
        }
        debug!("volume watch loop stopped");
    }

    /// Delivers a volume update to its worker, spawning one on first sight.
    /// The single-slot channel means the latest update wins.
    fn notify(self: &Arc<Self>, volume: Arc<CsiVolume>) {
        let key = (volume.namespace.clone(), volume.id.clone());
        if let Some(handle) = self.workers.get(&key) {
            handle.updates.send_replace(volume);
            return;
        }

        debug!(namespace = %key.0, volume = %key.1, "starting volume worker");
        let (tx, rx) = watch::channel(volume);
        let cancel = CancellationToken::new();
        self.workers.insert(
            key.clone(),
            WorkerHandle {
                updates: tx,
                cancel: cancel.clone(),
            },
        );
        let watcher = self.clone();
        tokio::spawn(async move {
            watcher.worker_loop(key, rx, cancel).await;
        });
    }

    /// Per-volume worker: single-threaded, cooperative. Processes the latest
    /// update, retries with jittered backoff on error, and exits when the
    /// volume has nothing left to release or the quiescent timeout lapses.
    async fn worker_loop(
        self: Arc<Self>,
        key: VolumeKey,
        mut rx: watch::Receiver<Arc<CsiVolume>>,
        cancel: CancellationToken,
    ) {
        // The spawning update is already pending in the channel slot.
        let mut work_ready = true;
        loop {
            if !work_ready {
                tokio::select! {
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.quiescent_timeout) => {
                        debug!(namespace = %key.0, volume = %key.1, "volume worker quiescent");
                        break;
                    }
                }
            }
            work_ready = false;

            let volume = rx.borrow_and_update().clone();
            match self.process(&volume).await {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        namespace = %key.0,
                        volume = %key.1,
                        error = %e,
                        "volume release cycle failed"
                    );
                    let jitter = rand::thread_rng().gen_range(0..500);
                    let backoff = RETRY_BACKOFF + Duration::from_millis(jitter);
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => work_ready = true,
                        _ = cancel.cancelled() => break,
                    }
                }
            }
        }
        self.workers.remove(&key);
        // A notification may have raced with the shutdown after the last
        // snapshot; hand it to a fresh worker so the claim is not stranded
        // until the next table write.
        if !cancel.is_cancelled() && rx.has_changed().unwrap_or(false) {
            let volume = rx.borrow_and_update().clone();
            self.notify(volume);
        }
        debug!(namespace = %key.0, volume = %key.1, "volume worker stopped");
    }

    /// One release cycle. Returns `Ok(true)` when the worker should stop
    /// because nothing is left to release.
    async fn process(&self, stale: &Arc<CsiVolume>) -> Result<bool, DroverError> {
        // Re-read against a fresh snapshot: the notification may be stale by
        // the time the worker runs.
        let snap = self.store.snapshot();
        let Some(volume) = snap.csi_volume(&stale.namespace, &stale.id)? else {
            return Ok(true);
        };
        let view = snap.csi_volume_denormalize(volume.clone())?;

        // Collect past claims: every live claim whose allocation is gone or
        // terminal enters the protocol at `taken`. Existing past-claim state
        // is preserved across cycles.
        let mut past_claims = volume.past_claims.clone();
        for (alloc_id, claim) in volume.live_claims() {
            let alloc_gone = match view.allocs.get(alloc_id) {
                Some(Some(alloc)) => alloc.is_terminal(),
                _ => true,
            };
            if alloc_gone {
                past_claims
                    .entry(alloc_id.clone())
                    .or_insert_with(|| CsiVolumeClaim {
                        state: CsiClaimState::Taken,
                        ..claim.clone()
                    });
            }
        }

        if past_claims.is_empty() {
            return Ok(true);
        }

        let mut updates: Vec<CsiVolumeClaim> = Vec::new();
        let mut errors: Vec<String> = Vec::new();
        for claim in past_claims.values() {
            if claim.state == CsiClaimState::Freed {
                continue;
            }
            match self
                .volumes
                .unpublish(&volume.namespace, &volume.id, claim)
                .await
            {
                Ok(released) => updates.push(released),
                Err(e) => errors.push(format!("alloc {}: {e}", claim.alloc_id)),
            }
        }

        if !updates.is_empty() {
            let future = self
                .batcher
                .submit(vec![CsiVolumeClaimRequest {
                    namespace: volume.namespace.clone(),
                    volume_id: volume.id.clone(),
                    claims: updates,
                }])
                .await?;
            future.results().await?;
        }

        if errors.is_empty() {
            Ok(false)
        } else {
            Err(DroverError::Internal(format!(
                "failed to release claims on volume {}/{}: {}",
                volume.namespace,
                volume.id,
                errors.join("; ")
            )))
        }
    }
}

/// Whether a volume has claims the watcher must drive: a non-freed past
/// claim, or a live claim whose allocation is gone or terminal.
fn volume_needs_release(snap: &ReadTxn, volume: &Arc<CsiVolume>) -> Result<bool, DroverError> {
    if volume
        .past_claims
        .values()
        .any(|c| c.state != CsiClaimState::Freed)
    {
        return Ok(true);
    }
    for (alloc_id, _) in volume.live_claims() {
        match snap.alloc_by_id(alloc_id)? {
            Some(alloc) if !alloc.is_terminal() => {}
            _ => return Ok(true),
        }
    }
    Ok(false)
}
