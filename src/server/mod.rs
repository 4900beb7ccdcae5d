// src/server/mod.rs

//! Spawns the background tasks and binds leadership transitions to the
//! leader-only subsystems.

use crate::core::state::{ServerInit, ServerState};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// Spawns the batcher and the leadership binding. Returns the handles so the
/// caller can await a graceful stop.
pub fn spawn(init: ServerInit, shutdown_tx: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
    let ServerInit {
        state,
        batcher_task,
    } = init;

    let mut handles = Vec::new();

    let batcher_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(async move {
        batcher_task.run(batcher_shutdown).await;
    }));

    let leadership_shutdown = shutdown_tx.subscribe();
    handles.push(tokio::spawn(leadership_loop(
        state.clone(),
        leadership_shutdown,
    )));

    handles
}

/// Watches the log's leadership signal. On gain: install the loopback
/// secret and enable the volume watcher. On loss: tear both down; pending
/// claim batches are left for the next leader to rediscover.
async fn leadership_loop(state: Arc<ServerState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut leadership = state.raft.leadership();
    let mut was_leader = false;

    loop {
        let is_leader = *leadership.borrow_and_update();
        if is_leader != was_leader {
            if is_leader {
                info!("gained cluster leadership");
                state
                    .auth
                    .set_leader_acl(Some(state.leader_acl_secret.clone()));
                state.volume_watcher.set_enabled(true);
            } else {
                info!("lost cluster leadership");
                state.volume_watcher.set_enabled(false);
                state.auth.set_leader_acl(None);
            }
            was_leader = is_leader;
        }

        tokio::select! {
            changed = leadership.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = shutdown_rx.recv() => {
                if was_leader {
                    state.volume_watcher.set_enabled(false);
                    state.auth.set_leader_acl(None);
                }
                return;
            }
        }
    }
}
