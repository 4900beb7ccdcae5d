// src/core/raft/log.rs

//! The in-process replicated log. A single-voter deployment commits a
//! command the moment it is appended, but the contract here is the one the
//! rest of the core programs against: `apply` returns `(index, error)` only
//! after quorum commit and deterministic application, and the leadership
//! watch drives the leader-only subsystems.

use crate::core::errors::DroverError;
use crate::core::raft::fsm::Fsm;
use crate::core::raft::msg::Command;
use crate::core::store::StateStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// One committed entry, retained for inspection and follower catch-up.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub index: u64,
    pub data: Vec<u8>,
}

pub struct ReplicatedLog {
    fsm: Fsm,
    /// Serializes appends so indexes are assigned in commit order.
    append_lock: tokio::sync::Mutex<()>,
    entries: Mutex<Vec<LogEntry>>,
    leader_tx: watch::Sender<bool>,
}

impl ReplicatedLog {
    pub fn new(store: Arc<StateStore>) -> Arc<Self> {
        Arc::new(ReplicatedLog {
            fsm: Fsm::new(store),
            append_lock: tokio::sync::Mutex::new(()),
            entries: Mutex::new(Vec::new()),
            leader_tx: watch::channel(false).0,
        })
    }

    /// Appends a command and waits for commit and application. Returns the
    /// commit index. Commands are encoded before sequencing, exactly as they
    /// would cross the wire to followers.
    pub async fn apply(&self, cmd: Command) -> Result<u64, DroverError> {
        if !self.is_leader() {
            return Err(DroverError::NoLeader);
        }

        let data = bincode::serde::encode_to_vec(&cmd, bincode::config::standard())?;

        let _guard = self.append_lock.lock().await;
        let index = self.fsm.store().latest_index() + 1;

        // Decode back what was encoded: the leader applies the same bytes a
        // follower would receive, so divergent encodings cannot hide.
        let (decoded, _): (Command, _) =
            bincode::serde::decode_from_slice(&data, bincode::config::standard())?;
        if let Err(e) = self.fsm.apply(index, &decoded).await {
            warn!(index, kind = cmd.kind(), error = %e, "command application failed");
            return Err(e);
        }

        self.entries.lock().push(LogEntry { index, data });
        debug!(index, kind = cmd.kind(), "committed command");
        Ok(index)
    }

    /// A barrier: the index of the latest committed entry.
    pub fn last_index(&self) -> u64 {
        self.fsm.store().latest_index()
    }

    pub fn is_leader(&self) -> bool {
        *self.leader_tx.borrow()
    }

    /// Flips the leadership signal. Subsystems bound via
    /// [`ReplicatedLog::leadership`] observe the transition.
    pub fn set_leader(&self, leader: bool) {
        self.leader_tx.send_replace(leader);
    }

    /// The leadership watch the leader-only subsystems bind to.
    pub fn leadership(&self) -> watch::Receiver<bool> {
        self.leader_tx.subscribe()
    }

    /// Committed entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Decodes every committed entry, oldest first.
    pub fn commands(&self) -> Result<Vec<(u64, Command)>, DroverError> {
        self.entries
            .lock()
            .iter()
            .map(|e| {
                let (cmd, _) =
                    bincode::serde::decode_from_slice(&e.data, bincode::config::standard())?;
                Ok((e.index, cmd))
            })
            .collect()
    }
}
