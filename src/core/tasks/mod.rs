// src/core/tasks/mod.rs

//! Long-running background tasks: the leader-only volume claim watcher and
//! the claim update batcher it writes through.

pub mod claim_batcher;
pub mod volume_watcher;

pub use claim_batcher::{BatchFuture, ClaimBatcher, ClaimBatcherTask};
pub use volume_watcher::VolumeWatcher;
