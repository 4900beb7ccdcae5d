// src/core/store/mod.rs

//! The in-memory state store: an MVCC, transactional, index-augmented store
//! of cluster state behind immutable radix trees.
//!
//! The store exposes two primitives: open a read snapshot, or open a write
//! transaction. Unlimited snapshots coexist with the single writer; a commit
//! advances the store to a new index without disturbing any open snapshot.

pub mod index;
pub mod radix;
pub mod schema;
pub mod snapshot;
pub mod tables;
pub mod txn;
pub mod watch;

pub use txn::{ReadTxn, RecordIter, WriteTxn};
pub use watch::{WatchOutcome, WatchSet};

use crate::core::errors::DroverError;
use crate::core::store::radix::Tree;
use crate::core::store::schema::{Schema, state_store_schema};
use crate::core::types::node_pool::{NODE_POOL_ALL, NODE_POOL_DEFAULT};
use crate::core::types::{NodePool, Record};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// The MVCC table store. Cheap to share: all state lives behind the root
/// pointer, and every commit produces a structurally shared successor.
pub struct StateStore {
    pub(crate) schema: Arc<Schema>,
    pub(crate) root: RwLock<Tree<Record>>,
    writer: Arc<Mutex<()>>,
}

impl StateStore {
    /// Creates a store seeded with the built-in node pools, which exist at
    /// all times and are never deletable.
    pub fn new() -> Result<Arc<Self>, DroverError> {
        let store = Arc::new(StateStore {
            schema: Arc::new(state_store_schema()),
            root: RwLock::new(Tree::new()),
            writer: Arc::new(Mutex::new(())),
        });

        let mut txn = store.write_blocking(1);
        for (name, description) in [
            (NODE_POOL_DEFAULT, "Default node pool."),
            (NODE_POOL_ALL, "Node pool representing all nodes."),
        ] {
            let pool = NodePool {
                name: name.to_string(),
                description: description.to_string(),
                create_index: 1,
                modify_index: 1,
                ..Default::default()
            };
            txn.insert(schema::TABLE_NODE_POOLS, Record::NodePool(Arc::new(pool)))?;
        }
        txn.bump_index(schema::TABLE_NODE_POOLS)?;
        txn.commit();
        debug!("state store initialized with built-in node pools");
        Ok(store)
    }

    /// Opens a read snapshot: a stable view of the latest committed state.
    /// Never blocks and never observes later commits.
    pub fn snapshot(&self) -> ReadTxn {
        ReadTxn {
            tree: self.root.read().clone(),
            schema: self.schema.clone(),
        }
    }

    /// Opens the single write transaction, waiting for any current writer to
    /// finish. `index` is the raft index the staged mutations apply.
    pub async fn write(self: &Arc<Self>, index: u64) -> WriteTxn {
        let guard = self.writer.clone().lock_owned().await;
        WriteTxn {
            store: self.clone(),
            _guard: guard,
            tree: self.root.read().clone(),
            dirty: Vec::new(),
            index,
        }
    }

    /// Synchronous variant of [`StateStore::write`] for startup and restore
    /// paths where no competing writer can exist yet.
    pub fn write_blocking(self: &Arc<Self>, index: u64) -> WriteTxn {
        let guard = self
            .writer
            .clone()
            .try_lock_owned()
            .expect("no write transaction may be open during a blocking write");
        WriteTxn {
            store: self.clone(),
            _guard: guard,
            tree: self.root.read().clone(),
            dirty: Vec::new(),
            index,
        }
    }

    /// The last write index across all tables.
    pub fn latest_index(&self) -> u64 {
        let snap = self.snapshot();
        let tables: Vec<&str> = self.schema.tables().map(|t| t.name).collect();
        snap.max_index(&tables)
    }
}
