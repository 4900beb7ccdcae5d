// src/core/store/txn.rs

//! Read snapshots and write transactions over the radix substrate.
//!
//! A snapshot is a stable view at a specific index: it captures the root
//! pointer and never observes later commits. A write transaction stages
//! mutations on a private successor tree and either commits, swapping the
//! store root and firing the collected change channels atomically, or is
//! discarded on drop.

use crate::core::errors::DroverError;
use crate::core::store::radix::{ChangeSender, Iter, RevIter, Tree};
use crate::core::store::schema::{INDEX_ID, IndexSchema, Schema, TABLE_INDEX, TableSchema};
use crate::core::store::watch::WatchSet;
use crate::core::store::StateStore;
use crate::core::types::{IndexEntry, Record};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Builds the radix key for a (table, index, key) triple. Table and index
/// names never contain NUL, so the separators cannot collide with them.
fn full_key(table: &str, index: &str, ikey: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(table.len() + index.len() + ikey.len() + 2);
    key.extend_from_slice(table.as_bytes());
    key.push(0);
    key.extend_from_slice(index.as_bytes());
    key.push(0);
    key.extend_from_slice(ikey);
    key
}

fn resolve<'a>(
    schema: &'a Schema,
    table: &str,
    index: &str,
) -> (&'a TableSchema, &'a IndexSchema) {
    let ts = schema
        .table(table)
        .unwrap_or_else(|| panic!("unknown table \"{table}\""));
    let ix = ts
        .index(index)
        .unwrap_or_else(|| panic!("unknown index \"{index}\" on table \"{table}\""));
    (ts, ix)
}

/// A lazy iterator over one index. Yields the index-key bytes (with the
/// table/index prefix stripped) alongside each record. Captures the snapshot
/// at creation time and is not restartable.
pub struct RecordIter {
    inner: IterInner,
    strip: usize,
}

enum IterInner {
    Fwd(Iter<Record>),
    Rev(RevIter<Record>),
}

impl Iterator for RecordIter {
    type Item = (Vec<u8>, Record);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, rec) = match &mut self.inner {
            IterInner::Fwd(it) => it.next()?,
            IterInner::Rev(it) => it.next()?,
        };
        Some((key[self.strip..].to_vec(), rec))
    }
}

/// A read-only view of the store at a single committed index.
#[derive(Clone)]
pub struct ReadTxn {
    pub(super) tree: Tree<Record>,
    pub(super) schema: Arc<Schema>,
}

impl ReadTxn {
    /// Exact lookup returning the first match: the sole record on a unique
    /// index, or the smallest-primary-key match on a non-unique one.
    pub fn first(
        &self,
        table: &str,
        index: &str,
        args: &[&str],
    ) -> Result<Option<Record>, DroverError> {
        Ok(self.get(table, index, args)?.next().map(|(_, r)| r))
    }

    /// Exact lookup that also registers the touched position in `ws`.
    pub fn first_watch(
        &self,
        table: &str,
        index: &str,
        args: &[&str],
        ws: &mut WatchSet,
    ) -> Result<Option<Record>, DroverError> {
        let (_, ix) = resolve(&self.schema, table, index);
        let ikey = ix.indexer.key_from_args(args)?;
        let (it, change) = self.tree.iter_prefix_watch(&full_key(table, index, &ikey));
        ws.add(change);
        let strip = table.len() + index.len() + 2;
        let mut iter = RecordIter {
            inner: IterInner::Fwd(it),
            strip,
        };
        Ok(iter.next().map(|(_, r)| r))
    }

    /// Range iterator over all records whose index keys equal `args`, in
    /// primary-key order for non-unique indexes.
    pub fn get(&self, table: &str, index: &str, args: &[&str]) -> Result<RecordIter, DroverError> {
        let (_, ix) = resolve(&self.schema, table, index);
        let ikey = ix.indexer.key_from_args(args)?;
        Ok(RecordIter {
            inner: IterInner::Fwd(self.tree.iter_prefix(&full_key(table, index, &ikey))),
            strip: table.len() + index.len() + 2,
        })
    }

    /// Like [`ReadTxn::get`], registering the scanned position in `ws`.
    pub fn get_watch(
        &self,
        table: &str,
        index: &str,
        args: &[&str],
        ws: &mut WatchSet,
    ) -> Result<RecordIter, DroverError> {
        let (_, ix) = resolve(&self.schema, table, index);
        let ikey = ix.indexer.key_from_args(args)?;
        let (it, change) = self.tree.iter_prefix_watch(&full_key(table, index, &ikey));
        ws.add(change);
        Ok(RecordIter {
            inner: IterInner::Fwd(it),
            strip: table.len() + index.len() + 2,
        })
    }

    /// Range iterator over all records whose index key begins with the byte
    /// prefix derived from `args`.
    pub fn get_prefix(
        &self,
        table: &str,
        index: &str,
        args: &[&str],
    ) -> Result<RecordIter, DroverError> {
        let (_, ix) = resolve(&self.schema, table, index);
        let pkey = ix.indexer.prefix_from_args(args)?;
        Ok(RecordIter {
            inner: IterInner::Fwd(self.tree.iter_prefix(&full_key(table, index, &pkey))),
            strip: table.len() + index.len() + 2,
        })
    }

    /// Like [`ReadTxn::get_prefix`], registering the scanned subtree in `ws`.
    pub fn get_prefix_watch(
        &self,
        table: &str,
        index: &str,
        args: &[&str],
        ws: &mut WatchSet,
    ) -> Result<RecordIter, DroverError> {
        let (_, ix) = resolve(&self.schema, table, index);
        let pkey = ix.indexer.prefix_from_args(args)?;
        let (it, change) = self.tree.iter_prefix_watch(&full_key(table, index, &pkey));
        ws.add(change);
        Ok(RecordIter {
            inner: IterInner::Fwd(it),
            strip: table.len() + index.len() + 2,
        })
    }

    /// Reverse (descending) variant of [`ReadTxn::get_prefix`].
    pub fn get_prefix_reverse(
        &self,
        table: &str,
        index: &str,
        args: &[&str],
    ) -> Result<RecordIter, DroverError> {
        let (_, ix) = resolve(&self.schema, table, index);
        let pkey = ix.indexer.prefix_from_args(args)?;
        Ok(RecordIter {
            inner: IterInner::Rev(self.tree.rev_iter_prefix(&full_key(table, index, &pkey))),
            strip: table.len() + index.len() + 2,
        })
    }

    /// Ascending iterator resuming at the first index key `>=` the raw bound
    /// bytes. Used by pagination to resume at (or after) an opaque token.
    pub fn get_lower_bound(
        &self,
        table: &str,
        index: &str,
        bound: &[u8],
    ) -> Result<RecordIter, DroverError> {
        resolve(&self.schema, table, index);
        Ok(RecordIter {
            inner: IterInner::Fwd(self.tree.iter_lower_bound(&full_key(table, index, bound))),
            strip: table.len() + index.len() + 2,
        })
    }

    /// The last write index recorded for a table.
    pub fn last_index(&self, table: &str) -> u64 {
        let ikey = format!("{table}\0");
        match self.tree.get(&full_key(TABLE_INDEX, INDEX_ID, ikey.as_bytes())) {
            Some(Record::TableIndex(e)) => e.value,
            _ => 0,
        }
    }

    /// The max last-write index across several tables, used as the reply
    /// index of reads that touch more than one table.
    pub fn max_index(&self, tables: &[&str]) -> u64 {
        tables.iter().map(|t| self.last_index(t)).max().unwrap_or(0)
    }

    /// Registers the whole table in `ws` so any write to it fires the set.
    pub fn watch_table(&self, table: &str, ws: &mut WatchSet) {
        let (it, change) = self.tree.iter_prefix_watch(&full_key(table, INDEX_ID, b""));
        drop(it);
        ws.add(change);
    }
}

/// The store's single staged write. Obtained via [`StateStore::write`]; the
/// writer mutex guard rides inside, so at most one exists at a time.
pub struct WriteTxn {
    pub(super) store: Arc<StateStore>,
    pub(super) _guard: OwnedMutexGuard<()>,
    pub(super) tree: Tree<Record>,
    pub(super) dirty: Vec<ChangeSender>,
    pub(super) index: u64,
}

impl WriteTxn {
    /// The raft index this transaction applies.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// A read view over the staged (uncommitted) state.
    pub fn view(&self) -> ReadTxn {
        ReadTxn {
            tree: self.tree.clone(),
            schema: self.store.schema.clone(),
        }
    }

    /// Inserts a record, maintaining every index of its table.
    ///
    /// If a record already exists under the same primary key it is first
    /// retracted from every index using its own derived keys, so secondary
    /// indexes never hold stale entries after an update.
    pub fn insert(&mut self, table: &str, record: Record) -> Result<(), DroverError> {
        let schema = self.store.schema.clone();
        let (ts, _) = resolve(&schema, table, INDEX_ID);

        let primary = ts.primary();
        let pkey = primary
            .indexer
            .key(&record)?
            .ok_or_else(|| {
                DroverError::InvalidRequest(format!(
                    "record is missing its primary key for table \"{table}\""
                ))
            })?;

        if let Some(existing) = self.tree.get(&full_key(table, INDEX_ID, &pkey)) {
            self.retract(ts, &existing, &pkey)?;
        }

        for ix in &ts.indexes {
            let Some(ikey) = ix.indexer.key(&record)? else {
                if ix.allows_missing {
                    continue;
                }
                return Err(DroverError::InvalidRequest(format!(
                    "record is missing required index \"{}.{}\"",
                    table, ix.name
                )));
            };
            let stored = if ix.unique {
                ikey
            } else {
                let mut k = ikey;
                k.extend_from_slice(&pkey);
                k
            };
            if ix.unique
                && ix.name != INDEX_ID
                && self.tree.get(&full_key(table, ix.name, &stored)).is_some()
            {
                return Err(DroverError::Conflict(format!(
                    "insert conflict: duplicate value for unique index \"{}.{}\"",
                    table, ix.name
                )));
            }
            self.tree_insert(&full_key(table, ix.name, &stored), record.clone());
        }
        Ok(())
    }

    /// Deletes the record addressed by primary-key `args`. Returns whether a
    /// record existed.
    pub fn delete(&mut self, table: &str, args: &[&str]) -> Result<bool, DroverError> {
        let schema = self.store.schema.clone();
        let (ts, primary) = resolve(&schema, table, INDEX_ID);
        let pkey = primary.indexer.key_from_args(args)?;
        let Some(existing) = self.tree.get(&full_key(table, INDEX_ID, &pkey)) else {
            return Ok(false);
        };
        self.retract(ts, &existing, &pkey)?;
        Ok(true)
    }

    /// Deletes every record whose keys on `index` match `args`. Returns the
    /// number of records removed.
    pub fn delete_all(
        &mut self,
        table: &str,
        index: &str,
        args: &[&str],
    ) -> Result<usize, DroverError> {
        let schema = self.store.schema.clone();
        let (ts, ix) = resolve(&schema, table, index);
        let ikey = ix.indexer.key_from_args(args)?;
        let matches: Vec<Record> = self
            .tree
            .iter_prefix(&full_key(table, index, &ikey))
            .map(|(_, r)| r)
            .collect();
        let primary = ts.primary();
        let mut removed = 0;
        for record in matches {
            let pkey = primary.indexer.key(&record)?.ok_or_else(|| {
                DroverError::Internal(format!("indexed record lost its primary key in \"{table}\""))
            })?;
            self.retract(ts, &record, &pkey)?;
            removed += 1;
        }
        Ok(removed)
    }

    /// Records this transaction's index as the table's last write.
    pub fn bump_index(&mut self, table: &str) -> Result<(), DroverError> {
        let entry = Record::TableIndex(Arc::new(IndexEntry {
            name: table.to_string(),
            value: self.index,
        }));
        self.insert(TABLE_INDEX, entry)
    }

    /// Commits: swaps the store root and fires every collected change
    /// channel while the root lock is held, so no waiter can observe the new
    /// root without also observing the fires.
    pub fn commit(self) {
        let mut root = self.store.root.write();
        *root = self.tree;
        for change in &self.dirty {
            change.send_replace(true);
        }
    }

    fn retract(
        &mut self,
        ts: &TableSchema,
        record: &Record,
        pkey: &[u8],
    ) -> Result<(), DroverError> {
        for ix in &ts.indexes {
            let Some(ikey) = ix.indexer.key(record)? else {
                continue;
            };
            let stored = if ix.unique {
                ikey
            } else {
                let mut k = ikey;
                k.extend_from_slice(pkey);
                k
            };
            self.tree_delete(&full_key(ts.name, ix.name, &stored));
        }
        Ok(())
    }

    fn tree_insert(&mut self, key: &[u8], record: Record) {
        let (next, _, mut dirty) = self.tree.insert(key, record);
        self.tree = next;
        self.dirty.append(&mut dirty);
    }

    fn tree_delete(&mut self, key: &[u8]) {
        let (next, _, mut dirty) = self.tree.delete(key);
        self.tree = next;
        self.dirty.append(&mut dirty);
    }
}
