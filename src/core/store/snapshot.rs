// src/core/store/snapshot.rs

//! Snapshot persistence: the full store serialized as a sequence of typed
//! record streams, one per table, each record length-prefixed. Tables are
//! written in registry (leaves-first) order so a restore performs only
//! monotone inserts, and the file carries a trailing CRC over its contents.

use crate::core::errors::DroverError;
use crate::core::store::schema::{
    TABLE_ACL_POLICIES, TABLE_ACL_ROLES, TABLE_ACL_TOKENS, TABLE_ALLOCS, TABLE_CSI_VOLUMES,
    TABLE_INDEX, TABLE_JOBS, TABLE_NODE_POOLS, TABLE_NODES,
};
use crate::core::store::StateStore;
use crate::core::types::{
    AclPolicy, AclRole, AclToken, Allocation, CsiVolume, IndexEntry, Job, Node, NodePool, Record,
};
use crc::{CRC_32_ISO_HDLC, Crc};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const SNAPSHOT_MAGIC: &[u8; 8] = b"DRVRSNAP";
const SNAPSHOT_VERSION: u32 = 1;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

fn encode_record(record: &Record) -> Result<Vec<u8>, DroverError> {
    let cfg = bincode_config();
    let bytes = match record {
        Record::NodePool(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::Node(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::Job(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::Alloc(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::AclToken(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::AclPolicy(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::AclRole(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::Volume(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
        Record::TableIndex(r) => bincode::serde::encode_to_vec(r.as_ref(), cfg)?,
    };
    Ok(bytes)
}

fn decode_record(table: &str, bytes: &[u8]) -> Result<Record, DroverError> {
    let cfg = bincode_config();
    let record = match table {
        TABLE_NODE_POOLS => {
            let (r, _): (NodePool, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::NodePool(Arc::new(r))
        }
        TABLE_NODES => {
            let (r, _): (Node, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::Node(Arc::new(r))
        }
        TABLE_JOBS => {
            let (r, _): (Job, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::Job(Arc::new(r))
        }
        TABLE_ALLOCS => {
            let (r, _): (Allocation, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::Alloc(Arc::new(r))
        }
        TABLE_ACL_TOKENS => {
            let (r, _): (AclToken, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::AclToken(Arc::new(r))
        }
        TABLE_ACL_POLICIES => {
            let (r, _): (AclPolicy, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::AclPolicy(Arc::new(r))
        }
        TABLE_ACL_ROLES => {
            let (r, _): (AclRole, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::AclRole(Arc::new(r))
        }
        TABLE_CSI_VOLUMES => {
            let (r, _): (CsiVolume, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::Volume(Arc::new(r))
        }
        TABLE_INDEX => {
            let (r, _): (IndexEntry, _) = bincode::serde::decode_from_slice(bytes, cfg)?;
            Record::TableIndex(Arc::new(r))
        }
        other => {
            return Err(DroverError::Snapshot(format!(
                "unknown table \"{other}\" in snapshot"
            )));
        }
    };
    Ok(record)
}

/// Serializes the current committed state to `path`. The write goes through
/// a temp file and an atomic rename so a crash never leaves a torn snapshot.
pub fn persist(store: &Arc<StateStore>, path: &Path) -> Result<(), DroverError> {
    let snap = store.snapshot();
    let mut buf = Vec::new();
    buf.extend_from_slice(SNAPSHOT_MAGIC);
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());

    for table in store.schema.tables() {
        let records: Vec<Record> = snap
            .get_prefix(table.name, "id", &[""])?
            .map(|(_, r)| r)
            .collect();

        buf.extend_from_slice(&(table.name.len() as u16).to_le_bytes());
        buf.extend_from_slice(table.name.as_bytes());
        buf.extend_from_slice(&(records.len() as u64).to_le_bytes());
        for record in &records {
            let bytes = encode_record(record)?;
            buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            buf.extend_from_slice(&bytes);
        }
    }

    let checksum = CRC32.checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &buf)?;
    std::fs::rename(&tmp, path)?;
    info!(path = %path.display(), bytes = buf.len(), "persisted state snapshot");
    Ok(())
}

/// Restores a snapshot into the store. Expects a fresh store; restore is a
/// sequence of monotone inserts that also reinstates every table's
/// last-write index from the persisted meta stream.
pub fn restore(store: &Arc<StateStore>, path: &Path) -> Result<(), DroverError> {
    let buf = std::fs::read(path)?;
    if buf.len() < SNAPSHOT_MAGIC.len() + 8 {
        return Err(DroverError::Snapshot("snapshot file truncated".into()));
    }
    let (body, tail) = buf.split_at(buf.len() - 4);
    let stored = u32::from_le_bytes(tail.try_into().expect("4-byte checksum tail"));
    if CRC32.checksum(body) != stored {
        return Err(DroverError::Snapshot("snapshot checksum mismatch".into()));
    }
    if &body[..8] != SNAPSHOT_MAGIC {
        return Err(DroverError::Snapshot("bad snapshot magic".into()));
    }
    let version = u32::from_le_bytes(body[8..12].try_into().expect("4-byte version"));
    if version != SNAPSHOT_VERSION {
        return Err(DroverError::Snapshot(format!(
            "unsupported snapshot version {version}"
        )));
    }

    fn take<'a>(body: &'a [u8], off: &mut usize, n: usize) -> Result<&'a [u8], DroverError> {
        if body.len() - *off < n {
            return Err(DroverError::Snapshot("snapshot file truncated".into()));
        }
        let head = &body[*off..*off + n];
        *off += n;
        Ok(head)
    }

    let mut off = 12usize;
    let mut txn = store.write_blocking(0);
    let mut restored = 0usize;
    while off < body.len() {
        let name_len =
            u16::from_le_bytes(take(body, &mut off, 2)?.try_into().expect("2-byte length"))
                as usize;
        let name = String::from_utf8(take(body, &mut off, name_len)?.to_vec())
            .map_err(|_| DroverError::Snapshot("non-UTF8 table name".into()))?;
        let count = u64::from_le_bytes(take(body, &mut off, 8)?.try_into().expect("8-byte count"));
        for _ in 0..count {
            let rec_len =
                u32::from_le_bytes(take(body, &mut off, 4)?.try_into().expect("4-byte length"))
                    as usize;
            let record = decode_record(&name, take(body, &mut off, rec_len)?)?;
            txn.insert(&name, record)?;
            restored += 1;
        }
    }
    txn.commit();
    info!(path = %path.display(), records = restored, "restored state snapshot");
    Ok(())
}
