// src/core/types/mod.rs

//! The record entities held by the state store. Records are immutable once
//! committed: every reader gets a shared reference into the current snapshot,
//! and writers construct whole new values for the log to apply.

pub mod acl;
pub mod alloc;
pub mod job;
pub mod node;
pub mod node_pool;
pub mod volume;

pub use acl::{AclPolicy, AclRole, AclToken, AclTokenType, JobAcl, RoleLink};
pub use alloc::{AllocClientStatus, AllocDesiredStatus, Allocation, TaskState};
pub use job::{Job, JobStatus, JobType, Task, TaskGroup};
pub use node::{Node, NodeResources, NodeStatus};
pub use node_pool::NodePool;
pub use volume::{
    CsiAccessMode, CsiAttachmentMode, CsiClaimMode, CsiClaimState, CsiVolume, CsiVolumeClaim,
};

use std::sync::Arc;

/// A reference-counted record value as stored in the radix tree. Cloning a
/// `Record` is cheap; the payload is shared with every snapshot that holds it.
#[derive(Debug, Clone)]
pub enum Record {
    NodePool(Arc<NodePool>),
    Node(Arc<Node>),
    Job(Arc<Job>),
    Alloc(Arc<Allocation>),
    AclToken(Arc<AclToken>),
    AclPolicy(Arc<AclPolicy>),
    AclRole(Arc<AclRole>),
    Volume(Arc<CsiVolume>),
    TableIndex(Arc<IndexEntry>),
}

impl Record {
    /// The raft index of the commit that last wrote this record.
    pub fn modify_index(&self) -> u64 {
        match self {
            Record::NodePool(r) => r.modify_index,
            Record::Node(r) => r.modify_index,
            Record::Job(r) => r.modify_index,
            Record::Alloc(r) => r.modify_index,
            Record::AclToken(r) => r.modify_index,
            Record::AclPolicy(r) => r.modify_index,
            Record::AclRole(r) => r.modify_index,
            Record::Volume(r) => r.modify_index,
            Record::TableIndex(r) => r.value,
        }
    }
}

/// An entry in the meta table tracking the last write index of every table.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub value: u64,
}
