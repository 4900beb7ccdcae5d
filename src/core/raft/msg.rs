// src/core/raft/msg.rs

//! The structured commands the log replicates. Every state mutation in the
//! cluster is one of these, encoded with bincode for the wire and the log.

use crate::core::types::{
    AclPolicy, AclRole, AclToken, Allocation, AllocClientStatus, CsiVolume, CsiVolumeClaim, Job,
    Node, NodePool,
};
use serde::{Deserialize, Serialize};

/// One volume's worth of claim transitions, the unit the claim batcher
/// deduplicates on `(namespace, volume_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsiVolumeClaimRequest {
    pub namespace: String,
    pub volume_id: String,
    pub claims: Vec<CsiVolumeClaim>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    UpsertNodePools(Vec<NodePool>),
    DeleteNodePools(Vec<String>),
    UpsertNode(Box<Node>),
    DeleteNode(String),
    UpsertJob(Box<Job>),
    DeleteJob { namespace: String, id: String },
    UpsertAllocs(Vec<Allocation>),
    UpdateAllocClientStatus { id: String, status: AllocClientStatus },
    UpsertAclTokens(Vec<AclToken>),
    DeleteAclTokens(Vec<String>),
    UpsertAclPolicies(Vec<AclPolicy>),
    DeleteAclPolicies(Vec<String>),
    UpsertAclRoles(Vec<AclRole>),
    DeleteAclRoles(Vec<String>),
    CsiVolumeRegister(Box<CsiVolume>),
    CsiVolumeDeregister { namespace: String, id: String },
    CsiVolumeClaim(Box<CsiVolumeClaimRequest>),
    /// A batch of claim updates committed atomically at one index.
    CsiVolumeClaimBatch(Vec<CsiVolumeClaimRequest>),
}

impl Command {
    /// Short name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::UpsertNodePools(_) => "node_pool.upsert",
            Command::DeleteNodePools(_) => "node_pool.delete",
            Command::UpsertNode(_) => "node.upsert",
            Command::DeleteNode(_) => "node.delete",
            Command::UpsertJob(_) => "job.upsert",
            Command::DeleteJob { .. } => "job.delete",
            Command::UpsertAllocs(_) => "alloc.upsert",
            Command::UpdateAllocClientStatus { .. } => "alloc.update_client_status",
            Command::UpsertAclTokens(_) => "acl_token.upsert",
            Command::DeleteAclTokens(_) => "acl_token.delete",
            Command::UpsertAclPolicies(_) => "acl_policy.upsert",
            Command::DeleteAclPolicies(_) => "acl_policy.delete",
            Command::UpsertAclRoles(_) => "acl_role.upsert",
            Command::DeleteAclRoles(_) => "acl_role.delete",
            Command::CsiVolumeRegister(_) => "csi_volume.register",
            Command::CsiVolumeDeregister { .. } => "csi_volume.deregister",
            Command::CsiVolumeClaim(_) => "csi_volume.claim",
            Command::CsiVolumeClaimBatch(_) => "csi_volume.claim_batch",
        }
    }
}
