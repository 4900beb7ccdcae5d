// src/core/raft/fsm.rs

//! Deterministic command application. Every replica runs the same commands
//! in the same order through this module, producing identical successor
//! snapshots. Domain errors are returned to the submitter; structural errors
//! panic, because applying half a command would corrupt replicated state.

use crate::core::errors::DroverError;
use crate::core::raft::msg::Command;
use crate::core::store::StateStore;
use std::sync::Arc;
use tracing::debug;

pub struct Fsm {
    store: Arc<StateStore>,
}

impl Fsm {
    pub fn new(store: Arc<StateStore>) -> Self {
        Fsm { store }
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Applies one committed command at `index`. The whole command commits
    /// atomically: any error discards the staged transaction.
    pub async fn apply(&self, index: u64, cmd: &Command) -> Result<(), DroverError> {
        debug!(index, kind = cmd.kind(), "applying command");
        let mut txn = self.store.write(index).await;

        match cmd {
            Command::UpsertNodePools(pools) => {
                for pool in pools {
                    txn.upsert_node_pool(pool.clone())?;
                }
            }
            Command::DeleteNodePools(names) => {
                for name in names {
                    txn.delete_node_pool(name)?;
                }
            }
            Command::UpsertNode(node) => txn.upsert_node((**node).clone())?,
            Command::DeleteNode(id) => txn.delete_node(id)?,
            Command::UpsertJob(job) => txn.upsert_job((**job).clone())?,
            Command::DeleteJob { namespace, id } => txn.delete_job(namespace, id)?,
            Command::UpsertAllocs(allocs) => {
                for alloc in allocs {
                    txn.upsert_alloc(alloc.clone())?;
                }
            }
            Command::UpdateAllocClientStatus { id, status } => {
                let Some(alloc) = txn.view().alloc_by_id(id)? else {
                    return Err(DroverError::AllocNotFound);
                };
                let mut updated = (*alloc).clone();
                updated.client_status = *status;
                txn.upsert_alloc(updated)?;
            }
            Command::UpsertAclTokens(tokens) => {
                for token in tokens {
                    txn.upsert_acl_token(token.clone())?;
                }
            }
            Command::DeleteAclTokens(accessors) => {
                for accessor in accessors {
                    txn.delete_acl_token_by_accessor(accessor)?;
                }
            }
            Command::UpsertAclPolicies(policies) => {
                for policy in policies {
                    txn.upsert_acl_policy(policy.clone())?;
                }
            }
            Command::DeleteAclPolicies(names) => {
                for name in names {
                    txn.delete_acl_policy(name)?;
                }
            }
            Command::UpsertAclRoles(roles) => {
                for role in roles {
                    txn.upsert_acl_role(role.clone())?;
                }
            }
            Command::DeleteAclRoles(ids) => {
                for id in ids {
                    txn.delete_acl_role(id)?;
                }
            }
            Command::CsiVolumeRegister(volume) => txn.csi_volume_register((**volume).clone())?,
            Command::CsiVolumeDeregister { namespace, id } => {
                txn.csi_volume_deregister(namespace, id)?;
            }
            Command::CsiVolumeClaim(req) => {
                for claim in &req.claims {
                    txn.csi_volume_claim(&req.namespace, &req.volume_id, claim.clone())?;
                }
            }
            Command::CsiVolumeClaimBatch(reqs) => {
                for req in reqs {
                    for claim in &req.claims {
                        txn.csi_volume_claim(&req.namespace, &req.volume_id, claim.clone())?;
                    }
                }
            }
        }

        txn.commit();
        Ok(())
    }
}
