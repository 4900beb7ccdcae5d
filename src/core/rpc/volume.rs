// src/core/rpc/volume.rs

//! The volume endpoint: claim checkpoints and the unpublish sequence the
//! claim watcher drives. Unpublish encapsulates node-detach followed by
//! controller-detach, checkpointing each step through the log so a leader
//! failover resumes mid-protocol instead of restarting it.

use crate::core::errors::DroverError;
use crate::core::raft::{Command, CsiVolumeClaimRequest, ReplicatedLog};
use crate::core::rpc::ClientRpc;
use crate::core::store::StateStore;
use crate::core::types::volume::{CsiClaimState, CsiVolume, CsiVolumeClaim};
use std::sync::Arc;
use tracing::debug;

pub struct VolumeEndpoint {
    store: Arc<StateStore>,
    raft: Arc<ReplicatedLog>,
    client_rpc: Arc<dyn ClientRpc>,
}

impl VolumeEndpoint {
    pub fn new(
        store: Arc<StateStore>,
        raft: Arc<ReplicatedLog>,
        client_rpc: Arc<dyn ClientRpc>,
    ) -> Self {
        VolumeEndpoint {
            store,
            raft,
            client_rpc,
        }
    }

    /// Registers (or re-registers) a volume.
    pub async fn register(&self, volume: CsiVolume) -> Result<u64, DroverError> {
        self.raft
            .apply(Command::CsiVolumeRegister(Box::new(volume)))
            .await
    }

    /// Applies a single claim transition.
    pub async fn claim(
        &self,
        namespace: &str,
        volume_id: &str,
        claim: CsiVolumeClaim,
    ) -> Result<u64, DroverError> {
        self.raft
            .apply(Command::CsiVolumeClaim(Box::new(CsiVolumeClaimRequest {
                namespace: namespace.to_string(),
                volume_id: volume_id.to_string(),
                claims: vec![claim],
            })))
            .await
    }

    /// Releases one past claim: node detach, then controller detach when the
    /// plugin requires it. Returns the claim advanced to `ReadyToFree`; the
    /// caller persists that final transition (batched, in the watcher's
    /// case). Intermediate states are checkpointed so progress survives
    /// leader failover. Errors leave the claim at its current checkpoint;
    /// the watcher retries on its next cycle.
    pub async fn unpublish(
        &self,
        namespace: &str,
        volume_id: &str,
        claim: &CsiVolumeClaim,
    ) -> Result<CsiVolumeClaim, DroverError> {
        let snap = self.store.snapshot();
        let Some(volume) = snap.csi_volume(namespace, volume_id)? else {
            return Err(DroverError::NotFound);
        };

        let mut current = claim.clone();
        debug!(
            namespace,
            volume_id,
            alloc = %current.alloc_id,
            state = %current.state,
            "unpublishing volume claim"
        );

        if current.state == CsiClaimState::Taken {
            current.state = CsiClaimState::Unpublishing;
            self.claim(namespace, volume_id, current.clone()).await?;
        }

        if current.state == CsiClaimState::Unpublishing {
            self.client_rpc
                .node_detach_volume(&current.node_id, namespace, volume_id, &current.alloc_id)
                .await?;
            if volume.controller_required {
                current.state = CsiClaimState::NodeDetached;
                self.claim(namespace, volume_id, current.clone()).await?;
            } else {
                current.state = CsiClaimState::ReadyToFree;
                return Ok(current);
            }
        }

        if current.state == CsiClaimState::NodeDetached {
            self.client_rpc
                .controller_detach_volume(&volume.plugin_id, volume_id, &current.node_id)
                .await?;
            current.state = CsiClaimState::ReadyToFree;
        }

        Ok(current)
    }
}
