// src/core/rpc/mod.rs

//! The request envelope and the collaborator traits at the RPC boundary.
//! Handlers receive a context with the identity already attached; forwarded
//! requests arrive pre-authenticated and are never re-resolved.

pub mod node_pool;
pub mod volume;

pub use node_pool::NodePoolEndpoint;
pub use volume::VolumeEndpoint;

use crate::core::auth::Identity;
use crate::core::errors::DroverError;
use crate::core::store::StateStore;
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-request context. Built once by the transport layer after credential
/// resolution and passed to every handler the request touches.
#[derive(Debug, Clone)]
pub struct RpcContext {
    pub identity: Identity,
    pub remote_addr: Option<SocketAddr>,
    pub tls_name: Option<String>,
    /// Set when the request was forwarded from another server. The identity
    /// is trusted as-is.
    pub forwarded: bool,
    /// Cancels blocking reads when the caller goes away.
    pub cancel: CancellationToken,
}

impl RpcContext {
    pub fn new(identity: Identity) -> Self {
        RpcContext {
            identity,
            remote_addr: None,
            tls_name: None,
            forwarded: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// The calls the control plane makes out to client nodes. The transport to
/// the node (and the CSI plugin behind it) lives outside the core; the
/// watcher and the volume endpoint program against this contract.
#[async_trait]
pub trait ClientRpc: Send + Sync {
    /// Asks the node to unmount and unstage a volume for an allocation.
    async fn node_detach_volume(
        &self,
        node_id: &str,
        namespace: &str,
        volume_id: &str,
        alloc_id: &str,
    ) -> Result<(), DroverError>;

    /// Asks the controller plugin to detach a volume from a node.
    async fn controller_detach_volume(
        &self,
        plugin_id: &str,
        volume_id: &str,
        node_id: &str,
    ) -> Result<(), DroverError>;
}

/// Development-mode client transport: detaches always succeed. Real
/// deployments wire the agent's connection pool in here.
pub struct NoopClientRpc;

#[async_trait]
impl ClientRpc for NoopClientRpc {
    async fn node_detach_volume(
        &self,
        node_id: &str,
        namespace: &str,
        volume_id: &str,
        alloc_id: &str,
    ) -> Result<(), DroverError> {
        debug!(node_id, namespace, volume_id, alloc_id, "node detach (noop transport)");
        Ok(())
    }

    async fn controller_detach_volume(
        &self,
        plugin_id: &str,
        volume_id: &str,
        node_id: &str,
    ) -> Result<(), DroverError> {
        debug!(plugin_id, volume_id, node_id, "controller detach (noop transport)");
        Ok(())
    }
}

/// Whether a node pool is occupied in one region.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolUse {
    pub has_nodes: bool,
    pub has_live_jobs: bool,
}

/// Cross-region occupancy checks for the node pool delete guard. The
/// in-tree implementation answers for the local region; multi-region
/// deployments supply a forwarding implementation.
#[async_trait]
pub trait RegionChecker: Send + Sync {
    /// Every region the deletion guard must consult, local region included.
    fn regions(&self) -> Vec<String>;

    async fn pool_in_use(&self, region: &str, pool: &str) -> Result<PoolUse, DroverError>;
}

pub struct LocalRegionChecker {
    store: Arc<StateStore>,
    region: String,
}

impl LocalRegionChecker {
    pub fn new(store: Arc<StateStore>, region: String) -> Self {
        LocalRegionChecker { store, region }
    }
}

#[async_trait]
impl RegionChecker for LocalRegionChecker {
    fn regions(&self) -> Vec<String> {
        vec![self.region.clone()]
    }

    async fn pool_in_use(&self, region: &str, pool: &str) -> Result<PoolUse, DroverError> {
        if region != self.region {
            return Err(DroverError::Rpc(format!("unknown region \"{region}\"")));
        }
        let snap = self.store.snapshot();
        Ok(PoolUse {
            has_nodes: snap.pool_has_nodes(pool)?,
            has_live_jobs: snap.pool_has_live_jobs(pool)?,
        })
    }
}
