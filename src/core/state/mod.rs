// src/core/state/mod.rs

//! Defines the central `ServerState` struct, holding all shared server-wide
//! state: the store, the replicated log, the authenticator, and the
//! leader-only subsystems.

use crate::config::Config;
use crate::core::auth::{Authenticator, ClaimSigner};
use crate::core::errors::DroverError;
use crate::core::raft::ReplicatedLog;
use crate::core::rpc::{
    ClientRpc, LocalRegionChecker, NoopClientRpc, RegionChecker, RpcContext, VolumeEndpoint,
};
use crate::core::auth::policy::Acl;
use crate::core::store::StateStore;
use crate::core::tasks::{ClaimBatcher, ClaimBatcherTask, VolumeWatcher};
use std::sync::Arc;
use uuid::Uuid;

/// Contains all initialized components required to spawn the server's
/// background tasks. Created once during initialization and consumed by the
/// spawner.
pub struct ServerInit {
    /// The fully initialized, shared server state.
    pub state: Arc<ServerState>,
    /// The claim batcher loop, to be spawned by the server.
    pub batcher_task: ClaimBatcherTask,
}

/// The central struct holding all shared, server-wide state. Wrapped in an
/// `Arc` and passed to every endpoint and background task.
pub struct ServerState {
    pub config: Arc<Config>,
    pub store: Arc<StateStore>,
    pub raft: Arc<ReplicatedLog>,
    pub auth: Arc<Authenticator>,
    pub client_rpc: Arc<dyn ClientRpc>,
    pub region_checker: Arc<dyn RegionChecker>,
    pub claim_batcher: ClaimBatcher,
    pub volume_endpoint: Arc<VolumeEndpoint>,
    pub volume_watcher: Arc<VolumeWatcher>,
    /// The loopback secret installed while this process leads.
    pub leader_acl_secret: String,
}

impl ServerState {
    /// Initializes the entire server state from the given configuration.
    /// This is the main factory for the server's shared context.
    pub fn initialize(config: Config) -> Result<ServerInit, DroverError> {
        Self::initialize_with(config, Arc::new(NoopClientRpc))
    }

    /// Variant taking the client transport, so embedders (and tests) can
    /// supply their own.
    pub fn initialize_with(
        config: Config,
        client_rpc: Arc<dyn ClientRpc>,
    ) -> Result<ServerInit, DroverError> {
        let config = Arc::new(config);
        let store = StateStore::new()?;
        let raft = ReplicatedLog::new(store.clone());

        let signer = ClaimSigner::generate()?;
        let auth = Arc::new(Authenticator::new(
            store.clone(),
            config.region.clone(),
            config.acl.enabled,
            config.tls.verify,
            signer,
            config.acl.policy_cache_size,
        ));
        let region_checker: Arc<dyn RegionChecker> = Arc::new(LocalRegionChecker::new(
            store.clone(),
            config.region.clone(),
        ));

        let (claim_batcher, batcher_task) =
            ClaimBatcher::new(raft.clone(), config.volume_watcher.batch_duration);

        let volume_endpoint = Arc::new(VolumeEndpoint::new(
            store.clone(),
            raft.clone(),
            client_rpc.clone(),
        ));
        let volume_watcher = VolumeWatcher::new(
            store.clone(),
            volume_endpoint.clone(),
            claim_batcher.clone(),
            config.volume_watcher.quiescent_timeout,
        );

        let leader_acl_secret = config
            .leader_acl
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let state = Arc::new(ServerState {
            config,
            store,
            raft,
            auth,
            client_rpc,
            region_checker,
            claim_batcher,
            volume_endpoint,
            volume_watcher,
            leader_acl_secret,
        });

        Ok(ServerInit {
            state,
            batcher_task,
        })
    }

    /// Builds a request context by resolving the supplied credentials.
    /// Diagnostic credential errors collapse to the external error here, at
    /// the module boundary.
    pub fn context_for(&self, token: &str, tls_name: Option<&str>) -> Result<RpcContext, DroverError> {
        let identity = self
            .auth
            .authenticate(token, tls_name, None)
            .map_err(DroverError::external)?;
        let mut ctx = RpcContext::new(identity);
        ctx.tls_name = tls_name.map(str::to_string);
        Ok(ctx)
    }

    /// Resolves the capability set of a request's identity. Forwarded
    /// requests trust the attached identity without re-authentication.
    pub fn resolve_acl(&self, ctx: &RpcContext) -> Result<Arc<Acl>, DroverError> {
        self.auth
            .resolve_acl(&ctx.identity)
            .map_err(DroverError::external)
    }
}
