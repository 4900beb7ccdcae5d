// tests/common/mod.rs

//! Shared fixtures for the unit test files: an in-process server with a
//! counting client transport, plus builders for the record types.

#![allow(dead_code)]

use drover::config::Config;
use drover::core::auth::Identity;
use drover::core::errors::DroverError;
use drover::core::raft::Command;
use drover::core::rpc::{ClientRpc, RpcContext};
use drover::core::state::ServerState;
use drover::core::types::{
    AclPolicy, AclToken, AclTokenType, Allocation, AllocClientStatus, CsiVolume, CsiVolumeClaim,
    Job, JobStatus, Node, NodePool, NodeStatus,
};
use drover::core::types::volume::{CsiClaimMode, CsiClaimState};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// A client transport that counts detach calls and can be told to fail.
#[derive(Default)]
pub struct CountingClientRpc {
    pub node_detaches: AtomicUsize,
    pub controller_detaches: AtomicUsize,
    pub fail_node_detach: AtomicBool,
}

#[async_trait]
impl ClientRpc for CountingClientRpc {
    async fn node_detach_volume(
        &self,
        _node_id: &str,
        _namespace: &str,
        _volume_id: &str,
        _alloc_id: &str,
    ) -> Result<(), DroverError> {
        if self.fail_node_detach.load(Ordering::SeqCst) {
            return Err(DroverError::Rpc("node detach failed".to_string()));
        }
        self.node_detaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn controller_detach_volume(
        &self,
        _plugin_id: &str,
        _volume_id: &str,
        _node_id: &str,
    ) -> Result<(), DroverError> {
        self.controller_detaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestServer {
    pub state: Arc<ServerState>,
    pub client_rpc: Arc<CountingClientRpc>,
    pub shutdown: broadcast::Sender<()>,
    /// Secret of a pre-minted management token.
    pub root_secret: String,
}

impl TestServer {
    /// A management-authenticated request context.
    pub fn root_ctx(&self) -> RpcContext {
        self.state
            .context_for(&self.root_secret, None)
            .expect("root token resolves")
    }

    /// An unauthenticated request context.
    pub fn anonymous_ctx(&self) -> RpcContext {
        RpcContext::new(Identity::Anonymous)
    }

    pub async fn apply(&self, cmd: Command) -> u64 {
        self.state.raft.apply(cmd).await.expect("command applies")
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.acl.enabled = true;
    config.volume_watcher.batch_duration = Duration::from_millis(50);
    config.volume_watcher.quiescent_timeout = Duration::from_secs(2);
    config
}

/// Boots a server with leadership established and a management token minted.
pub async fn start_server() -> TestServer {
    start_server_with(test_config()).await
}

pub async fn start_server_with(config: Config) -> TestServer {
    let client_rpc = Arc::new(CountingClientRpc::default());
    let init = ServerState::initialize_with(config, client_rpc.clone()).expect("server init");
    let state = init.state.clone();

    let (shutdown, _) = broadcast::channel(1);
    drover::server::spawn(init, &shutdown);
    state.raft.set_leader(true);
    // Let the leadership loop observe the transition.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let root_secret = Uuid::new_v4().to_string();
    let token = AclToken {
        accessor_id: Uuid::new_v4().to_string(),
        secret_id: root_secret.clone(),
        name: "root".to_string(),
        token_type: AclTokenType::Management,
        ..Default::default()
    };
    state
        .raft
        .apply(Command::UpsertAclTokens(vec![token]))
        .await
        .expect("mint root token");

    TestServer {
        state,
        client_rpc,
        shutdown,
        root_secret,
    }
}

// --- Record builders ---

pub fn pool(name: &str) -> NodePool {
    NodePool {
        name: name.to_string(),
        description: format!("pool {name}"),
        ..Default::default()
    }
}

pub fn node(pool: &str) -> Node {
    Node {
        id: Uuid::new_v4().to_string(),
        secret_id: Uuid::new_v4().to_string(),
        name: "node".to_string(),
        datacenter: "dc1".to_string(),
        node_pool: pool.to_string(),
        status: NodeStatus::Ready,
        ..Default::default()
    }
}

pub fn job(namespace: &str, id: &str, pool: &str) -> Job {
    Job {
        namespace: namespace.to_string(),
        id: id.to_string(),
        name: id.to_string(),
        node_pool: pool.to_string(),
        status: JobStatus::Running,
        priority: 50,
        ..Default::default()
    }
}

pub fn alloc(namespace: &str, job_id: &str, node_id: &str) -> Allocation {
    Allocation {
        id: Uuid::new_v4().to_string(),
        namespace: namespace.to_string(),
        job_id: job_id.to_string(),
        task_group: "web".to_string(),
        node_id: node_id.to_string(),
        client_status: AllocClientStatus::Running,
        ..Default::default()
    }
}

pub fn volume(namespace: &str, id: &str) -> CsiVolume {
    CsiVolume {
        namespace: namespace.to_string(),
        id: id.to_string(),
        name: id.to_string(),
        plugin_id: "plugin-1".to_string(),
        controller_required: false,
        ..Default::default()
    }
}

pub fn read_claim(alloc_id: &str, node_id: &str) -> CsiVolumeClaim {
    CsiVolumeClaim {
        alloc_id: alloc_id.to_string(),
        node_id: node_id.to_string(),
        mode: CsiClaimMode::Read,
        state: CsiClaimState::Taken,
    }
}

pub fn policy(name: &str, rules: &str) -> AclPolicy {
    AclPolicy {
        name: name.to_string(),
        rules: rules.to_string(),
        ..Default::default()
    }
}

pub fn client_token(policies: &[&str]) -> AclToken {
    AclToken {
        accessor_id: Uuid::new_v4().to_string(),
        secret_id: Uuid::new_v4().to_string(),
        name: "client".to_string(),
        token_type: AclTokenType::Client,
        policies: policies.iter().map(|p| p.to_string()).collect(),
        ..Default::default()
    }
}

/// Polls `check` until it returns true or the deadline lapses.
pub async fn wait_until<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
