// tests/unit_watcher_test.rs

//! The volume claim watcher: release protocol happy path, error retry,
//! quiescence, and leadership transitions.

mod common;

use drover::core::raft::{Command, CsiVolumeClaimRequest};
use drover::core::types::AllocClientStatus;
use drover::core::types::volume::CsiClaimState;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{alloc, node, read_claim, start_server, volume, wait_until};

#[tokio::test]
async fn released_claims_advance_to_freed() {
    let ts = start_server().await;

    // Volume V with a read claim by alloc A on node N.
    let n = node("default");
    ts.apply(Command::UpsertNode(Box::new(n.clone()))).await;
    let a = alloc("default", "web", &n.id);
    ts.apply(Command::UpsertAllocs(vec![a.clone()])).await;
    ts.apply(Command::CsiVolumeRegister(Box::new(volume("default", "vol-1"))))
        .await;
    ts.apply(Command::CsiVolumeClaim(Box::new(CsiVolumeClaimRequest {
        namespace: "default".to_string(),
        volume_id: "vol-1".to_string(),
        claims: vec![read_claim(&a.id, &n.id)],
    })))
    .await;

    // While the alloc runs, nothing is released.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(ts.client_rpc.node_detaches.load(Ordering::SeqCst), 0);

    // The alloc completes; the watcher walks the claim to freed.
    ts.apply(Command::UpdateAllocClientStatus {
        id: a.id.clone(),
        status: AllocClientStatus::Complete,
    })
    .await;

    let freed = wait_until(Duration::from_secs(5), || {
        let snap = ts.state.store.snapshot();
        let vol = snap.csi_volume("default", "vol-1").unwrap().unwrap();
        vol.read_claims.is_empty() && vol.past_claims.is_empty()
    })
    .await;
    assert!(freed, "claim should be freed within bounded time");

    // One node detach; the plugin has no controller, so no controller
    // detach.
    assert_eq!(ts.client_rpc.node_detaches.load(Ordering::SeqCst), 1);
    assert_eq!(ts.client_rpc.controller_detaches.load(Ordering::SeqCst), 0);

    // The store observed the protocol's checkpoints in monotone order.
    let mut states = Vec::new();
    for (_, cmd) in ts.state.raft.commands().unwrap() {
        match cmd {
            Command::CsiVolumeClaim(req) => {
                states.extend(req.claims.iter().map(|c| c.state));
            }
            Command::CsiVolumeClaimBatch(reqs) => {
                states.extend(reqs.iter().flat_map(|r| r.claims.iter().map(|c| c.state)));
            }
            _ => {}
        }
    }
    let release_states: Vec<CsiClaimState> = states
        .into_iter()
        .filter(|s| *s != CsiClaimState::Taken)
        .collect();
    assert_eq!(
        release_states,
        vec![CsiClaimState::Unpublishing, CsiClaimState::ReadyToFree]
    );
}

#[tokio::test]
async fn controller_plugins_get_both_detach_calls() {
    let ts = start_server().await;

    let n = node("default");
    ts.apply(Command::UpsertNode(Box::new(n.clone()))).await;
    let a = alloc("default", "web", &n.id);
    ts.apply(Command::UpsertAllocs(vec![a.clone()])).await;
    let mut v = volume("default", "vol-ctrl");
    v.controller_required = true;
    ts.apply(Command::CsiVolumeRegister(Box::new(v))).await;
    ts.apply(Command::CsiVolumeClaim(Box::new(CsiVolumeClaimRequest {
        namespace: "default".to_string(),
        volume_id: "vol-ctrl".to_string(),
        claims: vec![read_claim(&a.id, &n.id)],
    })))
    .await;
    ts.apply(Command::UpdateAllocClientStatus {
        id: a.id.clone(),
        status: AllocClientStatus::Complete,
    })
    .await;

    let freed = wait_until(Duration::from_secs(5), || {
        let snap = ts.state.store.snapshot();
        let vol = snap.csi_volume("default", "vol-ctrl").unwrap().unwrap();
        vol.read_claims.is_empty() && vol.past_claims.is_empty()
    })
    .await;
    assert!(freed);
    assert_eq!(ts.client_rpc.node_detaches.load(Ordering::SeqCst), 1);
    assert_eq!(ts.client_rpc.controller_detaches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_detach_stays_taken_and_retries() {
    let ts = start_server().await;
    ts.client_rpc.fail_node_detach.store(true, Ordering::SeqCst);

    let n = node("default");
    ts.apply(Command::UpsertNode(Box::new(n.clone()))).await;
    let a = alloc("default", "web", &n.id);
    ts.apply(Command::UpsertAllocs(vec![a.clone()])).await;
    ts.apply(Command::CsiVolumeRegister(Box::new(volume("default", "vol-err"))))
        .await;
    ts.apply(Command::CsiVolumeClaim(Box::new(CsiVolumeClaimRequest {
        namespace: "default".to_string(),
        volume_id: "vol-err".to_string(),
        claims: vec![read_claim(&a.id, &n.id)],
    })))
    .await;
    ts.apply(Command::UpdateAllocClientStatus {
        id: a.id.clone(),
        status: AllocClientStatus::Complete,
    })
    .await;

    // The claim checkpoints into unpublishing but cannot advance.
    tokio::time::sleep(Duration::from_millis(600)).await;
    {
        let snap = ts.state.store.snapshot();
        let vol = snap.csi_volume("default", "vol-err").unwrap().unwrap();
        let past = vol.past_claims.get(&a.id).expect("past claim exists");
        assert_eq!(past.state, CsiClaimState::Unpublishing);
    }

    // Recovery: the worker's retry drives it home.
    ts.client_rpc.fail_node_detach.store(false, Ordering::SeqCst);
    let freed = wait_until(Duration::from_secs(5), || {
        let snap = ts.state.store.snapshot();
        let vol = snap.csi_volume("default", "vol-err").unwrap().unwrap();
        vol.read_claims.is_empty() && vol.past_claims.is_empty()
    })
    .await;
    assert!(freed);
}

#[tokio::test]
async fn gc_claims_enter_the_protocol_without_an_alloc() {
    let ts = start_server().await;

    ts.apply(Command::CsiVolumeRegister(Box::new(volume("default", "vol-gc"))))
        .await;
    // The GC synthesizes a past claim for an alloc that never reached the
    // store.
    let mut claim = read_claim(&uuid::Uuid::new_v4().to_string(), "");
    claim.mode = drover::core::types::volume::CsiClaimMode::Gc;
    ts.apply(Command::CsiVolumeClaim(Box::new(CsiVolumeClaimRequest {
        namespace: "default".to_string(),
        volume_id: "vol-gc".to_string(),
        claims: vec![claim],
    })))
    .await;

    let freed = wait_until(Duration::from_secs(5), || {
        let snap = ts.state.store.snapshot();
        let vol = snap.csi_volume("default", "vol-gc").unwrap().unwrap();
        vol.past_claims.is_empty()
    })
    .await;
    assert!(freed);
}

#[tokio::test]
async fn step_down_disables_the_watcher() {
    let ts = start_server().await;
    assert!(wait_until(Duration::from_secs(2), || ts
        .state
        .volume_watcher
        .is_enabled())
    .await);

    ts.state.raft.set_leader(false);
    assert!(
        wait_until(Duration::from_secs(2), || !ts
            .state
            .volume_watcher
            .is_enabled())
        .await
    );

    // Regaining leadership re-enables it.
    ts.state.raft.set_leader(true);
    assert!(wait_until(Duration::from_secs(2), || ts
        .state
        .volume_watcher
        .is_enabled())
    .await);
}
