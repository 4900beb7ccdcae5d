// tests/unit_auth_test.rs

//! Credential resolution, workload identities, policy compilation.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use drover::core::auth::{Identity, IdentityClaims, NsCaps};
use drover::core::errors::DroverError;
use drover::core::raft::Command;
use drover::core::types::{AclTokenType, AllocClientStatus, JobAcl};
use uuid::Uuid;

use common::{alloc, client_token, job, node, policy, start_server, start_server_with, test_config};

#[tokio::test]
async fn stored_token_resolves_to_token_identity() {
    let ts = start_server().await;
    let token = client_token(&[]);
    ts.apply(Command::UpsertAclTokens(vec![token.clone()])).await;

    let identity = ts
        .state
        .auth
        .authenticate(&token.secret_id, None, None)
        .unwrap();
    match identity {
        Identity::AclToken(stored) => assert_eq!(stored.accessor_id, token.accessor_id),
        other => panic!("expected token identity, got {other:?}"),
    }
}

#[tokio::test]
async fn expired_token_is_rejected_with_diagnostic() {
    let ts = start_server().await;
    let mut token = client_token(&[]);
    token.expiration_time = Some(Utc::now() - ChronoDuration::seconds(5));
    ts.apply(Command::UpsertAclTokens(vec![token.clone()])).await;

    let err = ts
        .state
        .auth
        .authenticate(&token.secret_id, None, None)
        .unwrap_err();
    assert_eq!(err, DroverError::TokenExpired);
    // The external rendering collapses to a permission denial.
    assert_eq!(err.external(), DroverError::PermissionDenied);
}

#[tokio::test]
async fn unknown_uuid_token_reports_not_found() {
    let ts = start_server().await;
    let err = ts
        .state
        .auth
        .authenticate(&Uuid::new_v4().to_string(), None, None)
        .unwrap_err();
    assert_eq!(err, DroverError::TokenNotFound);
}

#[tokio::test]
async fn node_secret_resolves_to_client_identity() {
    let ts = start_server().await;
    let n = node("default");
    ts.apply(Command::UpsertNode(Box::new(n.clone()))).await;

    let identity = ts.state.auth.authenticate(&n.secret_id, None, None).unwrap();
    match identity {
        Identity::ClientId(id) => assert_eq!(id, n.id),
        other => panic!("expected client identity, got {other:?}"),
    }
}

#[tokio::test]
async fn leader_secret_resolves_to_leader_identity() {
    let ts = start_server().await;
    let secret = ts.state.leader_acl_secret.clone();
    let identity = ts.state.auth.authenticate(&secret, None, None).unwrap();
    assert!(matches!(identity, Identity::Leader));
    let acl = ts.state.auth.resolve_acl(&identity).unwrap();
    assert!(acl.is_management());
}

#[tokio::test]
async fn acls_disabled_attaches_distinct_identity() {
    let mut config = test_config();
    config.acl.enabled = false;
    let ts = start_server_with(config).await;

    let identity = ts.state.auth.authenticate("", None, None).unwrap();
    assert!(matches!(identity, Identity::AclsDisabled));
    let acl = ts.state.auth.resolve_acl(&identity).unwrap();
    assert!(acl.is_management());
}

#[tokio::test]
async fn no_credential_with_tls_attaches_peer_name() {
    let ts = start_server().await;
    let identity = ts
        .state
        .auth
        .authenticate("", Some("client.global.nomad"), None)
        .unwrap();
    match &identity {
        Identity::TlsName(name) => assert_eq!(name, "client.global.nomad"),
        other => panic!("expected TLS identity, got {other:?}"),
    }
    // Attribution, not authority.
    let acl = ts.state.auth.resolve_acl(&identity).unwrap();
    assert!(!acl.allow_node_read());
}

#[tokio::test]
async fn workload_claims_resolve_and_reject_terminal_allocs() {
    let ts = start_server().await;

    // An allocation of job J running task "web".
    let j = job("default", "web-app", "default");
    ts.apply(Command::UpsertJob(Box::new(j.clone()))).await;
    let mut a = alloc("default", &j.id, &Uuid::new_v4().to_string());
    a.task_group = "web".to_string();
    ts.apply(Command::UpsertAllocs(vec![a.clone()])).await;

    let claims = IdentityClaims {
        namespace: "default".to_string(),
        job_id: j.id.clone(),
        alloc_id: a.id.clone(),
        task_group: "web".to_string(),
        task: "web".to_string(),
    };
    let signed = ts.state.auth.signer().sign(&claims).unwrap();

    let identity = ts.state.auth.authenticate(&signed, None, None).unwrap();
    let resolved = match &identity {
        Identity::Claims(c) => c.clone(),
        other => panic!("expected claims identity, got {other:?}"),
    };
    assert_eq!(resolved, claims);

    // The implicit workload policy covers reads in the claim's namespace.
    let acl = ts.state.auth.resolve_acl(&identity).unwrap();
    assert!(acl.allow_namespace_op("default", NsCaps::READ_SERVICE));
    assert!(acl.allow_namespace_op("default", NsCaps::READ_JOB));
    assert!(!acl.allow_namespace_op("other", NsCaps::READ_JOB));
    assert!(!acl.allow_namespace_op("default", NsCaps::SUBMIT_JOB));

    // Mark the allocation complete: the claim is now dead.
    ts.apply(Command::UpdateAllocClientStatus {
        id: a.id.clone(),
        status: AllocClientStatus::Complete,
    })
    .await;
    let err = ts.state.auth.authenticate(&signed, None, None).unwrap_err();
    assert_eq!(err, DroverError::AllocTerminal);
}

#[tokio::test]
async fn job_acl_scoping_selects_matching_policies_only() {
    let ts = start_server().await;

    let j = job("default", "api", "default");
    ts.apply(Command::UpsertJob(Box::new(j.clone()))).await;
    let mut a = alloc("default", &j.id, &Uuid::new_v4().to_string());
    a.task_group = "api".to_string();
    ts.apply(Command::UpsertAllocs(vec![a.clone()])).await;

    // One policy scoped to this workload, one scoped to a different task.
    let mut matching = policy(
        "api-extra",
        r#"{"namespaces": {"shared": {"policy": "read"}}}"#,
    );
    matching.job_acl = Some(JobAcl {
        namespace: "default".to_string(),
        job_id: j.id.clone(),
        group: Some("api".to_string()),
        task: None,
    });
    let mut non_matching = policy(
        "api-other-task",
        r#"{"namespaces": {"secret": {"policy": "write"}}}"#,
    );
    non_matching.job_acl = Some(JobAcl {
        namespace: "default".to_string(),
        job_id: j.id.clone(),
        group: Some("api".to_string()),
        task: Some("sidecar".to_string()),
    });
    ts.apply(Command::UpsertAclPolicies(vec![matching, non_matching]))
        .await;

    let claims = IdentityClaims {
        namespace: "default".to_string(),
        job_id: j.id.clone(),
        alloc_id: a.id.clone(),
        task_group: "api".to_string(),
        task: "server".to_string(),
    };
    let identity = Identity::Claims(claims);
    let acl = ts.state.auth.resolve_acl(&identity).unwrap();

    assert!(acl.allow_namespace_op("shared", NsCaps::READ_JOB));
    // The non-matching task scope is silently omitted.
    assert!(!acl.allow_namespace_op("secret", NsCaps::SUBMIT_JOB));
}

#[tokio::test]
async fn token_policies_compile_through_roles_and_cache() {
    let ts = start_server().await;

    ts.apply(Command::UpsertAclPolicies(vec![
        policy("direct", r#"{"namespaces": {"default": {"policy": "read"}}}"#),
        policy("via-role", r#"{"node_pools": {"prod-*": {"policy": "read"}}}"#),
    ]))
    .await;
    let role = drover::core::types::AclRole {
        id: Uuid::new_v4().to_string(),
        name: "ops".to_string(),
        policies: vec!["via-role".to_string()],
        ..Default::default()
    };
    ts.apply(Command::UpsertAclRoles(vec![role.clone()])).await;

    let mut token = client_token(&["direct"]);
    token.roles = vec![drover::core::types::RoleLink {
        id: role.id.clone(),
        name: role.name.clone(),
    }];
    ts.apply(Command::UpsertAclTokens(vec![token.clone()])).await;

    let identity = ts
        .state
        .auth
        .authenticate(&token.secret_id, None, None)
        .unwrap();
    let acl = ts.state.auth.resolve_acl(&identity).unwrap();
    assert!(acl.allow_namespace_op("default", NsCaps::READ_JOB));
    assert!(acl.allow_node_pool_op("prod-1", drover::core::auth::PoolCaps::READ));
    assert!(!acl.allow_node_pool_op("dev-1", drover::core::auth::PoolCaps::READ));

    // Second resolution hits the memoized compilation.
    let again = ts.state.auth.resolve_acl(&identity).unwrap();
    assert!(std::sync::Arc::ptr_eq(&acl, &again));
}

#[tokio::test]
async fn management_token_bypasses_compilation() {
    let ts = start_server().await;
    let ctx = ts.root_ctx();
    let acl = ts.state.resolve_acl(&ctx).unwrap();
    assert!(acl.is_management());
    match &ctx.identity {
        Identity::AclToken(t) => assert_eq!(t.token_type, AclTokenType::Management),
        other => panic!("expected token identity, got {other:?}"),
    }
}

#[tokio::test]
async fn server_only_and_client_only_enforce_cert_names() {
    let mut config = test_config();
    config.tls.verify = true;
    let ts = start_server_with(config).await;

    assert!(ts
        .state
        .auth
        .authenticate_server_only(Some("server.global.nomad"))
        .is_ok());
    assert!(matches!(
        ts.state.auth.authenticate_server_only(Some("client.global.nomad")),
        Err(DroverError::PermissionDenied)
    ));
    assert!(matches!(
        ts.state.auth.authenticate_server_only(None),
        Err(DroverError::PermissionDenied)
    ));

    let n = node("default");
    ts.apply(Command::UpsertNode(Box::new(n.clone()))).await;
    let (found, acl) = ts
        .state
        .auth
        .authenticate_client_only(&n.secret_id, Some("client.global.nomad"))
        .unwrap();
    assert_eq!(found.id, n.id);
    assert!(acl.allow_node_read());
    assert!(matches!(
        ts.state
            .auth
            .authenticate_client_only(&n.secret_id, Some("rogue.global.nomad")),
        Err(DroverError::PermissionDenied)
    ));
    assert!(matches!(
        ts.state
            .auth
            .authenticate_client_only(&Uuid::new_v4().to_string(), Some("client.global.nomad")),
        Err(DroverError::PermissionDenied)
    ));
}
