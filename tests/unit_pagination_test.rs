// tests/unit_pagination_test.rs

//! Pagination laws over the job list endpoint: token format, filter
//! composition, concatenation, reverse, and boundary behaviors.

mod common;

use drover::core::query::QueryOptions;
use drover::core::raft::Command;
use drover::core::rpc::NodePoolEndpoint;
use std::sync::Arc;
use std::time::Duration;

use common::{job, pool, start_server, TestServer};

async fn seed_jobs(ts: &TestServer) {
    ts.state
        .raft
        .apply(Command::UpsertNodePools(vec![pool("dev-1")]))
        .await
        .unwrap();
    // 13 jobs across two namespaces, all in pool dev-1.
    let mut jobs = Vec::new();
    for i in 1..=7 {
        jobs.push(job("apps", &format!("job-{i:02}"), "dev-1"));
    }
    for i in 8..=13 {
        jobs.push(job("batch", &format!("job-{i:02}"), "dev-1"));
    }
    for j in jobs {
        ts.state
            .raft
            .apply(Command::UpsertJob(Box::new(j)))
            .await
            .unwrap();
    }
}

fn wildcard_opts() -> QueryOptions {
    QueryOptions {
        namespace: "*".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn filtered_pages_concatenate_to_unpaginated_result() {
    let ts = start_server().await;
    seed_jobs(&ts).await;
    let endpoint = NodePoolEndpoint::new(ts.state.clone());
    let ctx = ts.root_ctx();

    let filter = r#"Name matches "job-0[12345]""#;

    // Unpaginated reference.
    let mut opts = wildcard_opts();
    opts.filter = filter.to_string();
    let (all, meta) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
    let reference: Vec<String> = all
        .iter()
        .map(|j| format!("{}.{}", j.namespace, j.id))
        .collect();
    assert_eq!(
        reference,
        vec!["apps.job-01", "apps.job-02", "apps.job-03", "apps.job-04", "apps.job-05"]
    );
    assert!(meta.next_token.is_empty());

    // Page size 3: two pages, the second page's token names the record
    // immediately after the last returned one.
    let mut opts = wildcard_opts();
    opts.filter = filter.to_string();
    opts.per_page = 3;
    let (page1, meta1) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
    assert_eq!(page1.len(), 3);
    assert_eq!(meta1.next_token, "apps.job-04");

    opts.next_token = meta1.next_token.clone();
    let (page2, meta2) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
    assert_eq!(page2.len(), 2);
    assert!(meta2.next_token.is_empty());

    let concatenated: Vec<String> = page1
        .iter()
        .chain(page2.iter())
        .map(|j| format!("{}.{}", j.namespace, j.id))
        .collect();
    assert_eq!(concatenated, reference);
}

#[tokio::test]
async fn per_page_zero_returns_everything() {
    let ts = start_server().await;
    seed_jobs(&ts).await;
    let endpoint = NodePoolEndpoint::new(ts.state.clone());
    let ctx = ts.root_ctx();

    let (all, meta) = endpoint
        .list_jobs(&ctx, "dev-1", &wildcard_opts())
        .await
        .unwrap();
    assert_eq!(all.len(), 13);
    assert!(meta.next_token.is_empty());
}

#[tokio::test]
async fn stale_token_resumes_at_next_existing_key() {
    let ts = start_server().await;
    seed_jobs(&ts).await;
    let endpoint = NodePoolEndpoint::new(ts.state.clone());
    let ctx = ts.root_ctx();

    // Delete the job a page token would point at; the next page resumes at
    // the next existing key past it.
    ts.state
        .raft
        .apply(Command::DeleteJob {
            namespace: "apps".to_string(),
            id: "job-04".to_string(),
        })
        .await
        .unwrap();

    let mut opts = wildcard_opts();
    opts.per_page = 3;
    opts.next_token = "apps.job-04".to_string();
    let (page, _) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
    let ids: Vec<&str> = page.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec!["job-05", "job-06", "job-07"]);
}

#[tokio::test]
async fn reverse_is_the_exact_mirror() {
    let ts = start_server().await;
    seed_jobs(&ts).await;
    let endpoint = NodePoolEndpoint::new(ts.state.clone());
    let ctx = ts.root_ctx();

    let (forward, _) = endpoint
        .list_jobs(&ctx, "dev-1", &wildcard_opts())
        .await
        .unwrap();
    let mut opts = wildcard_opts();
    opts.reverse = true;
    let (backward, _) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();

    let fwd: Vec<String> = forward.iter().map(|j| j.id.clone()).collect();
    let mut bwd: Vec<String> = backward.iter().map(|j| j.id.clone()).collect();
    bwd.reverse();
    assert_eq!(fwd, bwd);
}

#[tokio::test]
async fn reverse_pagination_tokens_walk_backwards() {
    let ts = start_server().await;
    seed_jobs(&ts).await;
    let endpoint = NodePoolEndpoint::new(ts.state.clone());
    let ctx = ts.root_ctx();

    let mut opts = wildcard_opts();
    opts.reverse = true;
    opts.per_page = 5;

    let mut collected: Vec<String> = Vec::new();
    loop {
        let (page, meta) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
        collected.extend(page.iter().map(|j| j.id.clone()));
        if meta.next_token.is_empty() {
            break;
        }
        opts.next_token = meta.next_token;
    }
    let expected: Vec<String> = (1..=13).rev().map(|i| format!("job-{i:02}")).collect();
    assert_eq!(collected, expected);
}

#[tokio::test]
async fn namespace_scoping_composes_with_pagination() {
    let ts = start_server().await;
    seed_jobs(&ts).await;
    let endpoint = NodePoolEndpoint::new(ts.state.clone());
    let ctx = ts.root_ctx();

    let mut opts = QueryOptions {
        namespace: "batch".to_string(),
        per_page: 4,
        ..Default::default()
    };
    let (page1, meta) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
    assert_eq!(page1.len(), 4);
    assert!(page1.iter().all(|j| j.namespace == "batch"));
    opts.next_token = meta.next_token;
    let (page2, meta) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
    assert_eq!(page2.len(), 2);
    assert!(meta.next_token.is_empty());
}

#[tokio::test]
async fn blocking_and_pagination_share_the_endpoint() {
    // Pagination options do not break the blocking path: a page request
    // with a satisfied floor returns immediately.
    let ts = start_server().await;
    seed_jobs(&ts).await;
    let endpoint = Arc::new(NodePoolEndpoint::new(ts.state.clone()));
    let ctx = ts.root_ctx();

    let mut opts = wildcard_opts();
    opts.per_page = 3;
    opts.min_query_index = 1;
    opts.max_query_time = Some(Duration::from_secs(5));
    let started = tokio::time::Instant::now();
    let (page, _) = endpoint.list_jobs(&ctx, "dev-1", &opts).await.unwrap();
    assert_eq!(page.len(), 3);
    assert!(started.elapsed() < Duration::from_secs(1));
}
