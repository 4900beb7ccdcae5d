// tests/property/roundtrip_test.rs

//! Pagination and snapshot round-trip properties.

use drover::core::query::paginate;
use drover::core::store::{snapshot, StateStore};
use drover::core::types::NodePool;
use proptest::prelude::*;

fn keys() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set("[a-z]{1,8}", 0..50)
        .prop_map(|s| s.into_iter().collect())
}

proptest! {
    // Concatenating all pages with any page size equals the unpaginated
    // sequence.
    #[test]
    fn page_concatenation_is_identity(keys in keys(), per_page in 0u32..10) {
        let seq: Vec<(String, String)> = keys
            .iter()
            .map(|k| (k.clone(), format!("value-{k}")))
            .collect();

        let reference: Vec<String> = seq.iter().map(|(_, v)| v.clone()).collect();

        let mut collected = Vec::new();
        let mut token = String::new();
        loop {
            let page = paginate(seq.clone().into_iter(), per_page, &token, false);
            collected.extend(page.items);
            match page.next_token {
                Some(t) => token = t,
                None => break,
            }
        }
        prop_assert_eq!(collected, reference);
    }

    // The same law holds in reverse.
    #[test]
    fn reverse_page_concatenation_is_identity(keys in keys(), per_page in 1u32..10) {
        let mut seq: Vec<(String, String)> = keys
            .iter()
            .map(|k| (k.clone(), format!("value-{k}")))
            .collect();
        seq.reverse();
        let reference: Vec<String> = seq.iter().map(|(_, v)| v.clone()).collect();

        let mut collected = Vec::new();
        let mut token = String::new();
        loop {
            let page = paginate(seq.clone().into_iter(), per_page, &token, true);
            collected.extend(page.items);
            match page.next_token {
                Some(t) => token = t,
                None => break,
            }
        }
        prop_assert_eq!(collected, reference);
    }

    // Snapshot persistence round-trips arbitrary pool tables.
    #[test]
    fn snapshot_round_trips(names in proptest::collection::btree_set("[a-z0-9-]{1,16}", 0..30)) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.snap");

        let store = StateStore::new().unwrap();
        let mut txn = store.write_blocking(2);
        for name in &names {
            txn.upsert_node_pool(NodePool::new(name.clone())).unwrap();
        }
        txn.commit();
        snapshot::persist(&store, &path).unwrap();

        let restored = StateStore::new().unwrap();
        snapshot::restore(&restored, &path).unwrap();

        let before = store.snapshot();
        let after = restored.snapshot();
        let mut ws_a = drover::core::store::WatchSet::new();
        let mut ws_b = drover::core::store::WatchSet::new();
        let a: Vec<(String, u64)> = before
            .node_pools_by_prefix("", &mut ws_a)
            .unwrap()
            .map(|p| (p.name.clone(), p.modify_index))
            .collect();
        let b: Vec<(String, u64)> = after
            .node_pools_by_prefix("", &mut ws_b)
            .unwrap()
            .map(|p| (p.name.clone(), p.modify_index))
            .collect();
        prop_assert_eq!(a, b);
    }
}
