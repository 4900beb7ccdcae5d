// tests/property/consistency_test.rs

//! Store consistency properties.

use drover::core::store::{StateStore, WatchSet};
use drover::core::types::NodePool;
use proptest::prelude::*;
use std::collections::BTreeSet;

fn pool_name() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_-]{1,24}"
}

fn pool_names() -> impl Strategy<Value = Vec<String>> {
    proptest::collection::btree_set(pool_name(), 0..40).prop_map(|s| s.into_iter().collect())
}

fn store_with(names: &[String]) -> std::sync::Arc<StateStore> {
    let store = StateStore::new().unwrap();
    let mut txn = store.write_blocking(2);
    for name in names {
        txn.upsert_node_pool(NodePool::new(name.clone())).unwrap();
    }
    txn.commit();
    store
}

proptest! {
    // Every inserted record is retrievable through its index.
    #[test]
    fn insert_then_get_round_trips(names in pool_names()) {
        let store = store_with(&names);
        let snap = store.snapshot();
        for name in &names {
            let found = snap.node_pool_by_name(name).unwrap();
            prop_assert!(found.is_some(), "pool {name} lost");
            prop_assert_eq!(&found.unwrap().name, name);
        }
    }

    // Iteration yields records in lexicographic key order, exactly once.
    #[test]
    fn iteration_is_sorted_and_complete(names in pool_names()) {
        let store = store_with(&names);
        let snap = store.snapshot();
        let mut ws = WatchSet::new();
        let listed: Vec<String> = snap
            .node_pools_by_prefix("", &mut ws)
            .unwrap()
            .map(|p| p.name.clone())
            .collect();

        let mut expected: BTreeSet<String> = names.iter().cloned().collect();
        expected.insert("all".to_string());
        expected.insert("default".to_string());
        let expected: Vec<String> = expected.into_iter().collect();
        prop_assert_eq!(listed, expected);
    }

    // Reverse iteration is the exact mirror of forward iteration.
    #[test]
    fn reverse_mirrors_forward(names in pool_names()) {
        let store = store_with(&names);
        let snap = store.snapshot();
        let mut ws = WatchSet::new();
        let forward: Vec<String> = snap
            .node_pools_by_prefix("", &mut ws)
            .unwrap()
            .map(|p| p.name.clone())
            .collect();
        let mut backward: Vec<String> = snap
            .node_pools_by_prefix_reverse("", &mut ws)
            .unwrap()
            .map(|p| p.name.clone())
            .collect();
        backward.reverse();
        prop_assert_eq!(forward, backward);
    }

    // Deleting and re-inserting a record is observationally a single insert.
    #[test]
    fn insert_delete_insert_equals_insert(names in pool_names(), victim_idx in 0usize..40) {
        prop_assume!(!names.is_empty());
        let victim = names[victim_idx % names.len()].clone();

        let store = store_with(&names);
        let mut txn = store.write_blocking(3);
        txn.delete_node_pool(&victim).unwrap();
        txn.commit();
        let mut txn = store.write_blocking(4);
        txn.upsert_node_pool(NodePool::new(victim.clone())).unwrap();
        txn.commit();

        let snap = store.snapshot();
        let found = snap.node_pool_by_name(&victim).unwrap().unwrap();
        prop_assert_eq!(&found.name, &victim);
        prop_assert_eq!(found.create_index, 4);

        // The rest of the table is untouched.
        for name in &names {
            prop_assert!(snap.node_pool_by_name(name).unwrap().is_some());
        }
    }
}
