//! Whole-tree tests: scenarios, randomized workloads, persistence and faults.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tempfile::tempdir;

use super::*;
use crate::config::TreeConfig;
use crate::storage::{BlockError, BlockStore, FaultConfig, MemoryStore, NULL_BLOCK, StoreError};

const BLOCK_SIZE: usize = 512;

type MemTree = BPlusTree<u64, u64, MemoryStore>;

fn small_config(leaf_capacity: usize, fanout: usize) -> TreeConfig {
    TreeConfig::default()
        .with_block_size(BLOCK_SIZE)
        .with_leaf_capacity(leaf_capacity)
        .with_fanout(fanout)
}

fn memory_tree(leaf_capacity: usize, fanout: usize) -> MemTree {
    BPlusTree::with_store(
        MemoryStore::new(BLOCK_SIZE),
        &small_config(leaf_capacity, fanout),
    )
    .expect("create tree")
}

fn collect<S: BlockStore>(tree: &mut BPlusTree<u64, u64, S>) -> Vec<(u64, u64)> {
    tree.iter()
        .collect::<Result<Vec<_>, _>>()
        .expect("iterate")
}

/// Keys visited by retreating from `end()` until the head sentinel.
fn keys_backward<S: BlockStore>(tree: &mut BPlusTree<u64, u64, S>) -> Vec<u64> {
    let mut cursor = tree.end().expect("end");
    let mut keys = Vec::new();
    loop {
        tree.retreat(&mut cursor).expect("retreat");
        match tree.entry(&cursor) {
            Ok((key, _)) => keys.push(key),
            Err(TreeError::InvalidCursor { .. }) => break,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    keys.reverse();
    keys
}

fn keys_forward<S: BlockStore>(tree: &mut BPlusTree<u64, u64, S>) -> Vec<u64> {
    let mut cursor = tree.begin().expect("begin");
    let end = tree.end().expect("end");
    let mut keys = Vec::new();
    while cursor != end {
        keys.push(tree.entry(&cursor).expect("entry").0);
        tree.advance(&mut cursor).expect("advance");
    }
    keys
}

#[test]
fn test_insert_into_empty_tree() {
    let mut tree = memory_tree(4, 4);
    assert!(tree.is_empty());
    assert_eq!(tree.height().expect("height"), 0);

    let (cursor, inserted) = tree.insert(5, 50).expect("insert");
    assert!(inserted);
    assert_eq!(tree.entry(&cursor).expect("entry"), (5, 50));

    let found = tree.find(&5).expect("find");
    assert_eq!(found, cursor);
    assert_eq!(tree.entry(&found).expect("entry"), (5, 50));
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.height().expect("height"), 1);
}

#[test]
fn test_duplicate_insert_reports_existing_entry() {
    let mut tree = memory_tree(4, 4);
    for key in 0..20 {
        tree.insert(key, key * 10).expect("insert");
    }

    let (cursor, inserted) = tree.insert(7, 999).expect("insert duplicate");
    assert!(!inserted);
    assert_eq!(tree.entry(&cursor).expect("entry"), (7, 70));
    assert_eq!(tree.get(&7).expect("get"), Some(70));
    assert_eq!(tree.len(), 20);
}

#[test]
fn test_sequential_inserts_grow_through_root_splits() {
    let mut tree = memory_tree(4, 4);
    let mut height = 0;
    let mut root = NULL_BLOCK;

    for key in 1..=2000 {
        let (cursor, inserted) = tree.insert(key, key * 2).expect("insert");
        assert!(inserted);
        assert_eq!(tree.entry(&cursor).expect("entry"), (key, key * 2));

        let new_height = tree.height().expect("height");
        let new_root = tree.arena.meta().root;
        assert!(new_height >= height, "height never shrinks on insert");
        if new_height > height {
            assert_ne!(new_root, root, "height only grows with a new root");
        }
        height = new_height;
        root = new_root;
    }

    let expected: Vec<(u64, u64)> = (1..=2000).map(|k| (k, k * 2)).collect();
    assert_eq!(collect(&mut tree), expected);
    assert_eq!(tree.len(), 2000);

    let stats = tree.check_invariants().expect("invariants");
    assert_eq!(stats.entries, 2000);
    assert_eq!(stats.height, height);
    assert_eq!(stats.stale_parent_links, 0);
}

#[test]
fn test_erase_even_keys_keeps_floors() {
    let mut tree = memory_tree(4, 4);
    for key in 1..=100 {
        tree.insert(key, key).expect("insert");
    }

    for key in (2..=100).step_by(2) {
        assert!(tree.erase(&key).expect("erase"));
        tree.check_invariants().expect("invariants after erase");
    }

    let expected: Vec<(u64, u64)> = (1..=100).step_by(2).map(|k| (k, k)).collect();
    assert_eq!(collect(&mut tree), expected);
    assert_eq!(tree.len(), 50);
    assert!(!tree.erase(&2).expect("erase absent"));
}

#[test]
fn test_erase_to_empty_then_reuse() {
    let mut tree = memory_tree(4, 4);
    for key in 1..=50 {
        tree.insert(key, key).expect("insert");
    }
    for key in 1..50 {
        assert!(tree.erase(&key).expect("erase"));
    }
    assert_eq!(tree.len(), 1);
    assert_eq!(tree.height().expect("height"), 1);

    assert!(tree.erase(&50).expect("erase last"));
    assert!(tree.is_empty());
    assert_eq!(tree.height().expect("height"), 0);
    assert_eq!(tree.begin().expect("begin"), tree.end().expect("end"));
    assert_eq!(tree.get(&50).expect("get"), None);
    assert_eq!(tree.check_invariants().expect("invariants"), TreeStats::default());

    // Behaves like a fresh tree
    tree.insert(9, 90).expect("insert after empty");
    assert_eq!(collect(&mut tree), vec![(9, 90)]);
    assert_eq!(keys_backward(&mut tree), vec![9]);
    tree.check_invariants().expect("invariants");
}

#[test]
fn test_random_workloads_match_model() {
    for (seed, leaf_capacity, fanout) in [(1, 3, 3), (2, 4, 5), (3, 5, 4), (4, 7, 8)] {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tree = memory_tree(leaf_capacity, fanout);
        let mut model = BTreeMap::new();

        for step in 0..4000 {
            let key = rng.random_range(0..400u64);
            if rng.random::<f64>() < 0.6 {
                let value = rng.random::<u64>();
                let (cursor, inserted) = tree.insert(key, value).expect("insert");
                assert_eq!(inserted, !model.contains_key(&key));
                model.entry(key).or_insert(value);
                assert_eq!(tree.entry(&cursor).expect("entry"), (key, model[&key]));
            } else {
                let erased = tree.erase(&key).expect("erase");
                assert_eq!(erased, model.remove(&key).is_some());
            }
            assert_eq!(tree.len(), model.len());

            if step % 200 == 0 {
                tree.check_invariants().expect("invariants");
            }
        }

        let expected: Vec<(u64, u64)> = model.iter().map(|(&k, &v)| (k, v)).collect();
        assert_eq!(collect(&mut tree), expected);
        let stats = tree.check_invariants().expect("invariants");
        assert_eq!(stats.entries, model.len() as u64);
    }
}

#[test]
fn test_random_order_inserts_iterate_sorted() {
    let mut rng = StdRng::seed_from_u64(0xB7EE);
    let mut tree =
        BPlusTree::<i64, u32, _>::with_store(MemoryStore::new(BLOCK_SIZE), &small_config(5, 6))
            .expect("create tree");

    let mut keys: Vec<i64> = (-500..500).collect();
    keys.shuffle(&mut rng);
    for &key in &keys {
        tree.insert(key, key.unsigned_abs() as u32).expect("insert");
    }

    let iterated: Vec<i64> = tree
        .iter()
        .map(|entry| entry.expect("entry").0)
        .collect();
    assert_eq!(iterated, (-500..500).collect::<Vec<_>>());
    tree.check_invariants().expect("invariants");
}

#[test]
fn test_leaf_split_keeps_floor_with_odd_capacity() {
    let mut tree = memory_tree(5, 4);
    for key in 1..=6 {
        tree.insert(key, key).expect("insert");
    }

    // Six entries split three and three, both at the floor.
    let first = tree.begin().expect("begin");
    assert_eq!(first.leaf.size, 3);
    let last = tree.find(&6).expect("find");
    assert_eq!(last.leaf.size, 3);
    assert_eq!(last.slot(), 2);
    assert_ne!(first.leaf_id(), last.leaf_id());

    let stats = tree.check_invariants().expect("invariants");
    assert_eq!(stats.leaves, 2);
    assert_eq!(stats.height, 2);
}

#[test]
fn test_leaf_split_point_with_even_capacity() {
    let mut tree = memory_tree(4, 4);
    for key in 1..=4 {
        tree.insert(key, key).expect("insert");
    }
    let (cursor, inserted) = tree.insert(0, 0).expect("insert");
    assert!(inserted);
    assert_eq!(cursor.slot(), 0);
    assert_eq!(cursor.leaf.size, 2);

    let right = tree.find(&2).expect("find");
    assert_eq!(right.slot(), 0);
    assert_eq!(right.leaf.size, 3);
    tree.check_invariants().expect("invariants");
}

#[test]
fn test_chain_walks_agree_both_ways() {
    let mut tree = memory_tree(3, 3);
    for key in (0..300).rev() {
        tree.insert(key * 3, key).expect("insert");
    }
    for key in (0..300).filter(|k| k % 7 == 0) {
        tree.erase(&(key * 3)).expect("erase");
    }

    let forward = keys_forward(&mut tree);
    assert_eq!(forward.len(), tree.len());
    assert!(forward.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(keys_backward(&mut tree), forward);
}

#[test]
fn test_cursor_stepping_at_the_edges() {
    let mut tree = memory_tree(4, 4);
    for key in 1..=10 {
        tree.insert(key, key).expect("insert");
    }

    let end = tree.end().expect("end");
    let mut cursor = end;
    assert!(matches!(
        tree.advance(&mut cursor),
        Err(TreeError::InvalidCursor { .. })
    ));
    assert!(matches!(
        tree.entry(&end),
        Err(TreeError::InvalidCursor { .. })
    ));

    tree.retreat(&mut cursor).expect("retreat from end");
    assert_eq!(tree.entry(&cursor).expect("last"), (10, 10));

    let mut cursor = tree.begin().expect("begin");
    assert_eq!(tree.entry(&cursor).expect("first"), (1, 1));
    tree.retreat(&mut cursor).expect("retreat onto head");
    assert!(matches!(
        tree.entry(&cursor),
        Err(TreeError::InvalidCursor { .. })
    ));
    assert!(matches!(
        tree.retreat(&mut cursor),
        Err(TreeError::InvalidCursor { .. })
    ));

    // Forward again from before-the-beginning
    tree.advance(&mut cursor).expect("advance off head");
    assert_eq!(cursor, tree.begin().expect("begin"));
}

#[test]
fn test_find_missing_key_returns_end() {
    let mut tree = memory_tree(4, 4);
    assert_eq!(tree.find(&3).expect("find"), tree.end().expect("end"));

    tree.insert(1, 1).expect("insert");
    tree.insert(5, 5).expect("insert");
    assert_eq!(tree.find(&3).expect("find"), tree.end().expect("end"));
}

#[test]
fn test_set_value_through_cursor() {
    let mut tree = memory_tree(4, 4);
    for key in 0..30 {
        tree.insert(key, 0).expect("insert");
    }

    let cursor = tree.find(&17).expect("find");
    tree.set_value(&cursor, 1700).expect("set value");
    assert_eq!(tree.get(&17).expect("get"), Some(1700));
    assert_eq!(tree.len(), 30);

    let end = tree.end().expect("end");
    assert!(matches!(
        tree.set_value(&end, 1),
        Err(TreeError::InvalidCursor { .. })
    ));
}

#[test]
fn test_at_and_count() {
    let mut tree = memory_tree(4, 4);
    assert!(matches!(tree.at(&1), Err(TreeError::EmptyContainer)));

    tree.insert(1, 11).expect("insert");
    assert_eq!(tree.at(&1).expect("at"), 11);
    assert!(matches!(tree.at(&2), Err(TreeError::KeyNotFound)));
    assert_eq!(tree.count(&1).expect("count"), 1);
    assert_eq!(tree.count(&2).expect("count"), 0);
    assert!(tree.contains(&1).expect("contains"));
}

#[test]
fn test_descent_repairs_stale_parent_links() {
    let mut tree = memory_tree(3, 3);
    for key in 0..400 {
        tree.insert(key, key).expect("insert");
    }
    for key in (0..400).filter(|k| k % 3 != 0) {
        tree.erase(&key).expect("erase");
    }
    tree.check_invariants().expect("invariants");

    // Every node lies on the path to at least one surviving key
    for key in (0..400).step_by(3) {
        assert_eq!(tree.get(&key).expect("get"), Some(key));
    }
    let stats = tree.check_invariants().expect("invariants");
    assert_eq!(stats.stale_parent_links, 0);
}

#[test]
fn test_clear_resets_file() {
    let mut tree = memory_tree(4, 4);
    for key in 0..100 {
        tree.insert(key, key).expect("insert");
    }

    tree.clear().expect("clear");
    assert!(tree.is_empty());
    assert_eq!(tree.store().total_blocks(), 3);
    assert!(collect(&mut tree).is_empty());

    tree.insert(42, 1).expect("insert after clear");
    assert_eq!(collect(&mut tree), vec![(42, 1)]);
    tree.check_invariants().expect("invariants");
}

#[test]
fn test_default_layout_handles_many_keys() {
    let config = TreeConfig::default();
    let mut tree =
        BPlusTree::<u64, u64, _>::with_store(MemoryStore::new(config.block_size), &config)
            .expect("create tree");

    for key in (0..20_000).rev() {
        tree.insert(key, key + 1).expect("insert");
    }
    assert_eq!(tree.height().expect("height"), 2);
    assert_eq!(tree.get(&12_345).expect("get"), Some(12_346));
    let stats = tree.check_invariants().expect("invariants");
    assert_eq!(stats.entries, 20_000);
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("tree.bpt");
    let config = small_config(4, 5);

    {
        let mut tree = BPlusTree::<u64, u64>::open(&path, &config).expect("create");
        assert_eq!(tree.path(), path.as_path());
        for key in 0..500 {
            tree.insert(key, key * key).expect("insert");
        }
        for key in (0..500).step_by(5) {
            tree.erase(&key).expect("erase");
        }
        tree.close().expect("close");
    }

    {
        let mut tree = BPlusTree::<u64, u64>::open(&path, &config).expect("reopen");
        assert_eq!(tree.len(), 400);
        let expected: Vec<(u64, u64)> = (0..500)
            .filter(|k| k % 5 != 0)
            .map(|k| (k, k * k))
            .collect();
        assert_eq!(collect(&mut tree), expected);
        tree.check_invariants().expect("invariants");
    }
}

#[test]
fn test_reopen_with_other_layout_is_rejected() {
    let dir = tempdir().expect("create temp dir");
    let path = dir.path().join("tree.bpt");

    let mut tree = BPlusTree::<u64, u64>::open(&path, &small_config(4, 4)).expect("create");
    tree.insert(1, 1).expect("insert");
    tree.close().expect("close");

    let result = BPlusTree::<u64, u64>::open(&path, &small_config(5, 4));
    assert!(matches!(
        result,
        Err(TreeError::Meta(MetaError::LayoutMismatch {
            field: "leaf_capacity",
            ..
        }))
    ));

    let result = BPlusTree::<u32, u64>::open(&path, &small_config(4, 4));
    assert!(matches!(
        result,
        Err(TreeError::Meta(MetaError::LayoutMismatch {
            field: "key_size",
            ..
        }))
    ));
}

#[test]
fn test_store_block_size_must_match() {
    let result = MemTree::with_store(MemoryStore::new(1024), &small_config(4, 4));
    assert!(matches!(
        result,
        Err(TreeError::Store(StoreError::BlockSizeMismatch { .. }))
    ));
}

#[test]
fn test_corrupted_leaf_is_detected() {
    let mut tree = memory_tree(4, 4);
    for key in 0..3 {
        tree.insert(key, key).expect("insert");
    }
    let leaf = tree.find(&1).expect("find").leaf_id();
    let mut store = tree.into_store().expect("into store");

    let mut block = store.read_block(leaf).expect("read");
    block.write_u8(NODE_PAYLOAD_OFFSET + 3, 0xAB);
    store.write_block(leaf, &block).expect("write");

    let mut tree = MemTree::with_store(store, &small_config(4, 4)).expect("reopen");
    assert!(matches!(
        tree.get(&1),
        Err(TreeError::Block(BlockError::ChecksumMismatch { .. }))
    ));
}

#[test]
fn test_injected_faults_surface_as_store_errors() {
    let mut tree = memory_tree(4, 4);
    for key in 0..10 {
        tree.insert(key, key).expect("insert");
    }

    tree.store_mut()
        .set_fault_config(FaultConfig::failing_writes());
    assert!(matches!(
        tree.insert(100, 100),
        Err(TreeError::Store(StoreError::InjectedFault(_)))
    ));

    tree.store_mut().set_fault_config(FaultConfig {
        read_error_rate: 1.0,
        ..FaultConfig::no_faults()
    });
    assert!(matches!(
        tree.get(&3),
        Err(TreeError::Store(StoreError::InjectedFault(_)))
    ));
    assert!(matches!(tree.iter().next(), Some(Err(TreeError::Store(_)))));

    tree.store_mut().set_fault_config(FaultConfig::no_faults());
    assert_eq!(tree.get(&3).expect("get"), Some(3));
}

#[test]
fn test_iterator_stops_after_error() {
    let mut tree = memory_tree(4, 4);
    tree.insert(1, 1).expect("insert");
    tree.store_mut()
        .set_fault_config(FaultConfig::corrupting_reads());

    let mut iter = tree.iter();
    assert!(matches!(iter.next(), Some(Err(_))));
    assert!(iter.next().is_none());
}
