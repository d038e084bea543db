// Layout of a tree file:
// 1. Block 0: metadata (layout, block count, root, sentinels, entry count)
// 2. Blocks 1 and 2: head and tail sentinel leaves
// 3. Everything else: index and leaf nodes, allocated append-only
//
// Life of an insert:
// 1. Descend from the root, repairing stale parent links on the way
// 2. Place the entry into the leaf image
// 3. If the leaf overflows, split it and push a separator upward
// 4. Persist the metadata last
//
// System components:
//  - Block store (file or memory)
//  - Node codec and arena
//  - Split / merge engines
//  - Cursor and iterator

pub mod config;
pub mod storage;
pub mod tree;

pub use config::TreeConfig;
pub use tree::{BPlusTree, Cursor, FixedSize, TreeError, TreeStats};
