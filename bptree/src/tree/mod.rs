//! Disk-resident B+ tree.
//!
//! Module layout, leaf dependencies first:
//!
//! - `codec`: fixed-size key and value serialization
//! - `node`: node headers, index and leaf images
//! - `meta`: the metadata block
//! - `arena`: nodes addressed by block id, append-only allocation
//! - `navigate`: root-to-leaf descent with parent repair
//! - `split` / `merge`: overflow and underflow handling
//! - `cursor`: positions in the leaf chain
//! - `btree`: the public container
//! - `verify`: structural invariant checks
//!
//! # Usage
//!
//! ```
//! use bptree::config::TreeConfig;
//! use bptree::storage::MemoryStore;
//! use bptree::tree::BPlusTree;
//!
//! let config = TreeConfig::default().with_block_size(512);
//! let mut tree = BPlusTree::<u64, u64, _>::with_store(MemoryStore::new(512), &config)?;
//!
//! let (_, inserted) = tree.insert(5, 50)?;
//! assert!(inserted);
//! assert_eq!(tree.get(&5)?, Some(50));
//! assert_eq!(tree.len(), 1);
//! # Ok::<(), bptree::tree::TreeError>(())
//! ```

mod arena;
mod btree;
mod codec;
mod cursor;
mod error;
mod merge;
mod meta;
mod navigate;
mod node;
mod split;
mod verify;

#[cfg(test)]
mod tests;

pub use btree::{BPlusTree, Iter};
pub use codec::FixedSize;
pub use cursor::Cursor;
pub use error::TreeError;
pub use meta::{FORMAT_VERSION, MAGIC, MetaError};
pub use navigate::reconcile_parent;
pub use node::{CHILD_ID_SIZE, NODE_PAYLOAD_OFFSET, NodeError};
pub use verify::TreeStats;
