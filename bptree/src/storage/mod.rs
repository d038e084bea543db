//! Block storage for the B+ tree.
//!
//! A tree lives in a single file of fixed-size blocks:
//!
//! - Block 0: tree metadata
//! - Blocks 1-2: head and tail sentinel leaves
//! - Remaining blocks: index and leaf nodes, allocated append-only
//!
//! # Usage
//!
//! ```
//! use bptree::storage::{Block, BlockStore, BlockType, MemoryStore};
//!
//! let mut store = MemoryStore::new(512);
//! let id = store.allocate_blocks(1)?;
//!
//! let mut block = Block::new(512);
//! block.write_bytes(16, b"hello");
//! block.seal(BlockType::Leaf);
//! store.write_block(id, &block)?;
//!
//! assert_eq!(store.read_block(id)?.read_bytes(16, 5), b"hello");
//! # Ok::<(), bptree::storage::StoreError>(())
//! ```

mod block;
mod file;
mod io;
pub mod memory;

pub use block::{
    Block, BlockError, BlockHeader, BlockId, BlockType, DEFAULT_BLOCK_SIZE, NULL_BLOCK,
};
pub use file::FileStore;
pub use io::{BlockStore, StoreError};
pub use memory::{FaultConfig, MemoryStore};
