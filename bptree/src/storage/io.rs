//! Block store abstraction.
//!
//! This module provides a `BlockStore` trait that abstracts over block-based
//! storage, allowing the tree to use real file I/O in production and an
//! in-memory store with fault injection in tests.
//!
//! # Design
//!
//! The trait is a minimal abstraction over the raw storage operations:
//! - Block read/write operations
//! - Appending zero-filled blocks
//! - Durability (`sync`) and truncation
//!
//! Everything above raw bytes (checksums, node images, metadata) lives in the
//! tree layer.

use crate::storage::block::{Block, BlockId};

/// Errors that can occur during block store operations.
#[derive(Debug)]
pub enum StoreError {
    /// I/O error, including short reads and writes.
    Io(std::io::Error),
    /// Block out of bounds.
    BlockOutOfBounds { block_id: BlockId, total_blocks: u64 },
    /// A block buffer did not match the store's block size.
    BlockSizeMismatch { expected: usize, actual: usize },
    /// The backing storage is not a whole number of blocks, or similar damage.
    Corruption(String),
    /// Injected fault for simulation.
    InjectedFault(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BlockOutOfBounds {
                block_id,
                total_blocks,
            } => write!(
                f,
                "block {block_id} out of bounds (total blocks: {total_blocks})"
            ),
            Self::BlockSizeMismatch { expected, actual } => {
                write!(f, "block size mismatch: expected {expected}, got {actual}")
            }
            Self::Corruption(msg) => write!(f, "corruption: {msg}"),
            Self::InjectedFault(msg) => write!(f, "injected fault: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// Abstraction over block-based storage operations.
///
/// # Implementation Notes
///
/// Implementations must ensure:
/// - `read_block` returns the last written content for a block
/// - `write_block` hands the whole block to the OS before returning; there is
///   no user-space write buffer to flush later
/// - `allocate_blocks` extends the storage with zero-filled blocks
/// - `sync` makes all previous writes durable
///
/// Failures are reported, never retried.
pub trait BlockStore {
    /// Size of every block in bytes.
    fn block_size(&self) -> usize;

    /// Number of blocks currently backed by storage.
    fn total_blocks(&self) -> u64;

    /// Read a block from storage.
    ///
    /// Returns an error if the block id is out of bounds.
    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StoreError>;

    /// Write a block to storage.
    ///
    /// Returns an error if the block id is out of bounds or the buffer has the
    /// wrong length.
    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StoreError>;

    /// Append `count` zero-filled blocks at the end of storage.
    ///
    /// Returns the block id of the first allocated block.
    fn allocate_blocks(&mut self, count: u64) -> Result<BlockId, StoreError>;

    /// Discard every block.
    fn truncate(&mut self) -> Result<(), StoreError>;

    /// Sync all previous writes to durable storage.
    fn sync(&mut self) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let e = StoreError::BlockOutOfBounds {
            block_id: 10,
            total_blocks: 5,
        };
        assert!(e.to_string().contains("block 10"));
        assert!(e.to_string().contains("total blocks: 5"));

        let e = StoreError::InjectedFault("test fault".to_string());
        assert!(e.to_string().contains("test fault"));
    }

    #[test]
    fn test_io_error_has_source() {
        let e = StoreError::from(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "short read",
        ));
        assert!(std::error::Error::source(&e).is_some());
    }
}
