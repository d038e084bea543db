//! In-memory block store for deterministic testing.
//!
//! This module provides an in-memory implementation of the `BlockStore`
//! trait with support for fault injection:
//! - Block-level read/write errors
//! - Byte-level corruption (bit flips) on read
//! - Sync failures

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::storage::block::{Block, BlockId};
use crate::storage::io::{BlockStore, StoreError};

/// Configuration for fault injection.
#[derive(Debug, Clone, Default)]
pub struct FaultConfig {
    /// Probability of a read error (0.0 - 1.0).
    pub read_error_rate: f64,
    /// Probability of a write error (0.0 - 1.0).
    pub write_error_rate: f64,
    /// Probability of a sync error (0.0 - 1.0).
    pub sync_error_rate: f64,
    /// Probability of block corruption on read (0.0 - 1.0).
    pub corruption_rate: f64,
}

impl FaultConfig {
    /// Create a fault config with no faults (for baseline testing).
    #[must_use]
    pub fn no_faults() -> Self {
        Self::default()
    }

    /// Every write fails.
    #[must_use]
    pub fn failing_writes() -> Self {
        Self {
            write_error_rate: 1.0,
            ..Self::default()
        }
    }

    /// Every read returns a corrupted block.
    #[must_use]
    pub fn corrupting_reads() -> Self {
        Self {
            corruption_rate: 1.0,
            ..Self::default()
        }
    }
}

/// Statistics about memory store operations.
#[derive(Debug, Default, Clone)]
pub struct MemoryStoreStats {
    /// Number of block reads.
    pub reads: u64,
    /// Number of block writes.
    pub writes: u64,
    /// Number of syncs.
    pub syncs: u64,
    /// Number of injected read errors.
    pub injected_read_errors: u64,
    /// Number of injected write errors.
    pub injected_write_errors: u64,
    /// Number of injected sync errors.
    pub injected_sync_errors: u64,
    /// Number of corrupted blocks returned.
    pub corrupted_reads: u64,
}

/// In-memory block store.
///
/// Blocks that were allocated but never written read back as zeros, like the
/// sparse tail of an extended file. The seeded RNG makes fault sequences
/// reproducible.
///
/// # Thread Safety
///
/// Not thread-safe; the tree is single-writer.
pub struct MemoryStore {
    blocks: HashMap<BlockId, Block>,
    total_blocks: u64,
    block_size: usize,
    fault_config: FaultConfig,
    rng: StdRng,
    stats: MemoryStoreStats,
}

impl MemoryStore {
    /// Create a fault-free memory store.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self::with_faults(block_size, 0, FaultConfig::no_faults())
    }

    /// Create a memory store with custom fault configuration.
    ///
    /// The seed ensures deterministic behavior - the same seed will
    /// produce the same sequence of faults.
    #[must_use]
    pub fn with_faults(block_size: usize, seed: u64, fault_config: FaultConfig) -> Self {
        Self {
            blocks: HashMap::new(),
            total_blocks: 0,
            block_size,
            fault_config,
            rng: StdRng::seed_from_u64(seed),
            stats: MemoryStoreStats::default(),
        }
    }

    /// Get the current statistics.
    #[must_use]
    pub const fn stats(&self) -> &MemoryStoreStats {
        &self.stats
    }

    /// Update the fault configuration.
    pub fn set_fault_config(&mut self, config: FaultConfig) {
        self.fault_config = config;
    }

    /// Check if a fault should be injected based on the given rate.
    fn should_inject_fault(&mut self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        self.rng.random::<f64>() < rate
    }

    /// Corrupt a block by flipping random bits.
    fn corrupt_block(&mut self, block: &mut Block) {
        let num_flips = self.rng.random_range(1..=8);
        for _ in 0..num_flips {
            let byte_offset = self.rng.random_range(0..self.block_size);
            let bit = self.rng.random_range(0..8u8);
            block.as_bytes_mut()[byte_offset] ^= 1 << bit;
        }
    }

    fn check_bounds(&self, block_id: BlockId) -> Result<(), StoreError> {
        if block_id >= self.total_blocks {
            return Err(StoreError::BlockOutOfBounds {
                block_id,
                total_blocks: self.total_blocks,
            });
        }
        Ok(())
    }
}

impl BlockStore for MemoryStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StoreError> {
        self.stats.reads += 1;
        self.check_bounds(block_id)?;

        if self.should_inject_fault(self.fault_config.read_error_rate) {
            self.stats.injected_read_errors += 1;
            return Err(StoreError::InjectedFault(
                "simulated read error".to_string(),
            ));
        }

        let mut block = self
            .blocks
            .get(&block_id)
            .cloned()
            .unwrap_or_else(|| Block::new(self.block_size));

        if self.should_inject_fault(self.fault_config.corruption_rate) {
            self.stats.corrupted_reads += 1;
            self.corrupt_block(&mut block);
        }

        Ok(block)
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StoreError> {
        self.stats.writes += 1;
        self.check_bounds(block_id)?;
        if block.len() != self.block_size {
            return Err(StoreError::BlockSizeMismatch {
                expected: self.block_size,
                actual: block.len(),
            });
        }

        if self.should_inject_fault(self.fault_config.write_error_rate) {
            self.stats.injected_write_errors += 1;
            return Err(StoreError::InjectedFault(
                "simulated write error".to_string(),
            ));
        }

        self.blocks.insert(block_id, block.clone());
        Ok(())
    }

    fn allocate_blocks(&mut self, count: u64) -> Result<BlockId, StoreError> {
        let first_new_block = self.total_blocks;
        self.total_blocks += count;
        Ok(first_new_block)
    }

    fn truncate(&mut self) -> Result<(), StoreError> {
        self.blocks.clear();
        self.total_blocks = 0;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.stats.syncs += 1;

        if self.should_inject_fault(self.fault_config.sync_error_rate) {
            self.stats.injected_sync_errors += 1;
            return Err(StoreError::InjectedFault(
                "simulated sync error".to_string(),
            ));
        }

        // Writes are already "durable" in memory
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_SIZE: usize = 256;

    #[test]
    fn test_memory_store_basic() {
        let mut store = MemoryStore::new(BLOCK_SIZE);

        let first = store.allocate_blocks(3).expect("allocate");
        assert_eq!(first, 0);
        assert_eq!(store.total_blocks(), 3);

        let mut block = Block::new(BLOCK_SIZE);
        block.write_bytes(10, b"test data");
        store.write_block(2, &block).expect("write");

        let read = store.read_block(2).expect("read");
        assert_eq!(read.read_bytes(10, 9), b"test data");

        // Unwritten blocks read back zeroed
        let fresh = store.read_block(1).expect("read fresh");
        assert!(fresh.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(store.stats().writes, 1);
        assert_eq!(store.stats().reads, 2);
    }

    #[test]
    fn test_memory_store_fault_injection() {
        let mut store = MemoryStore::with_faults(BLOCK_SIZE, 42, FaultConfig::failing_writes());
        store.allocate_blocks(1).expect("allocate");

        let result = store.write_block(0, &Block::new(BLOCK_SIZE));
        assert!(matches!(result, Err(StoreError::InjectedFault(_))));
        assert_eq!(store.stats().injected_write_errors, 1);

        store.set_fault_config(FaultConfig::no_faults());
        assert!(store.write_block(0, &Block::new(BLOCK_SIZE)).is_ok());
    }

    #[test]
    fn test_memory_store_deterministic_corruption() {
        let corrupted = |seed: u64| {
            let mut store =
                MemoryStore::with_faults(BLOCK_SIZE, seed, FaultConfig::corrupting_reads());
            store.allocate_blocks(1).expect("allocate");
            store.read_block(0).expect("read")
        };

        // Same seed, same flipped bits
        assert_eq!(corrupted(7), corrupted(7));
        assert!(corrupted(7).as_bytes().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_memory_store_out_of_bounds() {
        let mut store = MemoryStore::new(BLOCK_SIZE);
        store.allocate_blocks(2).expect("allocate");

        let result = store.read_block(5);
        assert!(matches!(result, Err(StoreError::BlockOutOfBounds { .. })));
    }

    #[test]
    fn test_memory_store_truncate() {
        let mut store = MemoryStore::new(BLOCK_SIZE);
        store.allocate_blocks(2).expect("allocate");
        store.truncate().expect("truncate");
        assert_eq!(store.total_blocks(), 0);
        assert!(store.read_block(0).is_err());
    }
}
