//! File-backed block store.
//!
//! This module handles reading and writing whole blocks to the tree file.
//! Block `id` lives at byte offset `id * block_size`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::storage::block::{Block, BlockId};
use crate::storage::io::{BlockStore, StoreError};

/// A tree file handle with low-level block I/O operations.
pub struct FileStore {
    file: File,
    path: PathBuf,
    block_size: usize,
    total_blocks: u64,
}

impl FileStore {
    /// Create a new, empty tree file at the given path.
    ///
    /// Returns an error if the file already exists.
    pub fn create(path: &Path, block_size: usize) -> Result<Self, StoreError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_size,
            total_blocks: 0,
        })
    }

    /// Open an existing tree file.
    ///
    /// The file length must be a whole number of blocks.
    pub fn open(path: &Path, block_size: usize) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        let len = file.metadata()?.len();
        let block_size_u64 = block_size as u64;
        if len % block_size_u64 != 0 {
            return Err(StoreError::Corruption(format!(
                "file length {len} is not a multiple of the block size {block_size}"
            )));
        }

        Ok(Self {
            file,
            path: path.to_path_buf(),
            block_size,
            total_blocks: len / block_size_u64,
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offset(&self, block_id: BlockId) -> u64 {
        block_id * self.block_size as u64
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

impl BlockStore for FileStore {
    fn block_size(&self) -> usize {
        self.block_size
    }

    fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn read_block(&mut self, block_id: BlockId) -> Result<Block, StoreError> {
        self.check_bounds(block_id)?;

        let mut block = Block::new(self.block_size);
        self.file.seek(SeekFrom::Start(self.offset(block_id)))?;
        self.file.read_exact(block.as_bytes_mut())?;

        Ok(block)
    }

    fn write_block(&mut self, block_id: BlockId, block: &Block) -> Result<(), StoreError> {
        self.check_bounds(block_id)?;
        if block.len() != self.block_size {
            return Err(StoreError::BlockSizeMismatch {
                expected: self.block_size,
                actual: block.len(),
            });
        }

        self.file.seek(SeekFrom::Start(self.offset(block_id)))?;
        self.file.write_all(block.as_bytes())?;
        self.file.flush()?;

        Ok(())
    }

    fn allocate_blocks(&mut self, count: u64) -> Result<BlockId, StoreError> {
        let first_new_block = self.total_blocks;

        // Extending the file zero-fills the new range
        let new_total = first_new_block + count;
        self.file.set_len(self.offset(new_total))?;
        self.total_blocks = new_total;

        Ok(first_new_block)
    }

    fn truncate(&mut self) -> Result<(), StoreError> {
        self.file.set_len(0)?;
        self.total_blocks = 0;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), StoreError> {
        self.file.sync_all().map_err(StoreError::Io)
    }
}
