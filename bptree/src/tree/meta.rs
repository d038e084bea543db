//! Tree metadata block.
//!
//! The metadata occupies block 0 and records the layout the file was created
//! with, the allocation high-water mark, the root and sentinel ids, and the
//! entry count. It is rewritten after every structural change.

// Layout sizes are bounded by the block size, which fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::config::Layout;
use crate::storage::{Block, BlockId, BlockType, NULL_BLOCK};

/// Magic number identifying a tree file: "BPLUSTRE"
pub const MAGIC: [u8; 8] = *b"BPLUSTRE";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Block id of the metadata block.
pub const META_BLOCK: BlockId = 0;

/// Block id of the head sentinel leaf.
pub const HEAD_BLOCK: BlockId = 1;

/// Block id of the tail sentinel leaf.
pub const TAIL_BLOCK: BlockId = 2;

/// Metadata field offsets (after the 8-byte block header).
mod offsets {
    pub const MAGIC: usize = 8;
    pub const FORMAT_VERSION: usize = 16;
    pub const BLOCK_SIZE: usize = 20;
    pub const KEY_SIZE: usize = 24;
    pub const VALUE_SIZE: usize = 28;
    pub const LEAF_CAPACITY: usize = 32;
    pub const FANOUT: usize = 36;
    pub const BLOCK_COUNT: usize = 40;
    pub const ROOT: usize = 48;
    pub const HEAD: usize = 56;
    pub const TAIL: usize = 64;
    pub const ENTRY_COUNT: usize = 72;
    // 80..block_size: reserved
}

/// Persistent tree metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeMeta {
    /// Node geometry fixed at creation.
    pub layout: Layout,
    /// Number of allocated blocks, including block 0.
    pub block_count: u64,
    /// Root node, or `NULL_BLOCK` for an empty tree.
    pub root: BlockId,
    /// Head sentinel leaf.
    pub head: BlockId,
    /// Tail sentinel leaf.
    pub tail: BlockId,
    /// Number of entries stored in the tree.
    pub entry_count: u64,
}

impl TreeMeta {
    /// Metadata for a fresh file holding only block 0.
    #[must_use]
    pub const fn new(layout: Layout) -> Self {
        Self {
            layout,
            block_count: 1,
            root: NULL_BLOCK,
            head: HEAD_BLOCK,
            tail: TAIL_BLOCK,
            entry_count: 0,
        }
    }

    /// Serialize the metadata into a sealed block.
    #[must_use]
    pub fn encode(&self) -> Block {
        let mut block = Block::new(self.layout.block_size);

        block.write_bytes(offsets::MAGIC, &MAGIC);
        block.write_u32(offsets::FORMAT_VERSION, FORMAT_VERSION);
        block.write_u32(offsets::BLOCK_SIZE, self.layout.block_size as u32);
        block.write_u32(offsets::KEY_SIZE, self.layout.key_size as u32);
        block.write_u32(offsets::VALUE_SIZE, self.layout.value_size as u32);
        block.write_u32(offsets::LEAF_CAPACITY, self.layout.leaf_capacity as u32);
        block.write_u32(offsets::FANOUT, self.layout.fanout as u32);
        block.write_u64(offsets::BLOCK_COUNT, self.block_count);
        block.write_u64(offsets::ROOT, self.root);
        block.write_u64(offsets::HEAD, self.head);
        block.write_u64(offsets::TAIL, self.tail);
        block.write_u64(offsets::ENTRY_COUNT, self.entry_count);

        block.seal(BlockType::Meta);
        block
    }

    /// Deserialize metadata from a block whose checksum was already verified.
    pub fn decode(block: &Block) -> Result<Self, MetaError> {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(block.read_bytes(offsets::MAGIC, 8));
        if magic != MAGIC {
            return Err(MetaError::InvalidMagic(magic));
        }

        let format_version = block.read_u32(offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(MetaError::UnsupportedVersion(format_version));
        }

        let layout = Layout {
            block_size: block.read_u32(offsets::BLOCK_SIZE) as usize,
            key_size: block.read_u32(offsets::KEY_SIZE) as usize,
            value_size: block.read_u32(offsets::VALUE_SIZE) as usize,
            leaf_capacity: block.read_u32(offsets::LEAF_CAPACITY) as usize,
            fanout: block.read_u32(offsets::FANOUT) as usize,
        };

        Ok(Self {
            layout,
            block_count: block.read_u64(offsets::BLOCK_COUNT),
            root: block.read_u64(offsets::ROOT),
            head: block.read_u64(offsets::HEAD),
            tail: block.read_u64(offsets::TAIL),
            entry_count: block.read_u64(offsets::ENTRY_COUNT),
        })
    }

    /// Check that the stored layout matches the one the caller expects.
    pub fn check_layout(&self, expected: &Layout) -> Result<(), MetaError> {
        let fields = [
            ("block_size", self.layout.block_size, expected.block_size),
            ("key_size", self.layout.key_size, expected.key_size),
            ("value_size", self.layout.value_size, expected.value_size),
            (
                "leaf_capacity",
                self.layout.leaf_capacity,
                expected.leaf_capacity,
            ),
            ("fanout", self.layout.fanout, expected.fanout),
        ];

        for (field, stored, configured) in fields {
            if stored != configured {
                return Err(MetaError::LayoutMismatch {
                    field,
                    stored,
                    configured,
                });
            }
        }
        Ok(())
    }
}

/// Errors that can occur when reading the metadata block.
#[derive(Debug)]
pub enum MetaError {
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// The file was created with a different layout.
    LayoutMismatch {
        field: &'static str,
        stored: usize,
        configured: usize,
    },
}

impl std::fmt::Display for MetaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::LayoutMismatch {
                field,
                stored,
                configured,
            } => write!(
                f,
                "{field} mismatch: file has {stored}, configuration has {configured}"
            ),
        }
    }
}

impl std::error::Error for MetaError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;

    fn layout() -> Layout {
        Layout::derive(&TreeConfig::default().with_block_size(512), 8, 16).expect("derive")
    }

    #[test]
    fn test_new_meta_defaults() {
        let meta = TreeMeta::new(layout());
        assert_eq!(meta.block_count, 1);
        assert_eq!(meta.root, NULL_BLOCK);
        assert_eq!(meta.head, HEAD_BLOCK);
        assert_eq!(meta.tail, TAIL_BLOCK);
        assert_eq!(meta.entry_count, 0);
    }

    #[test]
    fn test_meta_roundtrip() {
        let mut meta = TreeMeta::new(layout());
        meta.block_count = 42;
        meta.root = 17;
        meta.entry_count = 1000;

        let block = meta.encode();
        assert_eq!(block.len(), 512);
        assert_eq!(
            block.header().expect("sealed").block_type,
            BlockType::Meta
        );

        let restored = TreeMeta::decode(&block).expect("decode");
        assert_eq!(restored, meta);
    }

    #[test]
    fn test_invalid_magic() {
        let mut block = TreeMeta::new(layout()).encode();
        block.write_bytes(offsets::MAGIC, b"NOTATREE");

        let result = TreeMeta::decode(&block);
        assert!(matches!(result, Err(MetaError::InvalidMagic(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut block = TreeMeta::new(layout()).encode();
        block.write_u32(offsets::FORMAT_VERSION, 99);

        let result = TreeMeta::decode(&block);
        assert!(matches!(result, Err(MetaError::UnsupportedVersion(99))));
    }

    #[test]
    fn test_layout_mismatch_names_field() {
        let meta = TreeMeta::new(layout());
        let other = Layout {
            leaf_capacity: 4,
            ..layout()
        };

        assert!(meta.check_layout(&layout()).is_ok());
        let error = meta.check_layout(&other).expect_err("should mismatch");
        assert!(matches!(
            error,
            MetaError::LayoutMismatch {
                field: "leaf_capacity",
                configured: 4,
                ..
            }
        ));
    }
}
