//! Block types and constants for the block store.
//!
//! A block is the fixed-size unit of file storage and of I/O. Every block
//! starts with an 8-byte [`BlockHeader`] carrying its type and a CRC32 over
//! the whole block.

/// Default block size in bytes (4KB).
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// A block identifier. Block `id` lives at byte offset `id * block_size`.
pub type BlockId = u64;

/// Sentinel id used wherever a link is inapplicable.
///
/// Block 0 always holds the tree metadata, so it never names a node.
pub const NULL_BLOCK: BlockId = 0;

/// Block type identifiers stored in block headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    /// Tree metadata (block 0 only)
    Meta = 0x01,
    /// B+ tree index node
    Index = 0x02,
    /// B+ tree leaf node (including the head/tail sentinels)
    Leaf = 0x03,
}

impl TryFrom<u8> for BlockType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Meta),
            0x02 => Ok(Self::Index),
            0x03 => Ok(Self::Leaf),
            _ => Err(value),
        }
    }
}

/// Common header present at the start of every block.
///
/// Layout:
/// - `block_type`: 1 byte
/// - `flags`: 1 byte
/// - `checksum`: 4 bytes (CRC32)
/// - `reserved`: 2 bytes
///
/// Total: 8 bytes
#[derive(Debug, Copy, Clone)]
pub struct BlockHeader {
    pub block_type: BlockType,
    pub flags: u8,
    pub checksum: u32,
}

impl BlockHeader {
    /// Size of the block header in bytes.
    pub const SIZE: usize = 8;

    /// Byte range of the checksum field.
    const CHECKSUM_RANGE: std::ops::Range<usize> = 2..6;

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.block_type as u8;
        buf[1] = self.flags;
        buf[Self::CHECKSUM_RANGE].copy_from_slice(&self.checksum.to_le_bytes());
        // bytes 6-7 reserved
        buf
    }

    /// Deserialize a header from bytes.
    pub fn from_bytes(bytes: [u8; Self::SIZE]) -> Result<Self, BlockError> {
        let block_type = BlockType::try_from(bytes[0]).map_err(BlockError::InvalidBlockType)?;
        let flags = bytes[1];
        let checksum = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]);

        Ok(Self {
            block_type,
            flags,
            checksum,
        })
    }
}

/// A raw block buffer.
///
/// The length is fixed when the block is created and always equals the
/// block size of the store it came from.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    data: Box<[u8]>,
}

impl Block {
    /// Create a new zeroed block.
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size].into_boxed_slice(),
        }
    }

    /// Create a block from raw bytes.
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: bytes.into_boxed_slice(),
        }
    }

    /// Size of the block in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the block has zero length. Never true for store-backed blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get the raw block data.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable access to the raw block data.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read bytes at a specific offset.
    #[must_use]
    pub fn read_bytes(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    /// Write bytes at a specific offset.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// Read a u8 at the given offset.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        self.data[offset]
    }

    /// Write a u8 at the given offset.
    pub fn write_u8(&mut self, offset: usize, value: u8) {
        self.data[offset] = value;
    }

    /// Read a u32 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ])
    }

    /// Write a u32 (little-endian) at the given offset.
    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    /// Read a u64 (little-endian) at the given offset.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&self.data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }

    /// Write a u64 (little-endian) at the given offset.
    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.data[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
    }

    /// Read and validate the block header, including the checksum.
    pub fn header(&self) -> Result<BlockHeader, BlockError> {
        let mut bytes = [0u8; BlockHeader::SIZE];
        bytes.copy_from_slice(&self.data[..BlockHeader::SIZE]);
        let header = BlockHeader::from_bytes(bytes)?;

        let actual = self.compute_checksum();
        if header.checksum != actual {
            return Err(BlockError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }
        Ok(header)
    }

    /// Stamp the block header with `block_type` and a fresh checksum.
    ///
    /// Must be the last mutation before the block is written.
    pub fn seal(&mut self, block_type: BlockType) {
        self.write_u8(0, block_type as u8);
        self.write_u8(1, 0);
        let checksum = self.compute_checksum();
        let header = BlockHeader {
            block_type,
            flags: 0,
            checksum,
        };
        self.write_bytes(0, &header.to_bytes());
    }

    /// Compute CRC32 checksum of the block data (excluding the checksum field itself).
    #[must_use]
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&self.data[0..2]); // block_type + flags
        hasher.update(&[0u8; 4]); // zero out checksum field
        hasher.update(&self.data[6..]); // rest of block
        hasher.finalize()
    }
}

impl std::fmt::Debug for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Block")
            .field("len", &self.data.len())
            .field("first_16_bytes", &&self.data[..self.data.len().min(16)])
            .finish_non_exhaustive()
    }
}

/// Errors related to block decoding.
#[derive(Debug)]
pub enum BlockError {
    /// Invalid block type byte.
    InvalidBlockType(u8),
    /// Checksum mismatch.
    ChecksumMismatch { expected: u32, actual: u32 },
}

impl std::fmt::Display for BlockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidBlockType(v) => write!(f, "invalid block type: 0x{v:02x}"),
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected {expected}, got {actual}")
            }
        }
    }
}

impl std::error::Error for BlockError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_header_roundtrip() {
        let header = BlockHeader {
            block_type: BlockType::Leaf,
            flags: 0x42,
            checksum: 0xDEAD_BEEF,
        };

        let bytes = header.to_bytes();
        let restored = BlockHeader::from_bytes(bytes).expect("should parse");

        assert_eq!(restored.block_type, BlockType::Leaf);
        assert_eq!(restored.flags, 0x42);
        assert_eq!(restored.checksum, 0xDEAD_BEEF);
    }

    #[test]
    fn test_block_read_write() {
        let mut block = Block::new(DEFAULT_BLOCK_SIZE);

        block.write_u8(0, 0xFF);
        assert_eq!(block.read_u8(0), 0xFF);

        block.write_u32(100, 0x1234_5678);
        assert_eq!(block.read_u32(100), 0x1234_5678);

        block.write_u64(200, 0x0102_0304_0506_0708);
        assert_eq!(block.read_u64(200), 0x0102_0304_0506_0708);

        block.write_bytes(500, b"hello");
        assert_eq!(block.read_bytes(500, 5), b"hello");
    }

    #[test]
    fn test_sealed_block_verifies() {
        let mut block = Block::new(256);
        block.write_u64(64, 77);
        block.seal(BlockType::Index);

        let header = block.header().expect("sealed block should verify");
        assert_eq!(header.block_type, BlockType::Index);
    }

    #[test]
    fn test_corrupted_block_detected() {
        let mut block = Block::new(256);
        block.write_u64(64, 77);
        block.seal(BlockType::Leaf);

        block.write_u8(100, 0xAB);
        assert!(matches!(
            block.header(),
            Err(BlockError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_zeroed_block_is_not_a_valid_block() {
        let block = Block::new(256);
        assert!(matches!(
            block.header(),
            Err(BlockError::InvalidBlockType(0))
        ));
    }

    #[test]
    fn test_block_type_conversion() {
        assert_eq!(BlockType::try_from(0x01), Ok(BlockType::Meta));
        assert_eq!(BlockType::try_from(0x03), Ok(BlockType::Leaf));
        assert!(BlockType::try_from(0xFF).is_err());
    }
}
