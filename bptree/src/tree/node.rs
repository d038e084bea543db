//! B+ tree node types and serialization.
//!
//! Every node occupies one block:
//! - Bytes 0-7: block header (type, flags, checksum)
//! - Bytes 8-47: node header (size, own id, parent, prev/next leaf links)
//! - Bytes 48..: payload slots
//!
//! Index slot `i` holds `(separator_i, child_i)`; the last slot holds only a
//! trailing child and its key bytes stay zero. Leaf slot `i` holds
//! `(key_i, value_i)`.

// Node sizes are bounded by the block size, which fits in u32.
#![allow(clippy::cast_possible_truncation)]

use crate::config::Layout;
use crate::storage::{Block, BlockId, BlockType, NULL_BLOCK};
use crate::tree::codec::FixedSize;

/// Offset where node payload starts (block header + node header).
pub const NODE_PAYLOAD_OFFSET: usize = 48;

/// Size of a child block id in an index slot.
pub const CHILD_ID_SIZE: usize = 8;

/// Node header field offsets.
mod offsets {
    pub const SIZE: usize = 8;
    pub const OWN_ID: usize = 16;
    pub const PARENT: usize = 24;
    pub const PREV: usize = 32;
    pub const NEXT: usize = 40;
}

/// Node kind, stored as the block type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Index,
    Leaf,
}

impl NodeKind {
    /// Block type used for this kind of node.
    #[must_use]
    pub const fn block_type(self) -> BlockType {
        match self {
            Self::Index => BlockType::Index,
            Self::Leaf => BlockType::Leaf,
        }
    }
}

/// Header information for a node.
///
/// `size` counts children for index nodes and entries for leaves. The prev and
/// next links are only meaningful for leaves; `NULL_BLOCK` marks an absent
/// link everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHeader {
    pub kind: NodeKind,
    pub size: usize,
    pub id: BlockId,
    pub parent: BlockId,
    pub prev: BlockId,
    pub next: BlockId,
}

impl NodeHeader {
    /// Create an empty header.
    #[must_use]
    pub const fn new(kind: NodeKind, id: BlockId, parent: BlockId) -> Self {
        Self {
            kind,
            size: 0,
            id,
            parent,
            prev: NULL_BLOCK,
            next: NULL_BLOCK,
        }
    }

    /// Read a node header from a block.
    ///
    /// The block checksum is not checked here.
    pub fn decode(block: &Block) -> Result<Self, NodeError> {
        let kind = match BlockType::try_from(block.read_u8(0)) {
            Ok(BlockType::Index) => NodeKind::Index,
            Ok(BlockType::Leaf) => NodeKind::Leaf,
            _ => {
                return Err(NodeError::WrongNodeType {
                    block_id: block.read_u64(offsets::OWN_ID),
                    found: block.read_u8(0),
                });
            }
        };

        Ok(Self {
            kind,
            size: block.read_u32(offsets::SIZE) as usize,
            id: block.read_u64(offsets::OWN_ID),
            parent: block.read_u64(offsets::PARENT),
            prev: block.read_u64(offsets::PREV),
            next: block.read_u64(offsets::NEXT),
        })
    }

    /// Write the node header to a block.
    pub fn encode(&self, block: &mut Block) {
        block.write_u32(offsets::SIZE, self.size as u32);
        block.write_u64(offsets::OWN_ID, self.id);
        block.write_u64(offsets::PARENT, self.parent);
        block.write_u64(offsets::PREV, self.prev);
        block.write_u64(offsets::NEXT, self.next);
    }

    fn check_size(&self, min: usize, capacity: usize) -> Result<(), NodeError> {
        if self.size < min || self.size > capacity {
            return Err(NodeError::SizeOutOfRange {
                block_id: self.id,
                size: self.size,
                capacity,
            });
        }
        Ok(())
    }
}

/// An index (non-leaf) node.
///
/// Stores N children and N-1 separator keys.
/// `children[i]` holds keys < `keys[i]`;
/// `children[i + 1]` holds keys >= `keys[i]`.
#[derive(Debug, Clone)]
pub struct IndexNode<K> {
    pub header: NodeHeader,
    /// Separator keys in sorted order.
    pub keys: Vec<K>,
    /// Child block ids. `children.len()` == `keys.len()` + 1
    pub children: Vec<BlockId>,
}

impl<K: FixedSize + Ord> IndexNode<K> {
    /// Create an index node with a single child.
    #[must_use]
    pub fn with_child(id: BlockId, parent: BlockId, child: BlockId) -> Self {
        Self {
            header: NodeHeader::new(NodeKind::Index, id, parent),
            keys: Vec::new(),
            children: vec![child],
        }
    }

    /// Read an index node from a block.
    pub fn decode(block: &Block, layout: &Layout) -> Result<Self, NodeError> {
        let header = NodeHeader::decode(block)?;
        if header.kind != NodeKind::Index {
            return Err(NodeError::WrongNodeType {
                block_id: header.id,
                found: BlockType::Leaf as u8,
            });
        }
        header.check_size(1, layout.fanout)?;

        let slot = K::SIZE + CHILD_ID_SIZE;
        let mut keys = Vec::with_capacity(header.size - 1);
        let mut children = Vec::with_capacity(header.size);

        for i in 0..header.size {
            let offset = NODE_PAYLOAD_OFFSET + i * slot;
            if i + 1 < header.size {
                keys.push(K::decode(block.read_bytes(offset, K::SIZE)));
            }
            children.push(block.read_u64(offset + K::SIZE));
        }

        Ok(Self {
            header,
            keys,
            children,
        })
    }

    /// Write the node to a zeroed block. The caller seals it.
    pub fn encode(&self, block: &mut Block) {
        let mut header = self.header;
        header.size = self.children.len();
        header.encode(block);

        let slot = K::SIZE + CHILD_ID_SIZE;
        for (i, child) in self.children.iter().enumerate() {
            let offset = NODE_PAYLOAD_OFFSET + i * slot;
            if let Some(key) = self.keys.get(i) {
                key.encode(&mut block.as_bytes_mut()[offset..offset + K::SIZE]);
            }
            block.write_u64(offset + K::SIZE, *child);
        }
    }

    /// Find the child index for a given key.
    #[must_use]
    pub fn find_child_index(&self, key: &K) -> usize {
        match self.keys.binary_search(key) {
            Ok(i) => i + 1, // Exact match, go right
            Err(i) => i,
        }
    }

    /// Position of `child` among this node's children.
    pub fn child_position(&self, child: BlockId) -> Result<usize, NodeError> {
        self.children
            .iter()
            .position(|&c| c == child)
            .ok_or(NodeError::ChildNotFound {
                parent: self.header.id,
                child,
            })
    }

    /// Insert `separator` and `right` immediately after the child at `index`.
    pub fn insert_after(&mut self, index: usize, separator: K, right: BlockId) {
        self.keys.insert(index, separator);
        self.children.insert(index + 1, right);
    }

    /// Remove the child at `index` (>= 1) and the separator to its left.
    ///
    /// Returns the removed separator.
    pub fn remove_child(&mut self, index: usize) -> K {
        self.children.remove(index);
        self.keys.remove(index - 1)
    }

    /// Split the node, returning the promoted separator and the new right node.
    ///
    /// The right node inherits the parent; its id is assigned by the caller.
    #[must_use]
    pub fn split(&mut self) -> (K, Self) {
        let mid = self.keys.len() / 2;

        // Right node gets keys and children after the median
        let mut right_keys = self.keys.split_off(mid);
        let median = right_keys.remove(0);
        let right_children = self.children.split_off(mid + 1);

        let right = Self {
            header: NodeHeader::new(NodeKind::Index, NULL_BLOCK, self.header.parent),
            keys: right_keys,
            children: right_children,
        };

        (median, right)
    }
}

/// A leaf node.
///
/// Stores key-value pairs in ascending key order and links to sibling leaves.
#[derive(Debug, Clone)]
pub struct LeafNode<K, V> {
    pub header: NodeHeader,
    /// Entries in sorted order by key.
    pub entries: Vec<(K, V)>,
}

impl<K: FixedSize + Ord, V: FixedSize> LeafNode<K, V> {
    /// Create a new empty leaf.
    #[must_use]
    pub const fn new(id: BlockId, parent: BlockId) -> Self {
        Self {
            header: NodeHeader::new(NodeKind::Leaf, id, parent),
            entries: Vec::new(),
        }
    }

    /// Read a leaf from a block.
    pub fn decode(block: &Block, layout: &Layout) -> Result<Self, NodeError> {
        let header = NodeHeader::decode(block)?;
        if header.kind != NodeKind::Leaf {
            return Err(NodeError::WrongNodeType {
                block_id: header.id,
                found: BlockType::Index as u8,
            });
        }
        header.check_size(0, layout.leaf_capacity)?;

        let slot = K::SIZE + V::SIZE;
        let entries = (0..header.size)
            .map(|i| {
                let offset = NODE_PAYLOAD_OFFSET + i * slot;
                let key = K::decode(block.read_bytes(offset, K::SIZE));
                let value = V::decode(block.read_bytes(offset + K::SIZE, V::SIZE));
                (key, value)
            })
            .collect();

        Ok(Self { header, entries })
    }

    /// Write the leaf to a zeroed block. The caller seals it.
    pub fn encode(&self, block: &mut Block) {
        let mut header = self.header;
        header.size = self.entries.len();
        header.encode(block);

        let slot = K::SIZE + V::SIZE;
        let bytes = block.as_bytes_mut();
        for (i, (key, value)) in self.entries.iter().enumerate() {
            let offset = NODE_PAYLOAD_OFFSET + i * slot;
            key.encode(&mut bytes[offset..offset + K::SIZE]);
            value.encode(&mut bytes[offset + K::SIZE..offset + slot]);
        }
    }

    /// Find the index where a key is (`Ok`) or would be inserted (`Err`).
    pub fn search(&self, key: &K) -> Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.cmp(key))
    }

    /// Move the upper half of the entries out, returning them.
    ///
    /// The lower `len / 2` entries stay in this leaf.
    #[must_use]
    pub fn split_off(&mut self) -> Vec<(K, V)> {
        let mid = self.entries.len() / 2;
        self.entries.split_off(mid)
    }
}

/// A decoded node of either kind.
#[derive(Debug, Clone)]
pub enum Node<K, V> {
    Index(IndexNode<K>),
    Leaf(LeafNode<K, V>),
}

impl<K: FixedSize + Ord, V: FixedSize> Node<K, V> {
    /// Decode whichever kind of node the block holds.
    pub fn decode(block: &Block, layout: &Layout) -> Result<Self, NodeError> {
        match NodeHeader::decode(block)?.kind {
            NodeKind::Index => IndexNode::decode(block, layout).map(Self::Index),
            NodeKind::Leaf => LeafNode::decode(block, layout).map(Self::Leaf),
        }
    }

    /// Write the node to a zeroed block. The caller seals it.
    pub fn encode(&self, block: &mut Block) {
        match self {
            Self::Index(node) => node.encode(block),
            Self::Leaf(node) => node.encode(block),
        }
    }

    #[must_use]
    pub const fn header(&self) -> &NodeHeader {
        match self {
            Self::Index(node) => &node.header,
            Self::Leaf(node) => &node.header,
        }
    }

    pub const fn header_mut(&mut self) -> &mut NodeHeader {
        match self {
            Self::Index(node) => &mut node.header,
            Self::Leaf(node) => &mut node.header,
        }
    }
}

/// Errors that can occur when decoding or editing nodes.
#[derive(Debug)]
pub enum NodeError {
    /// Block does not hold the expected kind of node.
    WrongNodeType { block_id: BlockId, found: u8 },
    /// Parent does not list the child.
    ChildNotFound { parent: BlockId, child: BlockId },
    /// Stored size exceeds capacity (or an index node has no children).
    SizeOutOfRange {
        block_id: BlockId,
        size: usize,
        capacity: usize,
    },
}

impl std::fmt::Display for NodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WrongNodeType { block_id, found } => {
                write!(f, "block {block_id} has unexpected type 0x{found:02x}")
            }
            Self::ChildNotFound { parent, child } => {
                write!(f, "block {child} is not a child of block {parent}")
            }
            Self::SizeOutOfRange {
                block_id,
                size,
                capacity,
            } => write!(
                f,
                "block {block_id} has size {size}, capacity is {capacity}"
            ),
        }
    }
}

impl std::error::Error for NodeError {}
