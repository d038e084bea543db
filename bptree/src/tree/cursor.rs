//! Positions in the leaf chain.

use crate::storage::BlockId;
use crate::tree::node::{LeafNode, NodeHeader};

/// Snapshot of a leaf header taken when a cursor lands on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LeafLink {
    pub id: BlockId,
    pub size: usize,
    pub prev: BlockId,
    pub next: BlockId,
}

impl From<&NodeHeader> for LeafLink {
    fn from(header: &NodeHeader) -> Self {
        Self {
            id: header.id,
            size: header.size,
            prev: header.prev,
            next: header.next,
        }
    }
}

/// An opaque position: a leaf and a slot within it.
///
/// A cursor on the tail sentinel is the past-the-end position; a cursor on
/// the head sentinel is the before-the-beginning position. Any structural
/// change to the tree invalidates existing cursors.
#[derive(Debug, Clone, Copy)]
pub struct Cursor {
    pub(crate) leaf: LeafLink,
    pub(crate) slot: usize,
}

impl Cursor {
    pub(crate) fn at<K, V>(leaf: &LeafNode<K, V>, slot: usize) -> Self {
        let mut link = LeafLink::from(&leaf.header);
        link.size = leaf.entries.len();
        Self { leaf: link, slot }
    }

    pub(crate) fn at_header(header: &NodeHeader, slot: usize) -> Self {
        Self {
            leaf: LeafLink::from(header),
            slot,
        }
    }

    /// Block id of the leaf this cursor points into.
    #[must_use]
    pub const fn leaf_id(&self) -> BlockId {
        self.leaf.id
    }

    /// Slot within the leaf.
    #[must_use]
    pub const fn slot(&self) -> usize {
        self.slot
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.leaf.id == other.leaf.id && self.slot == other.slot
    }
}

impl Eq for Cursor {}
