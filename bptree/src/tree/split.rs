//! Insertion and overflow handling.
//!
//! Entries are placed into the in-memory image first. A leaf holding more
//! than L entries is split at `len / 2`; the sibling's first key is copied
//! up as a separator. An index node holding more than M children after
//! receiving a separator is split before any image of it is written, and its
//! median separator moves up. Propagation walks the parent chain
//! iteratively. No block ever reaches the store above capacity.

use tracing::{debug, trace};

use crate::storage::{BlockId, BlockStore, NULL_BLOCK};
use crate::tree::arena::NodeArena;
use crate::tree::codec::FixedSize;
use crate::tree::cursor::Cursor;
use crate::tree::error::TreeError;
use crate::tree::node::{IndexNode, LeafNode, NodeHeader, NodeKind};

impl<S: BlockStore, K: FixedSize + Ord + Clone, V: FixedSize> NodeArena<S, K, V> {
    /// Insert an entry unless its key is present.
    ///
    /// Returns a cursor to the entry with that key and whether it was
    /// inserted. A duplicate leaves the tree untouched.
    pub fn insert_entry(&mut self, key: K, value: V) -> Result<(Cursor, bool), TreeError> {
        if self.meta().root == NULL_BLOCK {
            let cursor = self.plant_root(key, value)?;
            return Ok((cursor, true));
        }

        let mut leaf = self.descend(&key)?;
        let slot = match leaf.search(&key) {
            Ok(slot) => return Ok((Cursor::at(&leaf, slot), false)),
            Err(slot) => slot,
        };
        leaf.entries.insert(slot, (key, value));

        let cursor = if leaf.entries.len() > self.layout().leaf_capacity {
            self.split_leaf(leaf, slot)?
        } else {
            self.write_leaf(&leaf)?;
            Cursor::at(&leaf, slot)
        };

        self.meta_mut().entry_count += 1;
        self.write_meta()?;
        Ok((cursor, true))
    }

    /// First insert into an empty tree: a root leaf between the sentinels.
    fn plant_root(&mut self, key: K, value: V) -> Result<Cursor, TreeError> {
        let (head_id, tail_id) = (self.meta().head, self.meta().tail);
        let id = self.allocate()?;

        let mut leaf = LeafNode::new(id, NULL_BLOCK);
        leaf.header.prev = head_id;
        leaf.header.next = tail_id;
        leaf.entries.push((key, value));
        self.write_leaf(&leaf)?;

        let mut head = self.read_leaf(head_id)?;
        head.header.next = id;
        self.write_leaf(&head)?;
        let mut tail = self.read_leaf(tail_id)?;
        tail.header.prev = id;
        self.write_leaf(&tail)?;

        let meta = self.meta_mut();
        meta.root = id;
        meta.entry_count = 1;
        self.write_meta()?;
        debug!(root = id, "planted root leaf");

        Ok(Cursor::at(&leaf, 0))
    }

    /// Parent of the node, growing a new root above it first if needed.
    ///
    /// Updates `header.parent` in memory; the caller writes the node.
    fn parent_or_new_root(&mut self, header: &mut NodeHeader) -> Result<BlockId, TreeError> {
        if header.id != self.meta().root {
            return Ok(header.parent);
        }

        let root_id = self.allocate()?;
        let root = IndexNode::with_child(root_id, NULL_BLOCK, header.id);
        self.write_index(&root)?;
        header.parent = root_id;

        self.meta_mut().root = root_id;
        self.write_meta()?;
        debug!(root = root_id, old_root = header.id, "tree grew a new root");

        Ok(root_id)
    }

    /// Split a leaf holding L+1 entries and return a cursor to `slot`.
    fn split_leaf(&mut self, mut leaf: LeafNode<K, V>, slot: usize) -> Result<Cursor, TreeError> {
        let parent = self.parent_or_new_root(&mut leaf.header)?;
        let sibling_id = self.allocate()?;

        let mut sibling = LeafNode {
            header: NodeHeader::new(NodeKind::Leaf, sibling_id, parent),
            entries: leaf.split_off(),
        };
        let mid = leaf.entries.len();
        let separator = sibling.entries[0].0.clone();

        // Splice the sibling in after the leaf
        sibling.header.prev = leaf.header.id;
        sibling.header.next = leaf.header.next;
        let mut next = self.read_leaf(leaf.header.next)?;
        next.header.prev = sibling_id;
        leaf.header.next = sibling_id;

        self.write_leaf(&sibling)?;
        self.write_leaf(&next)?;
        self.write_leaf(&leaf)?;
        trace!(
            leaf = leaf.header.id,
            sibling = sibling_id,
            left = leaf.entries.len(),
            right = sibling.entries.len(),
            "split leaf"
        );

        self.insert_separator(leaf.header.id, parent, separator, sibling_id)?;

        Ok(if slot < mid {
            Cursor::at(&leaf, slot)
        } else {
            Cursor::at(&sibling, slot - mid)
        })
    }

    /// Place `(separator, right)` after `left` in `parent`, splitting upward.
    fn insert_separator(
        &mut self,
        mut left: BlockId,
        mut parent_id: BlockId,
        mut separator: K,
        mut right: BlockId,
    ) -> Result<(), TreeError> {
        loop {
            let mut parent = self.read_index(parent_id)?;
            let index = parent.child_position(left)?;
            parent.insert_after(index, separator, right);

            if parent.children.len() <= self.layout().fanout {
                return self.write_index(&parent);
            }

            let grandparent = self.parent_or_new_root(&mut parent.header)?;
            let sibling_id = self.allocate()?;
            let (median, mut sibling) = parent.split();
            sibling.header.id = sibling_id;
            sibling.header.parent = grandparent;

            self.write_index(&sibling)?;
            for &child in &sibling.children {
                self.set_parent(child, sibling_id)?;
            }
            self.write_index(&parent)?;
            trace!(
                node = parent_id,
                sibling = sibling_id,
                left = parent.children.len(),
                right = sibling.children.len(),
                "split index node"
            );

            left = parent_id;
            parent_id = grandparent;
            separator = median;
            right = sibling_id;
        }
    }
}
