//! Deletion and underflow handling.
//!
//! A non-root node below its floor (⌈L/2⌉ entries or ⌈M/2⌉ children) first
//! tries to borrow one element from its left sibling, then merges into it.
//! The first child of a parent uses its right sibling instead. Merging removes
//! a separator from the parent, which may underflow in turn; the walk up the
//! parent chain is iterative.
//!
//! Children moved between index nodes keep their old parent link until the
//! next descent through them repairs it.

use std::mem;

use tracing::{debug, trace};

use crate::storage::{BlockId, BlockStore, NULL_BLOCK};
use crate::tree::arena::NodeArena;
use crate::tree::codec::FixedSize;
use crate::tree::error::TreeError;
use crate::tree::node::{IndexNode, LeafNode};

impl<S: BlockStore, K: FixedSize + Ord + Clone, V: FixedSize> NodeArena<S, K, V> {
    /// Remove the entry with `key`, returning whether it was present.
    pub fn erase_entry(&mut self, key: &K) -> Result<bool, TreeError> {
        if self.meta().root == NULL_BLOCK {
            return Ok(false);
        }

        let mut leaf = self.descend(key)?;
        let Ok(slot) = leaf.search(key) else {
            return Ok(false);
        };
        leaf.entries.remove(slot);

        self.rebalance_leaf(leaf)?;
        let meta = self.meta_mut();
        meta.entry_count = meta.entry_count.saturating_sub(1);
        self.write_meta()?;
        Ok(true)
    }

    fn rebalance_leaf(&mut self, mut leaf: LeafNode<K, V>) -> Result<(), TreeError> {
        if leaf.header.id == self.meta().root {
            if leaf.entries.is_empty() {
                self.unlink_leaf(&leaf)?;
                self.meta_mut().root = NULL_BLOCK;
                debug!(leaf = leaf.header.id, "tree is empty");
            } else {
                self.write_leaf(&leaf)?;
            }
            return Ok(());
        }

        let floor = self.layout().leaf_floor();
        if leaf.entries.len() >= floor {
            return self.write_leaf(&leaf);
        }

        let mut parent = self.read_index(leaf.header.parent)?;
        let index = parent.child_position(leaf.header.id)?;

        if index > 0 {
            let mut left = self.read_leaf(parent.children[index - 1])?;
            if left.entries.len() > floor {
                if let Some(entry) = left.entries.pop() {
                    leaf.entries.insert(0, entry);
                }
                parent.keys[index - 1] = leaf.entries[0].0.clone();
                self.write_leaf(&left)?;
                self.write_leaf(&leaf)?;
                self.write_index(&parent)?;
                trace!(leaf = leaf.header.id, from = left.header.id, "borrowed from left leaf");
                return Ok(());
            }

            left.entries.append(&mut leaf.entries);
            self.absorb_next(&mut left, &leaf)?;
            parent.remove_child(index);
            trace!(leaf = leaf.header.id, into = left.header.id, "merged leaf into left sibling");
        } else {
            let right_id = second_child(&parent)?;
            let mut right = self.read_leaf(right_id)?;
            if right.entries.len() > floor {
                leaf.entries.push(right.entries.remove(0));
                parent.keys[0] = right.entries[0].0.clone();
                self.write_leaf(&right)?;
                self.write_leaf(&leaf)?;
                self.write_index(&parent)?;
                trace!(leaf = leaf.header.id, from = right_id, "borrowed from right leaf");
                return Ok(());
            }

            leaf.entries.append(&mut right.entries);
            self.absorb_next(&mut leaf, &right)?;
            parent.remove_child(1);
            trace!(leaf = right_id, into = leaf.header.id, "merged right sibling into leaf");
        }

        self.rebalance_index(parent)
    }

    /// Write `survivor` after unlinking its successor `absorbed` from the chain.
    fn absorb_next(
        &mut self,
        survivor: &mut LeafNode<K, V>,
        absorbed: &LeafNode<K, V>,
    ) -> Result<(), TreeError> {
        survivor.header.next = absorbed.header.next;
        let mut next = self.read_leaf(absorbed.header.next)?;
        next.header.prev = survivor.header.id;
        self.write_leaf(&next)?;
        self.write_leaf(survivor)
    }

    /// Splice a leaf out of the chain by linking its neighbours.
    fn unlink_leaf(&mut self, leaf: &LeafNode<K, V>) -> Result<(), TreeError> {
        let mut prev = self.read_leaf(leaf.header.prev)?;
        prev.header.next = leaf.header.next;
        self.write_leaf(&prev)?;

        let mut next = self.read_leaf(leaf.header.next)?;
        next.header.prev = leaf.header.prev;
        self.write_leaf(&next)
    }

    fn rebalance_index(&mut self, mut node: IndexNode<K>) -> Result<(), TreeError> {
        loop {
            if node.header.id == self.meta().root {
                if let &[only] = node.children.as_slice() {
                    self.meta_mut().root = only;
                    debug!(root = only, old_root = node.header.id, "collapsed root");
                    return Ok(());
                }
                return self.write_index(&node);
            }

            let floor = self.layout().index_floor();
            if node.children.len() >= floor {
                return self.write_index(&node);
            }

            let mut parent = self.read_index(node.header.parent)?;
            let index = parent.child_position(node.header.id)?;

            if index > 0 {
                let mut left = self.read_index(parent.children[index - 1])?;
                if left.children.len() > floor {
                    let (Some(child), Some(key)) = (left.children.pop(), left.keys.pop()) else {
                        return Err(underflowed(&left));
                    };
                    let separator = mem::replace(&mut parent.keys[index - 1], key);
                    node.keys.insert(0, separator);
                    node.children.insert(0, child);
                    self.write_index(&left)?;
                    self.write_index(&node)?;
                    trace!(
                        node = node.header.id,
                        from = left.header.id,
                        "borrowed from left index"
                    );
                    return self.write_index(&parent);
                }

                let separator = parent.remove_child(index);
                left.keys.push(separator);
                left.keys.append(&mut node.keys);
                left.children.append(&mut node.children);
                self.write_index(&left)?;
                trace!(
                    node = node.header.id,
                    into = left.header.id,
                    "merged index into left sibling"
                );
            } else {
                let right_id = second_child(&parent)?;
                let mut right = self.read_index(right_id)?;
                if right.children.len() > floor {
                    let child = right.children.remove(0);
                    let key = right.keys.remove(0);
                    let separator = mem::replace(&mut parent.keys[0], key);
                    node.keys.push(separator);
                    node.children.push(child);
                    self.write_index(&right)?;
                    self.write_index(&node)?;
                    trace!(node = node.header.id, from = right_id, "borrowed from right index");
                    return self.write_index(&parent);
                }

                let separator = parent.remove_child(1);
                node.keys.push(separator);
                node.keys.append(&mut right.keys);
                node.children.append(&mut right.children);
                self.write_index(&node)?;
                trace!(node = right_id, into = node.header.id, "merged right sibling into index");
            }

            node = parent;
        }
    }
}

fn second_child<K>(parent: &IndexNode<K>) -> Result<BlockId, TreeError> {
    parent.children.get(1).copied().ok_or_else(|| {
        TreeError::InvariantViolation(format!(
            "non-root block {} has a parent with one child",
            parent.header.id
        ))
    })
}

fn underflowed<K>(node: &IndexNode<K>) -> TreeError {
    TreeError::InvariantViolation(format!("index block {} has no separators", node.header.id))
}
