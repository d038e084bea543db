//! Root-to-leaf descent.
//!
//! Merges and borrows move children between index nodes without rewriting
//! the moved children, so a child's recorded parent may be stale. Descent
//! repairs every stale link on the path it walks.

use crate::storage::{BlockId, BlockStore, NULL_BLOCK};
use crate::tree::arena::NodeArena;
use crate::tree::codec::FixedSize;
use crate::tree::error::TreeError;
use crate::tree::node::{LeafNode, Node};

/// Decide whether a recorded parent link needs rewriting.
///
/// Returns the corrected parent when `recorded` differs from `expected`.
#[must_use]
pub const fn reconcile_parent(expected: BlockId, recorded: BlockId) -> Option<BlockId> {
    if expected == recorded {
        None
    } else {
        Some(expected)
    }
}

impl<S: BlockStore, K: FixedSize + Ord, V: FixedSize> NodeArena<S, K, V> {
    /// Descend from the root to the leaf whose range covers `key`.
    ///
    /// The tree must not be empty. Every node on the path leaves with a
    /// correct parent link.
    pub fn descend(&mut self, key: &K) -> Result<LeafNode<K, V>, TreeError> {
        let mut id = self.meta().root;
        let mut parent = NULL_BLOCK;

        loop {
            let mut node = self.read_node(id)?;
            let recorded = node.header().parent;
            if let Some(fixed) = reconcile_parent(parent, recorded) {
                tracing::trace!(block = id, recorded, parent = fixed, "repairing parent link");
                node.header_mut().parent = fixed;
                self.write_node(&node)?;
            }

            match node {
                Node::Leaf(leaf) => return Ok(leaf),
                Node::Index(index) => {
                    parent = id;
                    id = index.children[index.find_child_index(key)];
                }
            }
        }
    }
}
