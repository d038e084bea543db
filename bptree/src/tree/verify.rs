//! Structural invariant checks.
//!
//! Walks the whole tree and the leaf chain, so the cost is proportional to
//! the file size. Used by tests and by the `check` command.

use crate::storage::{BlockId, BlockStore, NULL_BLOCK};
use crate::tree::arena::NodeArena;
use crate::tree::codec::FixedSize;
use crate::tree::error::TreeError;
use crate::tree::node::Node;

/// Shape of a tree that passed every check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    /// Number of levels; 0 for an empty tree.
    pub height: usize,
    /// Number of leaves, sentinels excluded.
    pub leaves: usize,
    /// Number of index nodes.
    pub index_nodes: usize,
    /// Number of entries found in the leaves.
    pub entries: u64,
    /// Nodes whose recorded parent is stale and awaits lazy repair.
    pub stale_parent_links: usize,
}

struct Pending<K> {
    id: BlockId,
    parent: BlockId,
    depth: usize,
    lower: Option<K>,
    upper: Option<K>,
}

fn violation(message: String) -> TreeError {
    TreeError::InvariantViolation(message)
}

impl<S: BlockStore, K: FixedSize + Ord + Clone, V: FixedSize> NodeArena<S, K, V> {
    /// Verify every structural invariant.
    ///
    /// Stale parent links are counted, not reported as violations.
    pub fn check_invariants(&mut self) -> Result<TreeStats, TreeError> {
        let meta = *self.meta();
        let mut stats = TreeStats::default();
        let mut leaf_order = Vec::new();

        if meta.root != NULL_BLOCK {
            self.check_subtree(&mut stats, &mut leaf_order)?;
        }

        if stats.entries != meta.entry_count {
            return Err(violation(format!(
                "leaves hold {} entries, metadata records {}",
                stats.entries, meta.entry_count
            )));
        }

        self.check_chain(&leaf_order)?;
        Ok(stats)
    }

    fn check_subtree(
        &mut self,
        stats: &mut TreeStats,
        leaf_order: &mut Vec<BlockId>,
    ) -> Result<(), TreeError> {
        let layout = *self.layout();
        let root = self.meta().root;
        let mut leaf_depth = None;
        let mut stack = vec![Pending::<K> {
            id: root,
            parent: NULL_BLOCK,
            depth: 1,
            lower: None,
            upper: None,
        }];

        while let Some(pending) = stack.pop() {
            let node = self.read_node(pending.id)?;
            let is_root = pending.id == root;
            if node.header().parent != pending.parent {
                stats.stale_parent_links += 1;
            }

            match node {
                Node::Leaf(leaf) => {
                    let size = leaf.entries.len();
                    let min = if is_root { 1 } else { layout.leaf_floor() };
                    if size < min || size > layout.leaf_capacity {
                        return Err(violation(format!(
                            "leaf {} holds {size} entries, allowed {min}..={}",
                            pending.id, layout.leaf_capacity
                        )));
                    }
                    let keys: Vec<&K> = leaf.entries.iter().map(|(k, _)| k).collect();
                    check_keys(pending.id, &keys, &pending)?;

                    match leaf_depth {
                        None => leaf_depth = Some(pending.depth),
                        Some(depth) if depth != pending.depth => {
                            return Err(violation(format!(
                                "leaf {} at depth {}, other leaves at depth {depth}",
                                pending.id, pending.depth
                            )));
                        }
                        Some(_) => {}
                    }

                    stats.leaves += 1;
                    stats.entries += size as u64;
                    leaf_order.push(pending.id);
                }
                Node::Index(index) => {
                    let size = index.children.len();
                    let min = if is_root { 2 } else { layout.index_floor() };
                    if size < min || size > layout.fanout || index.keys.len() + 1 != size {
                        return Err(violation(format!(
                            "index {} holds {size} children and {} separators, allowed {min}..={} children",
                            pending.id,
                            index.keys.len(),
                            layout.fanout
                        )));
                    }
                    let keys: Vec<&K> = index.keys.iter().collect();
                    check_keys(pending.id, &keys, &pending)?;

                    stats.index_nodes += 1;
                    // Reverse so the leftmost child is visited first
                    for (i, &child) in index.children.iter().enumerate().rev() {
                        let lower = if i == 0 {
                            pending.lower.clone()
                        } else {
                            Some(index.keys[i - 1].clone())
                        };
                        let upper = index
                            .keys
                            .get(i)
                            .cloned()
                            .or_else(|| pending.upper.clone());
                        stack.push(Pending {
                            id: child,
                            parent: pending.id,
                            depth: pending.depth + 1,
                            lower,
                            upper,
                        });
                    }
                }
            }
        }

        stats.height = leaf_depth.unwrap_or(0);
        Ok(())
    }

    /// Walk the chain both ways and compare it with the in-order leaves.
    fn check_chain(&mut self, leaf_order: &[BlockId]) -> Result<(), TreeError> {
        let meta = *self.meta();
        // Bounded by the block count so a cycle cannot loop forever
        let limit = usize::try_from(meta.block_count).unwrap_or(usize::MAX);

        for sentinel in [meta.head, meta.tail] {
            let leaf = self.read_leaf(sentinel)?;
            if !leaf.entries.is_empty() {
                return Err(violation(format!("sentinel {sentinel} holds entries")));
            }
        }

        let mut forward = Vec::new();
        let mut prev = meta.head;
        let mut id = self.read_header(meta.head)?.next;
        while id != meta.tail {
            if forward.len() > limit || id == NULL_BLOCK {
                return Err(violation("forward leaf chain does not reach the tail".into()));
            }
            let header = self.read_header(id)?;
            if header.prev != prev {
                return Err(violation(format!(
                    "leaf {id} links back to {}, expected {prev}",
                    header.prev
                )));
            }
            forward.push(id);
            prev = id;
            id = header.next;
        }
        if self.read_header(meta.tail)?.prev != prev {
            return Err(violation("tail does not link back to the last leaf".into()));
        }

        let mut backward = Vec::new();
        let mut id = self.read_header(meta.tail)?.prev;
        while id != meta.head {
            if backward.len() > limit || id == NULL_BLOCK {
                return Err(violation("backward leaf chain does not reach the head".into()));
            }
            backward.push(id);
            id = self.read_header(id)?.prev;
        }
        backward.reverse();

        if forward != leaf_order || backward != leaf_order {
            return Err(violation(format!(
                "leaf chain ({} forward, {} backward) disagrees with tree order ({} leaves)",
                forward.len(),
                backward.len(),
                leaf_order.len()
            )));
        }
        Ok(())
    }
}

/// Keys must ascend strictly and stay within `[lower, upper)`.
fn check_keys<K: Ord>(id: BlockId, keys: &[&K], bounds: &Pending<K>) -> Result<(), TreeError> {
    if keys.windows(2).any(|pair| pair[0] >= pair[1]) {
        return Err(violation(format!("block {id} keys are not strictly ascending")));
    }
    if let (Some(lower), Some(first)) = (&bounds.lower, keys.first()) {
        if *first < lower {
            return Err(violation(format!("block {id} holds a key below its lower bound")));
        }
    }
    if let (Some(upper), Some(last)) = (&bounds.upper, keys.last()) {
        if *last >= upper {
            return Err(violation(format!("block {id} holds a key at or above its upper bound")));
        }
    }
    Ok(())
}
