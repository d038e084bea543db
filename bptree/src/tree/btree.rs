//! The public B+ tree container.
//!
//! Nodes live only in the backing store; the tree keeps nothing in memory
//! besides the metadata block, so memory use does not grow with the data set.
//! Each operation reads and writes whole blocks synchronously and runs to
//! completion before returning.

use std::path::Path;

use tracing::info;

use crate::config::{Layout, TreeConfig};
use crate::storage::{BlockStore, FileStore, NULL_BLOCK, StoreError};
use crate::tree::arena::NodeArena;
use crate::tree::codec::FixedSize;
use crate::tree::cursor::Cursor;
use crate::tree::error::TreeError;
use crate::tree::node::{Node, NodeHeader};
use crate::tree::verify::TreeStats;

/// A persistent B+ tree mapping unique keys to fixed-size values.
pub struct BPlusTree<K, V, S = FileStore> {
    pub(super) arena: NodeArena<S, K, V>,
}

impl<K, V> BPlusTree<K, V, FileStore>
where
    K: FixedSize + Ord + Clone,
    V: FixedSize,
{
    /// Open the tree file at `path`, creating it if it is missing or empty.
    ///
    /// An existing file must have been created with the same layout.
    pub fn open(path: impl AsRef<Path>, config: &TreeConfig) -> Result<Self, TreeError> {
        let path = path.as_ref();
        let layout = Layout::derive(config, K::SIZE, V::SIZE)?;

        let fresh = match std::fs::metadata(path) {
            Ok(metadata) => metadata.len() == 0,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => return Err(StoreError::Io(e).into()),
        };

        let store = if path.exists() {
            FileStore::open(path, layout.block_size)?
        } else {
            FileStore::create(path, layout.block_size)?
        };

        let tree = if fresh {
            Self::create(store, layout)?
        } else {
            Self::load(store, &layout)?
        };
        info!(
            path = %path.display(),
            created = fresh,
            entries = tree.len(),
            "opened tree file"
        );
        Ok(tree)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.arena.store().path()
    }
}

impl<K, V, S> BPlusTree<K, V, S>
where
    K: FixedSize + Ord + Clone,
    V: FixedSize,
    S: BlockStore,
{
    /// Open a tree over any block store; an empty store gets a new tree.
    pub fn with_store(store: S, config: &TreeConfig) -> Result<Self, TreeError> {
        let layout = Layout::derive(config, K::SIZE, V::SIZE)?;
        if store.block_size() != layout.block_size {
            return Err(StoreError::BlockSizeMismatch {
                expected: layout.block_size,
                actual: store.block_size(),
            }
            .into());
        }

        if store.total_blocks() == 0 {
            Self::create(store, layout)
        } else {
            Self::load(store, &layout)
        }
    }

    fn create(store: S, layout: Layout) -> Result<Self, TreeError> {
        let arena = NodeArena::create(store, layout)?;
        info!(
            block_size = layout.block_size,
            leaf_capacity = layout.leaf_capacity,
            fanout = layout.fanout,
            "created tree"
        );
        Ok(Self { arena })
    }

    fn load(store: S, layout: &Layout) -> Result<Self, TreeError> {
        let arena = NodeArena::load(store, layout)?;
        Ok(Self { arena })
    }

    /// Persist metadata, flush to stable storage and release the store.
    pub fn close(self) -> Result<(), TreeError> {
        self.into_store().map(drop)
    }

    /// Persist metadata, flush, and hand back the store.
    pub fn into_store(mut self) -> Result<S, TreeError> {
        self.arena.write_meta()?;
        self.arena.sync()?;
        info!(entries = self.len(), "closed tree");
        Ok(self.arena.into_store())
    }

    /// Borrow the underlying store.
    #[must_use]
    pub const fn store(&self) -> &S {
        self.arena.store()
    }

    /// Mutably borrow the underlying store.
    ///
    /// Writing blocks behind the tree's back can corrupt it.
    pub const fn store_mut(&mut self) -> &mut S {
        self.arena.store_mut()
    }

    /// The node geometry in use.
    #[must_use]
    pub const fn layout(&self) -> &Layout {
        self.arena.layout()
    }

    /// Number of entries.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn len(&self) -> usize {
        self.arena.meta().entry_count as usize
    }

    /// Whether the tree holds no entries.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.arena.meta().entry_count == 0
    }

    /// Insert `(key, value)` unless `key` is already present.
    ///
    /// Returns a cursor to the entry stored under `key` and `true` if the
    /// entry was inserted. On a duplicate nothing changes and the cursor
    /// names the existing entry.
    pub fn insert(&mut self, key: K, value: V) -> Result<(Cursor, bool), TreeError> {
        self.arena.insert_entry(key, value)
    }

    /// Remove `key`, returning whether it was present.
    pub fn erase(&mut self, key: &K) -> Result<bool, TreeError> {
        self.arena.erase_entry(key)
    }

    /// Cursor to `key`, or [`end`](Self::end) when absent.
    pub fn find(&mut self, key: &K) -> Result<Cursor, TreeError> {
        if self.arena.meta().root != NULL_BLOCK {
            let leaf = self.arena.descend(key)?;
            if let Ok(slot) = leaf.search(key) {
                return Ok(Cursor::at(&leaf, slot));
            }
        }
        self.end()
    }

    /// Value stored under `key`.
    pub fn get(&mut self, key: &K) -> Result<Option<V>, TreeError> {
        if self.arena.meta().root == NULL_BLOCK {
            return Ok(None);
        }
        let mut leaf = self.arena.descend(key)?;
        Ok(leaf
            .search(key)
            .ok()
            .map(|slot| leaf.entries.swap_remove(slot).1))
    }

    /// Value stored under `key`, failing when it is absent.
    pub fn at(&mut self, key: &K) -> Result<V, TreeError> {
        if self.is_empty() {
            return Err(TreeError::EmptyContainer);
        }
        self.get(key)?.ok_or(TreeError::KeyNotFound)
    }

    /// Whether `key` is present.
    pub fn contains(&mut self, key: &K) -> Result<bool, TreeError> {
        Ok(self.get(key)?.is_some())
    }

    /// Number of entries with `key`: 0 or 1.
    pub fn count(&mut self, key: &K) -> Result<usize, TreeError> {
        Ok(usize::from(self.contains(key)?))
    }

    /// Cursor to the first entry, equal to `end()` on an empty tree.
    pub fn begin(&mut self) -> Result<Cursor, TreeError> {
        let head = self.arena.meta().head;
        let first = self.arena.read_header(head)?.next;
        let header = self.arena.read_header(first)?;
        Ok(Cursor::at_header(&header, 0))
    }

    /// The past-the-end cursor, positioned on the tail sentinel.
    pub fn end(&mut self) -> Result<Cursor, TreeError> {
        let tail = self.arena.meta().tail;
        let header = self.arena.read_header(tail)?;
        Ok(Cursor::at_header(&header, 0))
    }

    /// Step forward; past the last entry the cursor becomes `end()`.
    pub fn advance(&mut self, cursor: &mut Cursor) -> Result<(), TreeError> {
        if cursor.leaf.id == self.arena.meta().tail {
            return Err(invalid(cursor));
        }

        cursor.slot += 1;
        if cursor.slot >= cursor.leaf.size {
            let header = self.arena.read_header(cursor.leaf.next)?;
            *cursor = Cursor::at_header(&header, 0);
        }
        Ok(())
    }

    /// Step backward; before the first entry the cursor lands on the head
    /// sentinel, from which it cannot retreat further.
    pub fn retreat(&mut self, cursor: &mut Cursor) -> Result<(), TreeError> {
        if cursor.leaf.id == self.arena.meta().head {
            return Err(invalid(cursor));
        }

        if cursor.slot == 0 {
            let header = self.arena.read_header(cursor.leaf.prev)?;
            let slot = header.size.saturating_sub(1);
            *cursor = Cursor::at_header(&header, slot);
        } else {
            cursor.slot -= 1;
        }
        Ok(())
    }

    /// The entry under the cursor.
    pub fn entry(&mut self, cursor: &Cursor) -> Result<(K, V), TreeError> {
        if cursor.slot >= cursor.leaf.size {
            return Err(invalid(cursor));
        }
        let mut leaf = self.arena.read_leaf(cursor.leaf.id)?;
        if cursor.slot >= leaf.entries.len() {
            return Err(invalid(cursor));
        }
        Ok(leaf.entries.swap_remove(cursor.slot))
    }

    /// Overwrite the value under the cursor in place.
    pub fn set_value(&mut self, cursor: &Cursor, value: V) -> Result<(), TreeError> {
        if cursor.slot >= cursor.leaf.size {
            return Err(invalid(cursor));
        }
        let mut leaf = self.arena.read_leaf(cursor.leaf.id)?;
        let Some(entry) = leaf.entries.get_mut(cursor.slot) else {
            return Err(invalid(cursor));
        };
        entry.1 = value;
        self.arena.write_leaf(&leaf)
    }

    /// Iterate over all entries in ascending key order.
    pub fn iter(&mut self) -> Iter<'_, K, V, S> {
        Iter {
            arena: &mut self.arena,
            leaf: None,
            done: false,
        }
    }

    /// Discard every entry and the file contents, leaving an empty tree.
    pub fn clear(&mut self) -> Result<(), TreeError> {
        let dropped = self.len();
        self.arena.reset()?;
        info!(dropped, "cleared tree");
        Ok(())
    }

    /// Number of levels; 0 for an empty tree.
    pub fn height(&mut self) -> Result<usize, TreeError> {
        let mut id = self.arena.meta().root;
        let mut height = 0;
        while id != NULL_BLOCK {
            height += 1;
            id = match self.arena.read_node(id)? {
                Node::Index(index) => index.children[0],
                Node::Leaf(_) => NULL_BLOCK,
            };
        }
        Ok(height)
    }

    /// Verify every structural invariant.
    pub fn check_invariants(&mut self) -> Result<TreeStats, TreeError> {
        self.arena.check_invariants()
    }
}

const fn invalid(cursor: &Cursor) -> TreeError {
    TreeError::InvalidCursor {
        leaf: cursor.leaf.id,
        slot: cursor.slot,
    }
}

/// Forward iterator over the leaf chain.
///
/// Yields `Err` once and stops if a block cannot be read.
pub struct Iter<'a, K, V, S> {
    arena: &'a mut NodeArena<S, K, V>,
    leaf: Option<(NodeHeader, std::vec::IntoIter<(K, V)>)>,
    done: bool,
}

impl<K, V, S> Iter<'_, K, V, S>
where
    K: FixedSize + Ord,
    V: FixedSize,
    S: BlockStore,
{
    fn load_next(&mut self) -> Result<bool, TreeError> {
        let next = match &self.leaf {
            Some((header, _)) => header.next,
            None => {
                let head = self.arena.meta().head;
                self.arena.read_header(head)?.next
            }
        };
        if next == self.arena.meta().tail {
            return Ok(false);
        }
        let leaf = self.arena.read_leaf(next)?;
        self.leaf = Some((leaf.header, leaf.entries.into_iter()));
        Ok(true)
    }
}

impl<K, V, S> Iterator for Iter<'_, K, V, S>
where
    K: FixedSize + Ord,
    V: FixedSize,
    S: BlockStore,
{
    type Item = Result<(K, V), TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            if let Some((_, entries)) = &mut self.leaf {
                if let Some(entry) = entries.next() {
                    return Some(Ok(entry));
                }
            }
            match self.load_next() {
                Ok(true) => {}
                Ok(false) => self.done = true,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
