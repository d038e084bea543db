//! Node arena: nodes addressed by stable block ids.
//!
//! The arena owns the block store and the in-memory copy of the metadata
//! block. Every node read verifies the block checksum; every node write seals
//! a fresh block. Allocation is append-only and persists the new block count
//! immediately.

use std::marker::PhantomData;

use crate::config::Layout;
use crate::storage::{Block, BlockId, BlockStore, BlockType, NULL_BLOCK, StoreError};
use crate::tree::codec::FixedSize;
use crate::tree::error::TreeError;
use crate::tree::meta::{HEAD_BLOCK, META_BLOCK, TAIL_BLOCK, TreeMeta};
use crate::tree::node::{IndexNode, LeafNode, Node, NodeHeader};

/// Block-id addressed node storage.
pub struct NodeArena<S, K, V> {
    store: S,
    meta: TreeMeta,
    _entries: PhantomData<fn() -> (K, V)>,
}

impl<S: BlockStore, K: FixedSize + Ord, V: FixedSize> NodeArena<S, K, V> {
    /// Initialize an empty store: metadata plus linked head/tail sentinels.
    pub fn create(store: S, layout: Layout) -> Result<Self, TreeError> {
        if store.total_blocks() != 0 {
            return Err(StoreError::Corruption(format!(
                "cannot initialize a store holding {} blocks",
                store.total_blocks()
            ))
            .into());
        }

        let mut arena = Self {
            store,
            meta: TreeMeta::new(layout),
            _entries: PhantomData,
        };
        arena.initialize()?;
        Ok(arena)
    }

    /// Discard every block and start over with an empty tree.
    pub fn reset(&mut self) -> Result<(), TreeError> {
        self.store.truncate()?;
        self.meta = TreeMeta::new(self.meta.layout);
        self.initialize()
    }

    fn initialize(&mut self) -> Result<(), TreeError> {
        self.store.allocate_blocks(1)?;
        self.write_meta()?;

        let head = self.allocate()?;
        let tail = self.allocate()?;
        debug_assert_eq!((head, tail), (HEAD_BLOCK, TAIL_BLOCK));

        let mut head_leaf = LeafNode::<K, V>::new(head, NULL_BLOCK);
        head_leaf.header.next = tail;
        let mut tail_leaf = LeafNode::<K, V>::new(tail, NULL_BLOCK);
        tail_leaf.header.prev = head;
        self.write_leaf(&head_leaf)?;
        self.write_leaf(&tail_leaf)?;
        self.meta.head = head;
        self.meta.tail = tail;
        self.write_meta()
    }

    /// Load an existing store, validating its metadata against `layout`.
    pub fn load(mut store: S, layout: &Layout) -> Result<Self, TreeError> {
        let block = store.read_block(META_BLOCK)?;
        let header = block.header()?;
        if header.block_type != BlockType::Meta {
            return Err(StoreError::Corruption(format!(
                "block 0 has type {:?}, expected metadata",
                header.block_type
            ))
            .into());
        }

        let meta = TreeMeta::decode(&block)?;
        meta.check_layout(layout)?;
        if meta.block_count > store.total_blocks() {
            return Err(StoreError::Corruption(format!(
                "metadata records {} blocks but the store holds {}",
                meta.block_count,
                store.total_blocks()
            ))
            .into());
        }

        Ok(Self {
            store,
            meta,
            _entries: PhantomData,
        })
    }

    #[must_use]
    pub const fn meta(&self) -> &TreeMeta {
        &self.meta
    }

    pub const fn meta_mut(&mut self) -> &mut TreeMeta {
        &mut self.meta
    }

    #[must_use]
    pub const fn layout(&self) -> &Layout {
        &self.meta.layout
    }

    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Release the store.
    pub fn into_store(self) -> S {
        self.store
    }

    /// Persist the metadata block.
    pub fn write_meta(&mut self) -> Result<(), TreeError> {
        let block = self.meta.encode();
        self.store.write_block(META_BLOCK, &block)?;
        Ok(())
    }

    /// Append a zero-filled block and persist the new block count.
    pub fn allocate(&mut self) -> Result<BlockId, TreeError> {
        let id = self.store.allocate_blocks(1)?;
        self.meta.block_count = id + 1;
        self.write_meta()?;
        Ok(id)
    }

    /// Read a block and verify its checksum and recorded id.
    fn read_verified(&mut self, id: BlockId) -> Result<Block, TreeError> {
        let block = self.store.read_block(id)?;
        block.header()?;
        let recorded = NodeHeader::decode(&block)?.id;
        if recorded != id {
            return Err(StoreError::Corruption(format!(
                "block {id} records its id as {recorded}"
            ))
            .into());
        }
        Ok(block)
    }

    /// Read only the node header.
    pub fn read_header(&mut self, id: BlockId) -> Result<NodeHeader, TreeError> {
        let block = self.read_verified(id)?;
        Ok(NodeHeader::decode(&block)?)
    }

    pub fn read_node(&mut self, id: BlockId) -> Result<Node<K, V>, TreeError> {
        let block = self.read_verified(id)?;
        Ok(Node::decode(&block, &self.meta.layout)?)
    }

    pub fn read_leaf(&mut self, id: BlockId) -> Result<LeafNode<K, V>, TreeError> {
        let block = self.read_verified(id)?;
        Ok(LeafNode::decode(&block, &self.meta.layout)?)
    }

    pub fn read_index(&mut self, id: BlockId) -> Result<IndexNode<K>, TreeError> {
        let block = self.read_verified(id)?;
        Ok(IndexNode::decode(&block, &self.meta.layout)?)
    }

    pub fn write_leaf(&mut self, leaf: &LeafNode<K, V>) -> Result<(), TreeError> {
        let mut block = Block::new(self.meta.layout.block_size);
        leaf.encode(&mut block);
        self.write_sealed(&leaf.header, block)
    }

    pub fn write_index(&mut self, index: &IndexNode<K>) -> Result<(), TreeError> {
        let mut block = Block::new(self.meta.layout.block_size);
        index.encode(&mut block);
        self.write_sealed(&index.header, block)
    }

    pub fn write_node(&mut self, node: &Node<K, V>) -> Result<(), TreeError> {
        let mut block = Block::new(self.meta.layout.block_size);
        node.encode(&mut block);
        self.write_sealed(node.header(), block)
    }

    fn write_sealed(&mut self, header: &NodeHeader, mut block: Block) -> Result<(), TreeError> {
        block.seal(header.kind.block_type());
        self.store.write_block(header.id, &block)?;
        Ok(())
    }

    /// Rewrite a node's parent link.
    pub fn set_parent(&mut self, id: BlockId, parent: BlockId) -> Result<(), TreeError> {
        let mut node = self.read_node(id)?;
        node.header_mut().parent = parent;
        self.write_node(&node)
    }

    /// Flush everything to stable storage.
    pub fn sync(&mut self) -> Result<(), TreeError> {
        self.store.sync()?;
        Ok(())
    }
}
