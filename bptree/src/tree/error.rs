//! Errors surfaced by tree operations.

use crate::config::ConfigError;
use crate::storage::{BlockError, BlockId, StoreError};
use crate::tree::meta::MetaError;
use crate::tree::node::NodeError;

/// Errors that can occur during B+ tree operations.
///
/// A store error in the middle of a mutation may leave the file
/// inconsistent; there is no journal to roll back.
#[derive(Debug)]
pub enum TreeError {
    /// Block store I/O error.
    Store(StoreError),
    /// Block header or checksum error.
    Block(BlockError),
    /// Metadata block error.
    Meta(MetaError),
    /// Node image error.
    Node(NodeError),
    /// Configuration error.
    Config(ConfigError),
    /// Cursor is out of range or stale.
    InvalidCursor { leaf: BlockId, slot: usize },
    /// Lookup on a tree with no entries.
    EmptyContainer,
    /// Key is not present.
    KeyNotFound,
    /// A structural invariant does not hold.
    InvariantViolation(String),
}

impl std::fmt::Display for TreeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Block(e) => write!(f, "block error: {e}"),
            Self::Meta(e) => write!(f, "metadata error: {e}"),
            Self::Node(e) => write!(f, "node error: {e}"),
            Self::Config(e) => write!(f, "config error: {e}"),
            Self::InvalidCursor { leaf, slot } => {
                write!(f, "invalid cursor: leaf {leaf}, slot {slot}")
            }
            Self::EmptyContainer => write!(f, "container is empty"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
        }
    }
}

impl std::error::Error for TreeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Block(e) => Some(e),
            Self::Meta(e) => Some(e),
            Self::Node(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::InvalidCursor { .. }
            | Self::EmptyContainer
            | Self::KeyNotFound
            | Self::InvariantViolation(_) => None,
        }
    }
}

impl From<StoreError> for TreeError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<BlockError> for TreeError {
    fn from(e: BlockError) -> Self {
        Self::Block(e)
    }
}

impl From<MetaError> for TreeError {
    fn from(e: MetaError) -> Self {
        Self::Meta(e)
    }
}

impl From<NodeError> for TreeError {
    fn from(e: NodeError) -> Self {
        Self::Node(e)
    }
}

impl From<ConfigError> for TreeError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}
