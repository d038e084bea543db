//! Tree configuration.
//!
//! The block size is chosen when a tree file is created. Leaf capacity (L)
//! and index fan-out (M) are derived from the block size and the serialized
//! sizes of the key and value types; a configuration may lower them (small
//! nodes exercise splits and merges in tests) but never raise them.
//!
//! # Environment Variables
//!
//! - `BPTREE_BLOCK_SIZE`: Block size in bytes (default: `4096`)
//! - `BPTREE_LEAF_CAPACITY`: Maximum entries per leaf (default: derived)
//! - `BPTREE_FANOUT`: Maximum children per index node (default: derived)
//!
//! # Invariants
//!
//! - A derived [`Layout`] always has `leaf_capacity >= 3` and `fanout >= 3`
//! - A derived [`Layout`] never exceeds what fits in one block

use crate::storage::DEFAULT_BLOCK_SIZE;
use crate::tree::{CHILD_ID_SIZE, NODE_PAYLOAD_OFFSET};

/// Smallest block size that can hold the metadata block.
pub const MIN_BLOCK_SIZE: usize = 128;

/// Smallest leaf capacity or fan-out that keeps split and merge well defined.
pub const MIN_CAPACITY: usize = 3;

/// User-facing tree configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    /// Block size in bytes.
    pub block_size: usize,
    /// Optional cap on entries per leaf.
    pub leaf_capacity: Option<usize>,
    /// Optional cap on children per index node.
    pub fanout: Option<usize>,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            leaf_capacity: None,
            fanout: None,
        }
    }
}

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable has an invalid value.
    InvalidValue { name: String, message: String },
    /// The block cannot hold even the minimum number of entries.
    BlockTooSmall {
        block_size: usize,
        key_size: usize,
        value_size: usize,
    },
    /// A capacity override is outside the allowed range.
    CapacityOutOfRange {
        name: &'static str,
        value: usize,
        min: usize,
        max: usize,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
            Self::BlockTooSmall {
                block_size,
                key_size,
                value_size,
            } => write!(
                f,
                "block size {block_size} too small for {key_size}-byte keys and {value_size}-byte values"
            ),
            Self::CapacityOutOfRange {
                name,
                value,
                min,
                max,
            } => write!(f, "{name} {value} out of range ({min}..={max})"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TreeConfig {
    /// Set the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Cap the number of entries per leaf.
    #[must_use]
    pub fn with_leaf_capacity(mut self, leaf_capacity: usize) -> Self {
        self.leaf_capacity = Some(leaf_capacity);
        self
    }

    /// Cap the number of children per index node.
    #[must_use]
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = Some(fanout);
        self
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but not a valid number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let block_size =
            parse_var(&lookup, "BPTREE_BLOCK_SIZE")?.unwrap_or(DEFAULT_BLOCK_SIZE);
        let leaf_capacity = parse_var(&lookup, "BPTREE_LEAF_CAPACITY")?;
        let fanout = parse_var(&lookup, "BPTREE_FANOUT")?;

        Ok(Self {
            block_size,
            leaf_capacity,
            fanout,
        })
    }
}

fn parse_var(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<usize>, ConfigError> {
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name: name.to_string(),
                message: format!("'{value}' is not a non-negative integer"),
            }),
        None => Ok(None),
    }
}

/// Concrete node geometry for one key/value type pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Block size in bytes.
    pub block_size: usize,
    /// Serialized key size.
    pub key_size: usize,
    /// Serialized value size.
    pub value_size: usize,
    /// Maximum entries per leaf (L).
    pub leaf_capacity: usize,
    /// Maximum children per index node (M).
    pub fanout: usize,
}

impl Layout {
    /// Derive the layout for `config` and the given key/value sizes.
    pub fn derive(
        config: &TreeConfig,
        key_size: usize,
        value_size: usize,
    ) -> Result<Self, ConfigError> {
        if config.block_size < MIN_BLOCK_SIZE || u32::try_from(config.block_size).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "block_size".to_string(),
                message: format!(
                    "{} is outside {MIN_BLOCK_SIZE}..={}",
                    config.block_size,
                    u32::MAX
                ),
            });
        }

        let payload = config.block_size - NODE_PAYLOAD_OFFSET;
        let max_leaf = payload / (key_size + value_size).max(1);
        let max_fanout = payload / (key_size + CHILD_ID_SIZE);
        if max_leaf < MIN_CAPACITY || max_fanout < MIN_CAPACITY {
            return Err(ConfigError::BlockTooSmall {
                block_size: config.block_size,
                key_size,
                value_size,
            });
        }

        let leaf_capacity = capped("leaf_capacity", config.leaf_capacity, max_leaf)?;
        let fanout = capped("fanout", config.fanout, max_fanout)?;

        Ok(Self {
            block_size: config.block_size,
            key_size,
            value_size,
            leaf_capacity,
            fanout,
        })
    }

    /// Minimum entries a non-root leaf keeps: ⌈L/2⌉.
    #[must_use]
    pub const fn leaf_floor(&self) -> usize {
        self.leaf_capacity.div_ceil(2)
    }

    /// Minimum children a non-root index node keeps: ⌈M/2⌉.
    #[must_use]
    pub const fn index_floor(&self) -> usize {
        self.fanout.div_ceil(2)
    }
}

fn capped(name: &'static str, requested: Option<usize>, max: usize) -> Result<usize, ConfigError> {
    match requested {
        None => Ok(max),
        Some(value) if (MIN_CAPACITY..=max).contains(&value) => Ok(value),
        Some(value) => Err(ConfigError::CapacityOutOfRange {
            name,
            value,
            min: MIN_CAPACITY,
            max,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = TreeConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(config.leaf_capacity, None);
        assert_eq!(config.fanout, None);
    }

    #[test]
    fn test_from_lookup_defaults_when_unset() {
        let config = TreeConfig::from_lookup(lookup_from(&[])).expect("load");
        assert_eq!(config, TreeConfig::default());
    }

    #[test]
    fn test_from_lookup_reads_overrides() {
        let config = TreeConfig::from_lookup(lookup_from(&[
            ("BPTREE_BLOCK_SIZE", "1024"),
            ("BPTREE_LEAF_CAPACITY", "4"),
            ("BPTREE_FANOUT", " 5 "),
        ]))
        .expect("load");
        assert_eq!(config.block_size, 1024);
        assert_eq!(config.leaf_capacity, Some(4));
        assert_eq!(config.fanout, Some(5));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let error = TreeConfig::from_lookup(lookup_from(&[("BPTREE_FANOUT", "many")]))
            .expect_err("should fail");
        assert_eq!(
            error.to_string(),
            "invalid value for BPTREE_FANOUT: 'many' is not a non-negative integer"
        );
    }

    #[test]
    fn test_layout_derives_capacities_from_block_size() {
        let layout = Layout::derive(&TreeConfig::default(), 8, 8).expect("derive");
        let payload = 4096 - NODE_PAYLOAD_OFFSET;
        assert_eq!(layout.leaf_capacity, payload / 16);
        assert_eq!(layout.fanout, payload / 16);
    }

    #[test]
    fn test_layout_honors_smaller_caps() {
        let config = TreeConfig::default().with_leaf_capacity(4).with_fanout(5);
        let layout = Layout::derive(&config, 8, 8).expect("derive");
        assert_eq!(layout.leaf_capacity, 4);
        assert_eq!(layout.fanout, 5);
        assert_eq!(layout.leaf_floor(), 2);
        assert_eq!(layout.index_floor(), 3);
    }

    #[test]
    fn test_layout_rejects_caps_out_of_range() {
        let too_small = TreeConfig::default().with_leaf_capacity(2);
        assert!(matches!(
            Layout::derive(&too_small, 8, 8),
            Err(ConfigError::CapacityOutOfRange { name: "leaf_capacity", .. })
        ));

        let too_large = TreeConfig::default().with_fanout(100_000);
        assert!(matches!(
            Layout::derive(&too_large, 8, 8),
            Err(ConfigError::CapacityOutOfRange { name: "fanout", .. })
        ));
    }

    #[test]
    fn test_layout_rejects_tiny_blocks() {
        let config = TreeConfig::default().with_block_size(256);
        assert!(matches!(
            Layout::derive(&config, 64, 64),
            Err(ConfigError::BlockTooSmall { .. })
        ));

        let config = TreeConfig::default().with_block_size(64);
        assert!(matches!(
            Layout::derive(&config, 8, 8),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
