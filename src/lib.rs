//! histree: a disk-backed State History Tree
//!
//! This crate persists the evolution of attribute values over time. Intervals
//! (`attribute` held `value` during `[start, end]`) arrive in chronological
//! order and are packed into fixed-size blocks organized as a tree, so that
//! point and range queries only touch the blocks covering the requested time.
//!
//! The tree is built by a single writer. While building, the root-to-leaf path
//! currently receiving intervals (the "latest branch") lives in memory; every
//! other node is sealed, written once and then served from a small
//! direct-mapped cache or from disk.

#![warn(missing_docs)]

/// Little-endian cursor helpers for block layouts
pub mod encoding;

/// Intervals, state values and the interval codec
pub mod interval;

/// Nodes, file header and node I/O
pub mod storage;

/// History tree construction and queries
pub mod tree;

// Re-exports
pub use config::TreeConfig;
pub use error::{Error, Result};
pub use interval::{Interval, StateValue};
pub use storage::{CacheStats, Node, NodeKind};
pub use tree::{HistoryTree, IntegrityReport, RangeIter, RangeQuery};

/// Error types for history tree operations
pub mod error {
    use std::io;

    /// Errors that can occur while building, opening or querying a history tree
    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        /// An interval or query time is outside what the tree accepts
        #[error("invalid time range: {0}")]
        TimeRange(String),

        /// A variable-length value does not fit its length prefix
        #[error("value too large: {len} bytes (max {max})")]
        ValueTooLarge {
            /// Payload length
            len: usize,
            /// Largest accepted payload
            max: usize,
        },

        /// An interval can never fit in a node of the configured block size
        #[error("interval of {size} bytes cannot fit in a node ({capacity} bytes available)")]
        IntervalTooLarge {
            /// Serialized interval size
            size: usize,
            /// Free space of an empty core node
            capacity: usize,
        },

        /// Bytes on disk do not describe a valid tree or node
        #[error("corrupt data: {0}")]
        CorruptData(String),

        /// The file was written with an incompatible major version
        #[error("unsupported file version {found} (expected {expected})")]
        VersionMismatch {
            /// Version recorded in the file
            found: i32,
            /// Version this build reads
            expected: i32,
        },

        /// The backing file was closed while the tree was still in use
        #[error("history file channel is closed")]
        ChannelClosed,

        /// A node could not be read from disk
        #[error("node {seq} could not be read")]
        NodeUnavailable {
            /// Sequence number of the node
            seq: u32,
        },

        /// The tree is finished and no longer accepts writes
        #[error("history tree is read-only")]
        ReadOnly,

        /// The operation needs a closed tree
        #[error("history tree is still being built")]
        NotFinished,

        /// Invalid configuration
        #[error("configuration error: {0}")]
        Config(String),

        /// Integrity verification found an inconsistency
        #[error("integrity check failed: {0}")]
        Integrity(String),

        /// An I/O error occurred
        #[error("I/O error: {0}")]
        Io(#[from] io::Error),
    }

    /// Result alias used throughout the crate
    pub type Result<T> = std::result::Result<T, Error>;
}

/// Configuration options for history trees
pub mod config {
    use crate::error::{Error, Result};
    use crate::storage::node::{COMMON_HEADER_SIZE, core_header_size};
    use crate::interval::DATA_ENTRY_SIZE;
    use std::path::PathBuf;

    /// Default block size (64KB)
    pub const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

    /// Default maximum number of children per core node
    pub const DEFAULT_MAX_CHILDREN: usize = 50;

    /// Default number of node cache slots
    pub const DEFAULT_CACHE_SIZE: usize = 256;

    /// Configuration for a history tree
    ///
    /// Immutable once the tree is created; every node receives the block size
    /// and child capacity from here.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TreeConfig {
        /// Path to the history file
        pub path: PathBuf,
        /// Size of each node block in bytes
        pub block_size: usize,
        /// Maximum number of children per core node
        pub max_children: usize,
        /// Earliest timestamp the tree accepts
        pub tree_start: i64,
        /// Version of the producer feeding the tree, stored as the minor version
        pub provider_version: i32,
        /// Number of direct-mapped cache slots (power of two)
        pub cache_size: usize,
    }

    impl Default for TreeConfig {
        fn default() -> Self {
            Self {
                path: PathBuf::from("state_history.ht"),
                block_size: DEFAULT_BLOCK_SIZE,
                max_children: DEFAULT_MAX_CHILDREN,
                tree_start: 0,
                provider_version: 0,
                cache_size: DEFAULT_CACHE_SIZE,
            }
        }
    }

    impl TreeConfig {
        /// Create a configuration for the given file with default geometry
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self {
                path: path.into(),
                ..Default::default()
            }
        }

        /// Set the node block size
        pub fn with_block_size(mut self, block_size: usize) -> Self {
            self.block_size = block_size;
            self
        }

        /// Set the maximum number of children per core node
        pub fn with_max_children(mut self, max_children: usize) -> Self {
            self.max_children = max_children;
            self
        }

        /// Set the earliest accepted timestamp
        pub fn with_tree_start(mut self, tree_start: i64) -> Self {
            self.tree_start = tree_start;
            self
        }

        /// Set the producer version
        pub fn with_provider_version(mut self, version: i32) -> Self {
            self.provider_version = version;
            self
        }

        /// Set the number of node cache slots
        pub fn with_cache_size(mut self, cache_size: usize) -> Self {
            self.cache_size = cache_size;
            self
        }

        /// Check that the geometry can hold at least one interval per node
        pub fn validate(&self) -> Result<()> {
            if self.tree_start < 0 {
                return Err(Error::Config(format!(
                    "tree start must be non-negative, got {}",
                    self.tree_start
                )));
            }
            if self.max_children < 2 || self.max_children > i32::MAX as usize {
                return Err(Error::Config(format!(
                    "max children must be at least 2, got {}",
                    self.max_children
                )));
            }
            if self.cache_size == 0 || !self.cache_size.is_power_of_two() {
                return Err(Error::Config(format!(
                    "cache size must be a power of two, got {}",
                    self.cache_size
                )));
            }
            let minimum = COMMON_HEADER_SIZE + core_header_size(self.max_children) + DATA_ENTRY_SIZE;
            if self.block_size < minimum || self.block_size > i32::MAX as usize {
                return Err(Error::Config(format!(
                    "block size {} too small for {} children (minimum {})",
                    self.block_size, self.max_children, minimum
                )));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TreeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_bad_geometry() {
        let config = TreeConfig::default().with_cache_size(100);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = TreeConfig::default().with_max_children(1);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = TreeConfig::default().with_block_size(128).with_max_children(50);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = TreeConfig::default().with_tree_start(-5);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_error_messages() {
        let err = Error::VersionMismatch { found: 3, expected: 1 };
        assert_eq!(err.to_string(), "unsupported file version 3 (expected 1)");
        assert_eq!(Error::NodeUnavailable { seq: 7 }.to_string(), "node 7 could not be read");
    }
}
