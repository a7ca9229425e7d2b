//! Storage module
//!
//! This module provides the on-disk side of the history tree: node blocks,
//! the file header, and the node I/O layer with its direct-mapped cache.

pub mod cache;
pub mod header;
pub mod node;
pub mod node_io;

// Re-export key types and functions
pub use cache::{CacheStats, NodeCache};
pub use header::{FILE_MAJOR_VERSION, HISTORY_FILE_MAGIC, TREE_HEADER_SIZE, TreeHeader};
pub use node::{COMMON_HEADER_SIZE, CoreData, Node, NodeKind, NodeType, core_header_size};
pub use node_io::NodeIo;
