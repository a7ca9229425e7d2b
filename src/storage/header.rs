//! Fixed-size file header
//!
//! The header occupies the first [`TREE_HEADER_SIZE`] bytes of a history file
//! and is written last, when the tree is closed. A file whose build never
//! finished therefore has no valid magic number and is rejected on open.

use crate::config::TreeConfig;
use crate::encoding::{BlockReader, BlockWriter};
use crate::error::{Error, Result};

/// Size of the header block (4KB)
pub const TREE_HEADER_SIZE: usize = 4096;

/// Magic number identifying history files ("HST1" little-endian)
pub const HISTORY_FILE_MAGIC: i32 = i32::from_le_bytes(*b"HST1");

/// Major file format version; files with another major version are refused
pub const FILE_MAJOR_VERSION: i32 = 1;

/// Tree-wide metadata stored at offset 0
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeHeader {
    /// Magic number for file format identification
    pub magic: i32,
    /// Major version of the file format
    pub major_version: i32,
    /// Minor version, informational (the provider version)
    pub minor_version: i32,
    /// Size of each node block
    pub block_size: i32,
    /// Maximum number of children per core node
    pub max_children: i32,
    /// Number of nodes written
    pub node_count: i32,
    /// Sequence number of the root node
    pub root_seq: i32,
    /// Earliest timestamp of the tree
    pub tree_start: i64,
}

impl TreeHeader {
    /// Create a header describing a finished tree
    pub fn new(config: &TreeConfig, node_count: u32, root_seq: u32) -> Self {
        Self {
            magic: HISTORY_FILE_MAGIC,
            major_version: FILE_MAJOR_VERSION,
            minor_version: config.provider_version,
            block_size: config.block_size as i32,
            max_children: config.max_children as i32,
            node_count: node_count as i32,
            root_seq: root_seq as i32,
            tree_start: config.tree_start,
        }
    }

    /// Serialize to a full header block
    pub fn to_bytes(&self) -> [u8; TREE_HEADER_SIZE] {
        let mut bytes = [0u8; TREE_HEADER_SIZE];
        let mut writer = BlockWriter::new(&mut bytes);
        writer.put_i32(self.magic);
        writer.put_i32(self.major_version);
        writer.put_i32(self.minor_version);
        writer.put_i32(self.block_size);
        writer.put_i32(self.max_children);
        writer.put_i32(self.node_count);
        writer.put_i32(self.root_seq);
        writer.put_i64(self.tree_start);
        bytes
    }

    /// Deserialize and validate a header block
    ///
    /// Checks the magic number, the major version, and that the geometry and
    /// node references are plausible. Minor versions are not checked.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = BlockReader::new(bytes);
        let header = Self {
            magic: reader.get_i32()?,
            major_version: reader.get_i32()?,
            minor_version: reader.get_i32()?,
            block_size: reader.get_i32()?,
            max_children: reader.get_i32()?,
            node_count: reader.get_i32()?,
            root_seq: reader.get_i32()?,
            tree_start: reader.get_i64()?,
        };

        if header.magic != HISTORY_FILE_MAGIC {
            return Err(Error::CorruptData(format!(
                "wrong magic number {:#010x}",
                header.magic
            )));
        }
        if header.major_version != FILE_MAJOR_VERSION {
            return Err(Error::VersionMismatch {
                found: header.major_version,
                expected: FILE_MAJOR_VERSION,
            });
        }
        if header.block_size <= 0 || header.max_children <= 0 {
            return Err(Error::CorruptData(format!(
                "invalid geometry: block size {}, max children {}",
                header.block_size, header.max_children
            )));
        }
        if header.node_count <= 0 || header.root_seq < 0 || header.root_seq >= header.node_count {
            return Err(Error::CorruptData(format!(
                "root node {} outside of {} nodes",
                header.root_seq, header.node_count
            )));
        }
        Ok(header)
    }

    /// Rebuild the tree configuration recorded in the header
    pub fn to_config(&self, base: TreeConfig) -> TreeConfig {
        TreeConfig {
            block_size: self.block_size as usize,
            max_children: self.max_children as usize,
            tree_start: self.tree_start,
            provider_version: self.minor_version,
            ..base
        }
    }
}
