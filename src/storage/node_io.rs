//! Node I/O: block reads and writes for a history file
//!
//! Node `seq` lives at `TREE_HEADER_SIZE + seq * block_size`. All disk access
//! and the node cache sit behind one mutex, so reads and writes on the shared
//! file handle never interleave.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::TreeConfig;
use crate::error::{Error, Result};

use super::cache::{CacheStats, NodeCache};
use super::header::{TREE_HEADER_SIZE, TreeHeader};
use super::node::Node;

struct IoState {
    /// `None` once the channel has been closed
    file: Option<File>,
    cache: NodeCache,
}

/// Reads and writes node blocks of one history file
pub struct NodeIo {
    config: TreeConfig,
    state: Mutex<IoState>,
}

impl NodeIo {
    /// Create (or truncate) the history file for a new tree
    ///
    /// A zeroed header block is written up front so that a build that never
    /// reaches `close_tree` leaves a file that fails to open.
    pub fn create(config: &TreeConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&config.path)?;
        file.write_all(&[0u8; TREE_HEADER_SIZE])?;

        Ok(Self::with_file(config, file))
    }

    /// Open an existing history file for reading
    pub fn open(config: &TreeConfig) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(&config.path)?;
        Ok(Self::with_file(config, file))
    }

    fn with_file(config: &TreeConfig, file: File) -> Self {
        Self {
            config: config.clone(),
            state: Mutex::new(IoState {
                file: Some(file),
                cache: NodeCache::new(config.cache_size),
            }),
        }
    }

    /// Re-bind this I/O layer to the geometry recorded in a file header
    pub fn reconfigure(&mut self, config: &TreeConfig) {
        self.config = config.clone();
        let state = self.state.get_mut();
        state.cache = NodeCache::new(config.cache_size);
    }

    /// File offset of node `seq`
    pub fn node_offset(&self, seq: u32) -> u64 {
        TREE_HEADER_SIZE as u64 + seq as u64 * self.config.block_size as u64
    }

    /// Read a node, from the cache if possible
    ///
    /// A closed channel is reported as [`Error::ChannelClosed`]. Other I/O
    /// failures are logged and reported as [`Error::NodeUnavailable`]; a block
    /// that decodes to garbage is [`Error::CorruptData`].
    pub fn read_node(&self, seq: u32) -> Result<Arc<Node>> {
        let mut state = self.state.lock();
        if let Some(node) = state.cache.get(seq) {
            return Ok(node);
        }

        let offset = self.node_offset(seq);
        let file = state.file.as_mut().ok_or(Error::ChannelClosed)?;
        log::trace!("cache miss for node {}, reading at offset {}", seq, offset);

        let mut block = vec![0u8; self.config.block_size];
        if let Err(e) = file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(&mut block))
        {
            log::error!("failed to read node {} at offset {}: {}", seq, offset, e);
            return Err(Error::NodeUnavailable { seq });
        }

        let node = Node::read_from(&block, &self.config)?;
        if node.sequence_number() != seq {
            return Err(Error::CorruptData(format!(
                "block at offset {} holds node {}, expected {}",
                offset,
                node.sequence_number(),
                seq
            )));
        }

        let node = Arc::new(node);
        state.cache.put(Arc::clone(&node));
        Ok(node)
    }

    /// Persist a sealed node, caching it once the write succeeded
    pub fn write_node(&self, node: &Arc<Node>) -> Result<()> {
        assert!(node.is_done(), "node {} written before being closed", node.sequence_number());
        let block = node.to_block();
        let offset = self.node_offset(node.sequence_number());

        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or(Error::ChannelClosed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&block)?;
        state.cache.put(Arc::clone(node));
        Ok(())
    }

    /// Write the header block at offset 0 and flush the file
    pub fn write_header(&self, header: &TreeHeader) -> Result<()> {
        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or(Error::ChannelClosed)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Read and validate the header block
    pub fn read_header(&self) -> Result<TreeHeader> {
        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or(Error::ChannelClosed)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Err(Error::CorruptData("history file is empty".to_string()));
        }
        if len < TREE_HEADER_SIZE as u64 {
            return Err(Error::CorruptData(format!(
                "history file is {} bytes, shorter than its header",
                len
            )));
        }
        let mut bytes = vec![0u8; TREE_HEADER_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut bytes)?;
        TreeHeader::from_bytes(&bytes)
    }

    /// Write raw bytes at `offset`, flushing afterwards
    pub fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or(Error::ChannelClosed)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        file.flush()?;
        Ok(())
    }

    /// Read everything from `offset` to the end of the file
    pub fn read_to_end_from(&self, offset: u64) -> Result<Vec<u8>> {
        let mut state = self.state.lock();
        let file = state.file.as_mut().ok_or(Error::ChannelClosed)?;
        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(offset))?;
        file.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    /// Current size of the backing file
    pub fn file_size(&self) -> Result<u64> {
        let state = self.state.lock();
        let file = state.file.as_ref().ok_or(Error::ChannelClosed)?;
        Ok(file.metadata()?.len())
    }

    /// Close the file handle; later disk accesses fail with `ChannelClosed`
    pub fn close_file(&self) {
        let mut state = self.state.lock();
        if state.file.take().is_some() {
            log::debug!("closed history file {}", self.config.path.display());
        }
    }

    /// Whether `close_file` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().file.is_none()
    }

    /// Hit and miss counters of the node cache
    pub fn cache_stats(&self) -> CacheStats {
        self.state.lock().cache.stats()
    }

    /// Whether node `seq` is currently held by the cache
    pub fn is_cached(&self, seq: u32) -> bool {
        self.state.lock().cache.contains(seq)
    }

    /// Drop every cached node so later reads go to disk
    pub fn clear_cache(&self) {
        self.state.lock().cache.clear();
    }
}
