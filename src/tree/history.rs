//! History tree construction
//!
//! The tree grows only at its right edge. The nodes on the path from the root
//! to the newest leaf form the latest branch: they are the only mutable nodes
//! and they stay in memory. When a node runs out of room, it and everything
//! below it are sealed, written to disk, and replaced with fresh siblings that
//! start right after the current tree end. When the root itself is full, a new
//! root is promoted above it and the tree grows one level deeper.

use std::io::Write;
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use crate::config::TreeConfig;
use crate::error::{Error, Result};
use crate::interval::{Interval, StateValue};
use crate::storage::{
    COMMON_HEADER_SIZE, CacheStats, Node, NodeIo, NodeType, TREE_HEADER_SIZE, TreeHeader,
    core_header_size,
};

/// A node borrowed from the live branch or shared from the sealed store
pub(crate) enum NodeRef<'a> {
    Live(&'a Node),
    Sealed(Arc<Node>),
}

impl Deref for NodeRef<'_> {
    type Target = Node;

    fn deref(&self) -> &Node {
        match self {
            NodeRef::Live(node) => *node,
            NodeRef::Sealed(node) => &**node,
        }
    }
}

/// Disk-backed tree of intervals
pub struct HistoryTree {
    config: TreeConfig,
    io: NodeIo,
    /// Latest timestamp covered by the tree
    tree_end: i64,
    /// Sequence number the next node receives
    node_count: u32,
    /// Mutable root-to-leaf path while building; empty once finished
    latest_branch: Vec<Node>,
    /// Root-to-leaf path of a finished tree
    sealed_branch: Vec<Arc<Node>>,
}

impl HistoryTree {
    /// Create a new tree, truncating any file at `config.path`
    ///
    /// The tree starts as a single empty leaf, which is also its root.
    pub fn create(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let io = NodeIo::create(&config)?;
        log::info!(
            "creating history tree {} (block {} bytes, {} children, start {})",
            config.path.display(),
            config.block_size,
            config.max_children,
            config.tree_start
        );

        let mut tree = Self {
            tree_end: config.tree_start,
            config,
            io,
            node_count: 0,
            latest_branch: Vec::new(),
            sealed_branch: Vec::new(),
        };
        let root = tree.new_node(NodeType::Leaf, None, tree.config.tree_start);
        tree.latest_branch.push(root);
        Ok(tree)
    }

    /// Open a finished tree from disk
    ///
    /// Geometry and start time come from the file header; only `path` and
    /// `cache_size` are taken from `config`. The reopened tree is read-only.
    pub fn open(config: TreeConfig) -> Result<Self> {
        config.validate()?;
        let mut io = NodeIo::open(&config)?;
        let header = io.read_header()?;

        let config = header.to_config(config);
        config.validate().map_err(|e| match e {
            Error::Config(msg) => Error::CorruptData(format!("header geometry: {}", msg)),
            other => other,
        })?;
        io.reconfigure(&config);

        let file_size = io.file_size()?;
        let nodes_end = (header.node_count as u64)
            .checked_mul(config.block_size as u64)
            .and_then(|bytes| bytes.checked_add(TREE_HEADER_SIZE as u64));
        if nodes_end.is_none_or(|nodes_end| file_size < nodes_end) {
            return Err(Error::CorruptData(format!(
                "header records {} nodes of {} bytes but the file is only {} bytes",
                header.node_count, config.block_size, file_size
            )));
        }

        let sealed_branch = Self::rebuild_latest_branch(&io, &header)?;
        let root = &sealed_branch[0];
        if root.parent().is_some() {
            return Err(Error::CorruptData(format!(
                "root node {} has a parent",
                root.sequence_number()
            )));
        }
        if root.start() != header.tree_start {
            return Err(Error::CorruptData(format!(
                "root starts at {} but the header records {}",
                root.start(),
                header.tree_start
            )));
        }
        let tree_end = root
            .end()
            .ok_or_else(|| Error::CorruptData("root node was never closed".to_string()))?;

        log::info!(
            "opened history tree {} ({} nodes, depth {}, [{}, {}])",
            config.path.display(),
            header.node_count,
            sealed_branch.len(),
            header.tree_start,
            tree_end
        );

        Ok(Self {
            config,
            io,
            tree_end,
            node_count: header.node_count as u32,
            latest_branch: Vec::new(),
            sealed_branch,
        })
    }

    /// Open the tree stored at `path` with `cache_size` node cache slots
    pub fn open_existing(path: impl AsRef<Path>, cache_size: usize) -> Result<Self> {
        Self::open(TreeConfig::new(path.as_ref()).with_cache_size(cache_size))
    }

    /// Follow latest-child pointers from the root down to the leaf
    fn rebuild_latest_branch(io: &NodeIo, header: &TreeHeader) -> Result<Vec<Arc<Node>>> {
        let mut branch = vec![io.read_node(header.root_seq as u32)?];
        while let Some(child) = branch[branch.len() - 1].latest_child() {
            if branch.len() > header.node_count as usize || child as i32 >= header.node_count {
                return Err(Error::CorruptData(format!(
                    "latest branch points at node {} outside of {} nodes",
                    child, header.node_count
                )));
            }
            branch.push(io.read_node(child)?);
        }
        Ok(branch)
    }

    /// Insert an interval built from its parts
    pub fn insert_interval(
        &mut self,
        start: i64,
        end: i64,
        attribute: i32,
        value: impl Into<StateValue>,
    ) -> Result<()> {
        self.insert(Interval::new(start, end, attribute, value)?)
    }

    /// Insert an interval
    ///
    /// Intervals must be inserted in non-decreasing order of end time, which is
    /// the order in which a state system closes them.
    pub fn insert(&mut self, interval: Interval) -> Result<()> {
        if self.is_finished() {
            return Err(Error::ReadOnly);
        }
        if interval.start() < self.config.tree_start {
            return Err(Error::TimeRange(format!(
                "interval start {} is before the tree start {}",
                interval.start(),
                self.config.tree_start
            )));
        }
        let capacity =
            self.config.block_size - COMMON_HEADER_SIZE - core_header_size(self.config.max_children);
        if interval.size_on_disk() > capacity {
            return Err(Error::IntervalTooLarge {
                size: interval.size_on_disk(),
                capacity,
            });
        }

        let deepest = self.latest_branch.len() - 1;
        self.try_insert_at(interval, deepest)
    }

    fn try_insert_at(&mut self, interval: Interval, mut index: usize) -> Result<()> {
        loop {
            let target = &self.latest_branch[index];

            if interval.size_on_disk() > target.free_space() {
                self.add_sibling(index)?;
                index = self.latest_branch.len() - 1;
                continue;
            }

            if interval.start() < target.start() {
                assert!(
                    index > 0,
                    "interval starting at {} precedes the root node",
                    interval.start()
                );
                index -= 1;
                continue;
            }

            let end = interval.end();
            self.latest_branch[index].add_interval(interval);
            self.tree_end = self.tree_end.max(end);
            return Ok(());
        }
    }

    /// Replace `latest_branch[index..]` with fresh nodes starting after `tree_end`
    fn add_sibling(&mut self, mut index: usize) -> Result<()> {
        loop {
            if index == 0 {
                return self.add_new_root();
            }
            if self.latest_branch[index - 1].nb_children() < self.config.max_children {
                break;
            }
            index -= 1;
        }

        let split_time = self.tree_end;
        log::debug!(
            "splitting latest branch at depth {} (time {}, {} nodes)",
            index,
            split_time,
            self.node_count
        );

        for level in index..self.latest_branch.len() {
            let node_type = self.latest_branch[level].node_type();
            let parent_seq = self.latest_branch[level - 1].sequence_number();
            let sibling = self.new_node(node_type, Some(parent_seq), split_time + 1);
            let sibling_seq = sibling.sequence_number();

            let old = std::mem::replace(&mut self.latest_branch[level], sibling);
            self.seal(old, split_time)?;
            self.latest_branch[level - 1].link_child(sibling_seq, split_time + 1);
        }
        Ok(())
    }

    /// Put a new root above the whole latest branch and rebuild a deeper branch
    fn add_new_root(&mut self) -> Result<()> {
        let split_time = self.tree_end;
        let depth = self.latest_branch.len();
        let mut new_root = self.new_node(NodeType::Core, None, self.config.tree_start);
        log::debug!(
            "promoting new root {} at time {} (depth {} -> {})",
            new_root.sequence_number(),
            split_time,
            depth,
            depth + 1
        );

        let old_branch = std::mem::take(&mut self.latest_branch);
        let old_root_seq = old_branch[0].sequence_number();
        let old_root_start = old_branch[0].start();
        for (level, mut node) in old_branch.into_iter().enumerate() {
            if level == 0 {
                node.set_parent(new_root.sequence_number());
            }
            self.seal(node, split_time)?;
        }
        new_root.link_child(old_root_seq, old_root_start);
        self.latest_branch.push(new_root);

        for level in 1..=depth {
            let node_type = if level == depth {
                NodeType::Leaf
            } else {
                NodeType::Core
            };
            let parent_seq = self.latest_branch[level - 1].sequence_number();
            let node = self.new_node(node_type, Some(parent_seq), split_time + 1);
            self.latest_branch[level - 1].link_child(node.sequence_number(), split_time + 1);
            self.latest_branch.push(node);
        }
        Ok(())
    }

    fn new_node(&mut self, node_type: NodeType, parent: Option<u32>, start: i64) -> Node {
        let seq = self.node_count;
        self.node_count += 1;
        match node_type {
            NodeType::Core => Node::new_core(&self.config, seq, parent, start),
            NodeType::Leaf => Node::new_leaf(&self.config, seq, parent, start),
        }
    }

    /// Close a node at `end`, persist it and hand back the shared read-only copy
    fn seal(&self, mut node: Node, end: i64) -> Result<Arc<Node>> {
        node.close(end);
        let node = Arc::new(node);
        self.io.write_node(&node)?;
        Ok(node)
    }

    /// Finish the tree: seal the latest branch at `end` and write the header
    ///
    /// The tree end becomes `max(end, tree_end)`: a later `end` extends the
    /// covered range, while an `end` earlier than the current tree end is
    /// ignored so that no inserted interval is cut off.
    pub fn close_tree(&mut self, end: i64) -> Result<()> {
        if self.is_finished() {
            return Err(Error::ReadOnly);
        }
        let end = end.max(self.tree_end);
        self.tree_end = end;

        let branch = std::mem::take(&mut self.latest_branch);
        let mut sealed = Vec::with_capacity(branch.len());
        for node in branch {
            sealed.push(self.seal(node, end)?);
        }
        let root_seq = sealed[0].sequence_number();
        self.sealed_branch = sealed;

        self.io
            .write_header(&TreeHeader::new(&self.config, self.node_count, root_seq))?;
        log::info!(
            "closed history tree {} at {} ({} nodes, depth {})",
            self.config.path.display(),
            end,
            self.node_count,
            self.depth()
        );
        Ok(())
    }

    /// Fetch a node, preferring the in-memory branch over node I/O
    pub(crate) fn read_node(&self, seq: u32) -> Result<NodeRef<'_>> {
        if let Some(node) = self
            .latest_branch
            .iter()
            .find(|node| node.sequence_number() == seq)
        {
            return Ok(NodeRef::Live(node));
        }
        if let Some(node) = self
            .sealed_branch
            .iter()
            .find(|node| node.sequence_number() == seq)
        {
            return Ok(NodeRef::Sealed(Arc::clone(node)));
        }
        self.io.read_node(seq).map(NodeRef::Sealed)
    }

    /// Fetch any node by sequence number
    pub fn node(&self, seq: u32) -> Result<Arc<Node>> {
        if seq >= self.node_count {
            return Err(Error::NodeUnavailable { seq });
        }
        match self.read_node(seq)? {
            NodeRef::Live(node) => Ok(Arc::new(node.clone())),
            NodeRef::Sealed(node) => Ok(node),
        }
    }

    fn root(&self) -> &Node {
        match self.latest_branch.first() {
            Some(node) => node,
            None => &self.sealed_branch[0],
        }
    }

    /// Sequence number of the root node
    pub fn root_sequence_number(&self) -> u32 {
        self.root().sequence_number()
    }

    /// Configuration in effect, with geometry read back from the header when reopened
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Earliest timestamp of the tree
    pub fn tree_start(&self) -> i64 {
        self.config.tree_start
    }

    /// Latest timestamp covered by the tree; never decreases
    pub fn tree_end(&self) -> i64 {
        self.tree_end
    }

    /// Number of nodes created so far
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// Length of the root-to-leaf path
    pub fn depth(&self) -> usize {
        self.latest_branch.len().max(self.sealed_branch.len())
    }

    /// Whether the tree was closed or opened from disk
    pub fn is_finished(&self) -> bool {
        self.latest_branch.is_empty()
    }

    /// Sequence numbers of the current root-to-leaf path
    pub fn latest_branch(&self) -> Vec<u32> {
        if self.is_finished() {
            self.sealed_branch.iter().map(|n| n.sequence_number()).collect()
        } else {
            self.latest_branch.iter().map(Node::sequence_number).collect()
        }
    }

    /// Current size of the history file
    pub fn file_size(&self) -> Result<u64> {
        self.io.file_size()
    }

    /// Hit and miss counters of the node cache
    pub fn cache_stats(&self) -> CacheStats {
        self.io.cache_stats()
    }

    /// Drop every cached node so subsequent reads go to disk
    pub fn clear_cache(&self) {
        self.io.clear_cache();
    }

    /// Close the file handle; later disk reads fail with `ChannelClosed`
    pub fn close_file(&self) {
        self.io.close_file();
    }

    /// Offset right after the last node, where the attribute trailer lives
    pub fn trailer_offset(&self) -> u64 {
        self.io.node_offset(self.node_count)
    }

    /// Append collaborator data (typically the attribute tree) after the last node
    pub fn write_trailer(&self, bytes: &[u8]) -> Result<()> {
        if !self.is_finished() {
            return Err(Error::NotFinished);
        }
        self.io.write_at(self.trailer_offset(), bytes)
    }

    /// Read the data stored after the last node
    pub fn read_trailer(&self) -> Result<Vec<u8>> {
        if !self.is_finished() {
            return Err(Error::NotFinished);
        }
        self.io.read_to_end_from(self.trailer_offset())
    }

    /// Close the tree's file and delete it
    pub fn delete_file(self) -> Result<()> {
        let path = self.config.path.clone();
        drop(self);
        std::fs::remove_file(&path)?;
        log::info!("deleted history file {}", path.display());
        Ok(())
    }

    /// Print every node, root first, with its intervals when `verbose`
    pub fn dump<W: Write>(&self, out: &mut W, verbose: bool) -> Result<()> {
        writeln!(
            out,
            "history tree {} [{}, {}], {} nodes, depth {}",
            self.config.path.display(),
            self.tree_start(),
            self.tree_end,
            self.node_count,
            self.depth()
        )?;

        let mut queue = std::collections::VecDeque::from([(self.root_sequence_number(), 0usize)]);
        while let Some((seq, level)) = queue.pop_front() {
            let node = self.read_node(seq)?;
            writeln!(out, "{}{}", "  ".repeat(level), *node)?;
            if verbose {
                for interval in node.intervals() {
                    writeln!(out, "{}  {}", "  ".repeat(level), interval)?;
                }
            }
            if let Some(core) = node.core() {
                queue.extend(core.children().iter().map(|child| (*child, level + 1)));
            }
        }
        Ok(())
    }
}
