//! History tree node: a fixed-size block of intervals
//!
//! Every node starts with a common header, followed by a type-specific header
//! (core nodes keep their child pointers there). Interval data entries grow
//! forward from the end of the headers while their strings entries grow
//! backward from the end of the block:
//!
//! ```text
//! +--------+----------+-----------------> <-----------------+
//! | common | specific | data entries ...     ... strings    |
//! +--------+----------+-----------------> <-----------------+
//! ```
//!
//! A node is mutable only while it sits in the tree's latest branch. Once
//! closed it is written to disk exactly once and shared read-only.

use std::fmt;

use smallvec::SmallVec;

use crate::config::TreeConfig;
use crate::encoding::{BlockReader, BlockWriter};
use crate::error::{Error, Result};
use crate::interval::{DATA_ENTRY_SIZE, Interval};

/// Size of the header shared by all node types
///
/// type (1), sequence number (4), parent (4), start (8), end (8),
/// interval count (4), min interval start (8), strings section size (4)
pub const COMMON_HEADER_SIZE: usize = 1 + 4 + 4 + 8 + 8 + 4 + 8 + 4;

/// End time written for a node that was never closed
const NODE_END_OPEN: i64 = i64::MIN;

/// Parent sequence number written for the root
const NO_PARENT: i32 = -1;

/// Reserved extension pointer of core nodes
const EXTENSION_NONE: i32 = -1;

const TYPE_CORE: u8 = 1;
const TYPE_LEAF: u8 = 2;

/// Size of a core node's specific header for the given child capacity
///
/// extension (4), child count (4), children (4 each), child starts (8 each)
pub const fn core_header_size(max_children: usize) -> usize {
    4 + 4 + max_children * (4 + 8)
}

/// Node type as stored in the first byte of the block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    /// Interior node with child pointers
    Core,
    /// Bottom node of a branch
    Leaf,
}

impl NodeType {
    fn tag(self) -> u8 {
        match self {
            NodeType::Core => TYPE_CORE,
            NodeType::Leaf => TYPE_LEAF,
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Core => write!(f, "core"),
            NodeType::Leaf => write!(f, "leaf"),
        }
    }
}

/// Child pointers of a core node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreData {
    extension: i32,
    children: Vec<u32>,
    child_start: Vec<i64>,
}

impl CoreData {
    fn new(max_children: usize) -> Self {
        Self {
            extension: EXTENSION_NONE,
            children: Vec::with_capacity(max_children),
            child_start: Vec::with_capacity(max_children),
        }
    }

    /// Sequence numbers of the linked children, in link order
    pub fn children(&self) -> &[u32] {
        &self.children
    }

    /// Start time of each linked child
    pub fn child_starts(&self) -> &[i64] {
        &self.child_start
    }
}

/// Type-specific part of a node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    /// Interior node
    Core(CoreData),
    /// Leaf node, no specific header
    Leaf,
}

/// A history tree node
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    block_size: usize,
    max_children: usize,
    seq: u32,
    parent: Option<u32>,
    start: i64,
    end: Option<i64>,
    intervals: Vec<Interval>,
    data_size: usize,
    strings_size: usize,
    min_interval_start: Option<i64>,
    kind: NodeKind,
}

impl Node {
    /// Create an empty leaf node
    pub fn new_leaf(config: &TreeConfig, seq: u32, parent: Option<u32>, start: i64) -> Self {
        Self::with_kind(config, seq, parent, start, NodeKind::Leaf)
    }

    /// Create an empty core node
    pub fn new_core(config: &TreeConfig, seq: u32, parent: Option<u32>, start: i64) -> Self {
        let kind = NodeKind::Core(CoreData::new(config.max_children));
        Self::with_kind(config, seq, parent, start, kind)
    }

    fn with_kind(
        config: &TreeConfig,
        seq: u32,
        parent: Option<u32>,
        start: i64,
        kind: NodeKind,
    ) -> Self {
        Self {
            block_size: config.block_size,
            max_children: config.max_children,
            seq,
            parent,
            start,
            end: None,
            intervals: Vec::new(),
            data_size: 0,
            strings_size: 0,
            min_interval_start: None,
            kind,
        }
    }

    /// Position of the node in the file
    pub fn sequence_number(&self) -> u32 {
        self.seq
    }

    /// Parent sequence number, `None` for the root
    pub fn parent(&self) -> Option<u32> {
        self.parent
    }

    /// Re-parent this node (used when a new root is promoted above it)
    pub fn set_parent(&mut self, parent: u32) {
        assert!(!self.is_done(), "cannot re-parent sealed node {}", self.seq);
        self.parent = Some(parent);
    }

    /// Start of the node's time window
    pub fn start(&self) -> i64 {
        self.start
    }

    /// End time, known once the node is closed
    pub fn end(&self) -> Option<i64> {
        self.end
    }

    /// Whether the node has been closed
    pub fn is_done(&self) -> bool {
        self.end.is_some()
    }

    /// Core or leaf
    pub fn node_type(&self) -> NodeType {
        match self.kind {
            NodeKind::Core(_) => NodeType::Core,
            NodeKind::Leaf => NodeType::Leaf,
        }
    }

    /// Type-specific data
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Child pointers if this is a core node
    pub fn core(&self) -> Option<&CoreData> {
        match &self.kind {
            NodeKind::Core(core) => Some(core),
            NodeKind::Leaf => None,
        }
    }

    /// Intervals in insertion order, or by end time once closed
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Number of intervals held
    pub fn interval_count(&self) -> usize {
        self.intervals.len()
    }

    /// Smallest start time among the held intervals
    pub fn min_interval_start(&self) -> Option<i64> {
        self.min_interval_start
    }

    /// Combined size of the common and type-specific headers
    pub fn header_size(&self) -> usize {
        COMMON_HEADER_SIZE
            + match self.kind {
                NodeKind::Core(_) => core_header_size(self.max_children),
                NodeKind::Leaf => 0,
            }
    }

    /// Bytes still available for interval data and strings entries
    pub fn free_space(&self) -> usize {
        self.block_size - self.header_size() - self.data_size - self.strings_size
    }

    /// Whether `t` is within this node's time window
    ///
    /// An open node's window extends indefinitely.
    pub fn covers(&self, t: i64) -> bool {
        self.start <= t && self.end.is_none_or(|end| t <= end)
    }

    /// Whether this node's window overlaps `[t1, t2]`
    pub fn intersects(&self, t1: i64, t2: i64) -> bool {
        self.start <= t2 && self.end.is_none_or(|end| t1 <= end)
    }

    /// Append an interval
    ///
    /// The caller must have checked [`Node::free_space`] first.
    pub fn add_interval(&mut self, interval: Interval) {
        assert!(!self.is_done(), "cannot add to sealed node {}", self.seq);
        let size = interval.size_on_disk();
        assert!(
            size <= self.free_space(),
            "interval of {} bytes overflows node {} ({} free)",
            size,
            self.seq,
            self.free_space()
        );

        self.data_size += DATA_ENTRY_SIZE;
        self.strings_size += interval.strings_entry_size();
        self.min_interval_start = Some(
            self.min_interval_start
                .map_or(interval.start(), |min| min.min(interval.start())),
        );
        self.intervals.push(interval);
    }

    /// Seal the node at `end`, sorting its intervals by end time
    pub fn close(&mut self, end: i64) {
        assert!(!self.is_done(), "node {} closed twice", self.seq);
        debug_assert!(
            end >= self.start || self.intervals.is_empty(),
            "node {} closed at {} before its start {}",
            self.seq,
            end,
            self.start
        );
        self.intervals.sort_by_key(Interval::end);
        self.end = Some(end);
    }

    /// Find the interval of `attribute` that contains `t`
    pub fn find_interval(&self, attribute: i32, t: i64) -> Option<&Interval> {
        self.intervals_at(t).find(|interval| interval.attribute() == attribute)
    }

    /// All intervals containing `t`
    ///
    /// Sealed nodes are sorted by end time, so the scan starts at the first
    /// interval that ends at or after `t`.
    pub fn intervals_at(&self, t: i64) -> impl Iterator<Item = &Interval> {
        let first = if self.is_done() {
            self.intervals.partition_point(|interval| interval.end() < t)
        } else {
            0
        };
        self.intervals[first..]
            .iter()
            .filter(move |interval| interval.contains(t))
    }

    /// Number of linked children (zero for leaves)
    pub fn nb_children(&self) -> usize {
        self.core().map_or(0, |core| core.children.len())
    }

    /// Sequence number of the most recently linked child
    pub fn latest_child(&self) -> Option<u32> {
        self.core().and_then(|core| core.children.last().copied())
    }

    /// Link a new child at the end of the child list
    pub fn link_child(&mut self, child_seq: u32, child_start: i64) {
        let seq = self.seq;
        let max_children = self.max_children;
        let NodeKind::Core(core) = &mut self.kind else {
            panic!("cannot link a child to leaf node {}", seq);
        };
        assert!(
            core.children.len() < max_children,
            "node {} already has {} children",
            seq,
            max_children
        );
        debug_assert!(
            core.child_start.last().is_none_or(|last| *last <= child_start),
            "children of node {} must be linked in start order",
            seq
        );
        core.children.push(child_seq);
        core.child_start.push(child_start);
    }

    /// The child whose window contains `t`: the last child starting at or before it
    pub fn select_child_for(&self, t: i64) -> Option<u32> {
        let core = self.core()?;
        let mut selected = None;
        for (i, start) in core.child_start.iter().enumerate() {
            if *start <= t {
                selected = Some(core.children[i]);
            } else {
                break;
            }
        }
        selected
    }

    /// Time window of child `i`, with an open end for the latest child of a live node
    ///
    /// Siblings are contiguous, so a child ends right before the next one
    /// starts; the last child ends with its parent.
    pub fn child_range(&self, i: usize) -> Option<(i64, Option<i64>)> {
        let core = self.core()?;
        let start = *core.child_start.get(i)?;
        let end = match core.child_start.get(i + 1) {
            Some(next) => Some(next - 1),
            None => self.end,
        };
        Some((start, end))
    }

    /// Children whose windows overlap `[t1, t2]`
    pub fn children_intersecting(&self, t1: i64, t2: i64) -> SmallVec<[u32; 8]> {
        let mut selected = SmallVec::new();
        if let Some(core) = self.core() {
            for i in 0..core.children.len() {
                if let Some((start, end)) = self.child_range(i) {
                    if start <= t2 && end.is_none_or(|end| t1 <= end) {
                        selected.push(core.children[i]);
                    }
                }
            }
        }
        selected
    }

    /// Serialize into a freshly allocated block
    pub fn to_block(&self) -> Vec<u8> {
        let mut block = vec![0u8; self.block_size];
        self.write_to(&mut block);
        block
    }

    /// Serialize into `block`, which must be exactly one block long
    pub fn write_to(&self, block: &mut [u8]) {
        assert_eq!(block.len(), self.block_size, "block buffer has the wrong size");
        let mut writer = BlockWriter::new(block);

        writer.put_u8(self.node_type().tag());
        writer.put_i32(self.seq as i32);
        writer.put_i32(self.parent.map_or(NO_PARENT, |p| p as i32));
        writer.put_i64(self.start);
        writer.put_i64(self.end.unwrap_or(NODE_END_OPEN));
        writer.put_i32(self.intervals.len() as i32);
        writer.put_i64(self.min_interval_start.unwrap_or(i64::MAX));
        writer.put_i32(self.strings_size as i32);

        if let NodeKind::Core(core) = &self.kind {
            writer.put_i32(core.extension);
            writer.put_i32(core.children.len() as i32);
            for i in 0..self.max_children {
                writer.put_i32(core.children.get(i).map_or(0, |c| *c as i32));
            }
            for i in 0..self.max_children {
                writer.put_i64(core.child_start.get(i).copied().unwrap_or(0));
            }
        }
        debug_assert_eq!(writer.position(), self.header_size());

        let mut strings_end = self.block_size;
        for interval in &self.intervals {
            strings_end -= interval.encode(&mut writer, strings_end);
        }
        debug_assert!(writer.position() <= strings_end);
    }

    /// Deserialize a node block
    pub fn read_from(block: &[u8], config: &TreeConfig) -> Result<Self> {
        if block.len() != config.block_size {
            return Err(Error::CorruptData(format!(
                "node block is {} bytes, expected {}",
                block.len(),
                config.block_size
            )));
        }
        let mut reader = BlockReader::new(block);

        let tag = reader.get_u8()?;
        let seq = reader.get_i32()?;
        let parent = reader.get_i32()?;
        let start = reader.get_i64()?;
        let end = reader.get_i64()?;
        let count = reader.get_i32()?;
        let min_interval_start = reader.get_i64()?;
        let strings_size = reader.get_i32()?;

        let seq = u32::try_from(seq)
            .map_err(|_| Error::CorruptData(format!("invalid node sequence number {}", seq)))?;
        let parent = match parent {
            NO_PARENT => None,
            p => Some(u32::try_from(p).map_err(|_| {
                Error::CorruptData(format!("node {} has invalid parent {}", seq, p))
            })?),
        };
        let count = usize::try_from(count)
            .map_err(|_| Error::CorruptData(format!("node {} has negative interval count", seq)))?;

        let kind = match tag {
            TYPE_LEAF => NodeKind::Leaf,
            TYPE_CORE => NodeKind::Core(Self::read_core_header(&mut reader, seq, config)?),
            other => {
                return Err(Error::CorruptData(format!(
                    "node {} has unknown type tag {}",
                    seq, other
                )));
            }
        };

        let mut node = Self::with_kind(config, seq, parent, start, kind);
        if node.header_size() + count * DATA_ENTRY_SIZE > config.block_size {
            return Err(Error::CorruptData(format!(
                "node {} declares {} intervals, more than a block holds",
                seq, count
            )));
        }

        node.intervals.reserve(count);
        for _ in 0..count {
            let interval = Interval::decode(&mut reader)?;
            node.data_size += DATA_ENTRY_SIZE;
            node.strings_size += interval.strings_entry_size();
            node.intervals.push(interval);
        }

        if node.strings_size as i64 != strings_size as i64 {
            return Err(Error::CorruptData(format!(
                "node {} strings section is {} bytes, header says {}",
                seq, node.strings_size, strings_size
            )));
        }
        if node.header_size() + node.data_size + node.strings_size > config.block_size {
            return Err(Error::CorruptData(format!("node {} overflows its block", seq)));
        }

        node.min_interval_start = (count > 0).then_some(min_interval_start);
        node.end = (end != NODE_END_OPEN).then_some(end);
        Ok(node)
    }

    fn read_core_header(
        reader: &mut BlockReader<'_>,
        seq: u32,
        config: &TreeConfig,
    ) -> Result<CoreData> {
        let extension = reader.get_i32()?;
        let nb_children = reader.get_i32()?;
        let nb_children = usize::try_from(nb_children)
            .ok()
            .filter(|n| *n <= config.max_children)
            .ok_or_else(|| {
                Error::CorruptData(format!(
                    "node {} has {} children (max {})",
                    seq, nb_children, config.max_children
                ))
            })?;

        let mut core = CoreData::new(config.max_children);
        core.extension = extension;
        for i in 0..config.max_children {
            let child = reader.get_i32()?;
            if i < nb_children {
                core.children.push(u32::try_from(child).map_err(|_| {
                    Error::CorruptData(format!("node {} has invalid child {}", seq, child))
                })?);
            }
        }
        for i in 0..config.max_children {
            let child_start = reader.get_i64()?;
            if i < nb_children {
                core.child_start.push(child_start);
            }
        }
        Ok(core)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} ({}) [{}, ", self.seq, self.node_type(), self.start)?;
        match self.end {
            Some(end) => write!(f, "{}]", end)?,
            None => write!(f, "...]")?,
        }
        match self.parent {
            Some(parent) => write!(f, " parent {}", parent)?,
            None => write!(f, " root")?,
        }
        write!(f, ", {} intervals, {} bytes free", self.intervals.len(), self.free_space())?;
        if let Some(core) = self.core() {
            write!(f, ", children {:?}", core.children)?;
        }
        Ok(())
    }
}
