//! Structural verification of a history tree
//!
//! Walks every node reachable from the root and checks the invariants the
//! insertion algorithm maintains: parent links, contiguous child windows and
//! intervals contained in their node.

use std::collections::VecDeque;

use crate::error::{Error, Result};

use super::history::HistoryTree;

/// Summary of a successful integrity check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IntegrityReport {
    /// Nodes visited
    pub nodes: u32,
    /// Intervals stored across all nodes
    pub intervals: u64,
    /// Deepest level reached, root being 1
    pub depth: usize,
}

impl HistoryTree {
    /// Verify the whole tree, reading every node once
    pub fn check_integrity(&self) -> Result<IntegrityReport> {
        let mut report = IntegrityReport::default();
        let mut queue = VecDeque::from([(self.root_sequence_number(), 1usize)]);

        while let Some((seq, level)) = queue.pop_front() {
            let node = self.read_node(seq)?;
            report.nodes += 1;
            report.intervals += node.interval_count() as u64;
            report.depth = report.depth.max(level);

            for interval in node.intervals() {
                let past_end = node.end().is_some_and(|end| interval.end() > end);
                if interval.start() < node.start() || past_end {
                    return Err(Error::Integrity(format!(
                        "{} lies outside of node {}",
                        interval,
                        node.sequence_number()
                    )));
                }
            }

            let Some(core) = node.core() else { continue };
            let mut previous_end: Option<i64> = None;
            for (i, (&child_seq, &child_start)) in
                core.children().iter().zip(core.child_starts()).enumerate()
            {
                let child = self.read_node(child_seq)?;
                if child.parent() != Some(seq) {
                    return Err(Error::Integrity(format!(
                        "node {} is linked from {} but records parent {:?}",
                        child_seq,
                        seq,
                        child.parent()
                    )));
                }
                if child.start() != child_start {
                    return Err(Error::Integrity(format!(
                        "node {} starts at {} but its parent records {}",
                        child_seq,
                        child.start(),
                        child_start
                    )));
                }
                if i == 0 && child.start() != node.start() {
                    return Err(Error::Integrity(format!(
                        "first child {} of node {} starts at {} instead of {}",
                        child_seq,
                        seq,
                        child.start(),
                        node.start()
                    )));
                }
                if let Some(end) = previous_end {
                    if end + 1 != child.start() {
                        return Err(Error::Integrity(format!(
                            "gap before node {}: previous sibling ends at {}, it starts at {}",
                            child_seq,
                            end,
                            child.start()
                        )));
                    }
                }
                if i + 1 < core.children().len() && !child.is_done() {
                    return Err(Error::Integrity(format!(
                        "node {} has a younger sibling but was never closed",
                        child_seq
                    )));
                }
                if i + 1 == core.children().len() && child.end() != node.end() {
                    return Err(Error::Integrity(format!(
                        "last child {} of node {} ends at {:?} instead of {:?}",
                        child_seq,
                        seq,
                        child.end(),
                        node.end()
                    )));
                }

                previous_end = child.end();
                queue.push_back((child_seq, level + 1));
            }
        }

        if report.nodes != self.node_count() {
            return Err(Error::Integrity(format!(
                "{} nodes reachable from the root, {} recorded",
                report.nodes,
                self.node_count()
            )));
        }
        log::debug!(
            "integrity check passed: {} nodes, {} intervals, depth {}",
            report.nodes,
            report.intervals,
            report.depth
        );
        Ok(report)
    }
}
