//! Point and range queries
//!
//! A point query walks a single root-to-leaf path: at every level it first
//! looks for a matching interval in the node, then descends into the one child
//! whose window holds the query time. Range queries walk every subtree whose
//! window overlaps the requested range, lazily.

use smallvec::SmallVec;

use crate::error::{Error, Result};
use crate::interval::Interval;

use super::history::HistoryTree;

impl HistoryTree {
    /// Whether `t` is within `[tree_start, tree_end]`
    pub fn covers(&self, t: i64) -> bool {
        self.tree_start() <= t && t <= self.tree_end()
    }

    /// The interval of `attribute` containing `t`
    ///
    /// Times outside the tree's range return `Ok(None)`. Node read failures
    /// abort the query.
    pub fn query_at(&self, t: i64, attribute: i32) -> Result<Option<Interval>> {
        if !self.covers(t) {
            return Ok(None);
        }

        let mut node = self.read_node(self.root_sequence_number())?;
        loop {
            if let Some(interval) = node.find_interval(attribute, t) {
                return Ok(Some(interval.clone()));
            }
            match node.select_child_for(t) {
                Some(child) => node = self.read_node(child)?,
                None => return Ok(None),
            }
        }
    }

    /// Every interval containing `t`, ordered by attribute
    pub fn query_full(&self, t: i64) -> Result<Vec<Interval>> {
        let mut found = Vec::new();
        if !self.covers(t) {
            return Ok(found);
        }

        let mut next = Some(self.root_sequence_number());
        while let Some(seq) = next {
            let node = self.read_node(seq)?;
            found.extend(node.intervals_at(t).cloned());
            next = node.select_child_for(t);
        }
        found.sort_by_key(Interval::attribute);
        Ok(found)
    }

    /// Intervals of `attribute` overlapping `[start, end]`
    pub fn query_range(&self, start: i64, end: i64, attribute: i32) -> Result<RangeQuery<'_>> {
        RangeQuery::new(self, start, end, Some(attribute))
    }

    /// Intervals of every attribute overlapping `[start, end]`
    pub fn query_range_all(&self, start: i64, end: i64) -> Result<RangeQuery<'_>> {
        RangeQuery::new(self, start, end, None)
    }
}

/// A range query over a history tree
///
/// Nothing is read until the query is iterated. Each call to
/// [`RangeQuery::iter`] restarts the traversal from the root.
#[derive(Clone, Copy)]
pub struct RangeQuery<'a> {
    tree: &'a HistoryTree,
    start: i64,
    end: i64,
    attribute: Option<i32>,
}

impl<'a> RangeQuery<'a> {
    fn new(tree: &'a HistoryTree, start: i64, end: i64, attribute: Option<i32>) -> Result<Self> {
        if start > end {
            return Err(Error::TimeRange(format!(
                "range start {} is after its end {}",
                start, end
            )));
        }
        Ok(Self {
            tree,
            start,
            end,
            attribute,
        })
    }

    /// Lazily walk the intersecting nodes, yielding intervals in tree order
    pub fn iter(&self) -> RangeIter<'a> {
        let start = self.start.max(self.tree.tree_start());
        let end = self.end.min(self.tree.tree_end());
        let mut stack = SmallVec::new();
        if start <= end {
            stack.push(self.tree.root_sequence_number());
        }
        RangeIter {
            tree: self.tree,
            start,
            end,
            attribute: self.attribute,
            stack,
            pending: Vec::new().into_iter(),
        }
    }

    /// Collect every matching interval, ordered by start time
    pub fn sorted(&self) -> Result<Vec<Interval>> {
        let mut intervals = self.iter().collect::<Result<Vec<_>>>()?;
        intervals.sort_by_key(|interval| (interval.start(), interval.attribute()));
        Ok(intervals)
    }
}

impl<'a> IntoIterator for &RangeQuery<'a> {
    type Item = Result<Interval>;
    type IntoIter = RangeIter<'a>;

    fn into_iter(self) -> RangeIter<'a> {
        self.iter()
    }
}

/// Iterator over the intervals of a [`RangeQuery`]
///
/// A node read failure is yielded once as an error, after which the iterator
/// is exhausted.
pub struct RangeIter<'a> {
    tree: &'a HistoryTree,
    start: i64,
    end: i64,
    attribute: Option<i32>,
    /// Nodes still to visit
    stack: SmallVec<[u32; 16]>,
    /// Matches of the node visited last
    pending: std::vec::IntoIter<Interval>,
}

impl Iterator for RangeIter<'_> {
    type Item = Result<Interval>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(interval) = self.pending.next() {
                return Some(Ok(interval));
            }

            let seq = self.stack.pop()?;
            let node = match self.tree.read_node(seq) {
                Ok(node) => node,
                Err(e) => {
                    self.stack.clear();
                    return Some(Err(e));
                }
            };

            // Visit the earliest child first
            let children = node.children_intersecting(self.start, self.end);
            self.stack.extend(children.into_iter().rev());

            let matches: Vec<Interval> = node
                .intervals()
                .iter()
                .filter(|interval| self.attribute.is_none_or(|attr| interval.attribute() == attr))
                .filter(|interval| interval.intersects(self.start, self.end))
                .cloned()
                .collect();
            self.pending = matches.into_iter();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TreeConfig;
    use crate::interval::StateValue;
    use tempfile::TempDir;

    fn build(dir: &TempDir, finish: bool) -> HistoryTree {
        let config = TreeConfig::new(dir.path().join("query.ht"))
            .with_block_size(512)
            .with_max_children(3)
            .with_cache_size(8);
        let mut tree = HistoryTree::create(config).unwrap();
        // Attribute 0 changes every 10 units, attribute 1 every 25
        let mut events = Vec::new();
        for i in 0..60i64 {
            events.push((i * 10, i * 10 + 9, 0, StateValue::Long(i)));
        }
        for i in 0..24i64 {
            events.push((i * 25, i * 25 + 24, 1, StateValue::Int(i as i32)));
        }
        events.sort_by_key(|(_, end, _, _)| *end);
        for (start, end, attr, value) in events {
            tree.insert_interval(start, end, attr, value).unwrap();
        }
        if finish {
            tree.close_tree(599).unwrap();
        }
        tree
    }

    #[test]
    fn test_query_at_live_and_finished() {
        for finish in [false, true] {
            let dir = TempDir::new().unwrap();
            let tree = build(&dir, finish);
            assert!(tree.depth() > 1);

            let interval = tree.query_at(123, 0).unwrap().unwrap();
            assert_eq!((interval.start(), interval.end()), (120, 129));
            assert_eq!(interval.value(), &StateValue::Long(12));

            let interval = tree.query_at(123, 1).unwrap().unwrap();
            assert_eq!((interval.start(), interval.end()), (100, 124));

            assert!(tree.query_at(123, 2).unwrap().is_none());
            assert!(tree.query_at(600, 0).unwrap().is_none());
            assert!(tree.query_at(-1, 0).unwrap().is_none());
        }
    }

    #[test]
    fn test_query_full_orders_by_attribute() {
        let dir = TempDir::new().unwrap();
        let tree = build(&dir, true);
        let state = tree.query_full(330).unwrap();
        let attrs: Vec<i32> = state.iter().map(Interval::attribute).collect();
        assert_eq!(attrs, vec![0, 1]);
        assert_eq!(state[0].value(), &StateValue::Long(33));
        assert_eq!(state[1].value(), &StateValue::Int(13));
        assert!(tree.query_full(10_000).unwrap().is_empty());
    }

    #[test]
    fn test_range_query_single_attribute() {
        let dir = TempDir::new().unwrap();
        let tree = build(&dir, true);
        let found = tree.query_range(95, 140, 0).unwrap().sorted().unwrap();
        let starts: Vec<i64> = found.iter().map(Interval::start).collect();
        assert_eq!(starts, vec![90, 100, 110, 120, 130, 140]);
    }

    #[test]
    fn test_range_query_all_attributes() {
        let dir = TempDir::new().unwrap();
        let tree = build(&dir, false);
        let query = tree.query_range_all(0, 599).unwrap();
        assert_eq!(query.iter().count(), 60 + 24);
        // Iterating twice yields the same intervals
        assert_eq!(query.sorted().unwrap(), query.sorted().unwrap());
    }

    #[test]
    fn test_range_query_is_clamped_and_validated() {
        let dir = TempDir::new().unwrap();
        let tree = build(&dir, true);
        assert!(matches!(tree.query_range(50, 10, 0), Err(Error::TimeRange(_))));
        assert_eq!(tree.query_range(700, 800, 0).unwrap().iter().count(), 0);
        assert_eq!(tree.query_range(-100, 5, 0).unwrap().iter().count(), 1);
    }

    #[test]
    fn test_range_iter_reports_io_failure_once() {
        let dir = TempDir::new().unwrap();
        let tree = build(&dir, true);
        tree.clear_cache();
        tree.close_file();

        let results: Vec<_> = tree.query_range_all(0, 599).unwrap().iter().collect();
        // The root is part of the in-memory branch; its children need the disk
        assert!(matches!(results.last(), Some(Err(Error::ChannelClosed))));
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }
}
