//! Direct-mapped cache of sealed nodes
//!
//! Each sequence number maps to exactly one slot, `seq & (size - 1)`. A new
//! node always overwrites its slot; there is no recency tracking. Lookups
//! compare the cached node's own sequence number to detect collisions.

use std::sync::Arc;

use super::node::Node;

/// Hit and miss counters of a node cache
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache
    pub hits: u64,
    /// Lookups that had to go to disk
    pub misses: u64,
}

/// Fixed-size direct-mapped node cache
#[derive(Debug)]
pub struct NodeCache {
    slots: Vec<Option<Arc<Node>>>,
    mask: usize,
    stats: CacheStats,
}

impl NodeCache {
    /// Create a cache with `size` slots; `size` must be a power of two
    pub fn new(size: usize) -> Self {
        assert!(size.is_power_of_two(), "cache size {} is not a power of two", size);
        Self {
            slots: vec![None; size],
            mask: size - 1,
            stats: CacheStats::default(),
        }
    }

    fn slot(&self, seq: u32) -> usize {
        seq as usize & self.mask
    }

    /// Look up a node, counting the hit or miss
    pub fn get(&mut self, seq: u32) -> Option<Arc<Node>> {
        let found = self.slots[self.slot(seq)]
            .as_ref()
            .filter(|node| node.sequence_number() == seq)
            .cloned();
        match found {
            Some(_) => self.stats.hits += 1,
            None => self.stats.misses += 1,
        }
        found
    }

    /// Store a node, evicting whatever occupied its slot
    pub fn put(&mut self, node: Arc<Node>) {
        let slot = self.slot(node.sequence_number());
        self.slots[slot] = Some(node);
    }

    /// Whether `seq` is currently cached, without touching the counters
    pub fn contains(&self, seq: u32) -> bool {
        self.slots[self.slot(seq)]
            .as_ref()
            .is_some_and(|node| node.sequence_number() == seq)
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Hit and miss counters since creation
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Drop every cached node
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
    }
}
