// Shared string cache
//
// Strings written through `shared` fields are deduplicated within one write
// pass. Each string is written once, after every slot that references it, so
// the uoffsets stay forward-pointing. The cache is direct-mapped and bounded:
// when two strings land in the same bucket the older one is evicted and must be
// flushed by the caller.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A pending shared string and every uoffset slot waiting for its location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingString {
    pub value: String,
    pub slots: Vec<usize>,
}

/// Bounded direct-mapped cache of pending shared strings.
#[derive(Debug)]
pub struct SharedStringCache {
    buckets: Vec<Option<PendingString>>,
}

impl SharedStringCache {
    /// Creates a cache with `capacity` buckets (at least one).
    pub fn new(capacity: usize) -> Self {
        Self {
            buckets: vec![None; capacity.max(1)],
        }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.len()
    }

    fn bucket(&self, value: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        (hasher.finish() % self.buckets.len() as u64) as usize
    }

    /// Registers `slot` as a reference to `value`.
    ///
    /// Returns the evicted entry when `value` displaces a different string.
    pub fn defer(&mut self, slot: usize, value: &str) -> Option<PendingString> {
        let bucket = self.bucket(value);
        match &mut self.buckets[bucket] {
            Some(pending) if pending.value == value => {
                pending.slots.push(slot);
                None
            }
            entry => entry.replace(PendingString {
                value: value.to_string(),
                slots: vec![slot],
            }),
        }
    }

    /// Removes and returns every pending entry.
    pub fn drain(&mut self) -> Vec<PendingString> {
        self.buckets.iter_mut().filter_map(Option::take).collect()
    }

    /// Drops pending entries and resizes the cache.
    pub fn reset(&mut self, capacity: usize) {
        self.buckets.clear();
        self.buckets.resize(capacity.max(1), None);
    }
}

impl Default for SharedStringCache {
    fn default() -> Self {
        Self::new(127)
    }
}
