//! LRU Index Module
//!
//! Orders keys by last access time for size-driven eviction.

use std::collections::{BTreeMap, HashMap};

// == LRU Index ==
/// Tracks keys ordered by `(last_access, sequence)`.
///
/// The sequence number breaks ties between keys touched in the same
/// millisecond: the one touched first is evicted first.
#[derive(Debug, Default)]
pub struct LruIndex {
    /// Oldest first
    order: BTreeMap<(u64, u64), String>,
    /// Key -> its position in `order`
    positions: HashMap<String, (u64, u64)>,
    next_seq: u64,
}

impl LruIndex {
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Records an access to `key` at `at` (Unix milliseconds).
    pub fn touch(&mut self, key: &str, at: u64) {
        self.remove(key);
        let pos = (at, self.next_seq);
        self.next_seq += 1;
        self.order.insert(pos, key.to_string());
        self.positions.insert(key.to_string(), pos);
    }

    // == Remove ==
    pub fn remove(&mut self, key: &str) {
        if let Some(pos) = self.positions.remove(key) {
            self.order.remove(&pos);
        }
    }

    // == Pop Oldest ==
    /// Returns and removes the key with the smallest last access.
    pub fn pop_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.positions.remove(&key);
        Some(key)
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.positions.clear();
    }
}
