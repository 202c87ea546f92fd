//! Memory Store Module
//!
//! Size-bounded in-process tier combining HashMap storage with an LRU index.
//! Validity is not checked here; the manager decides what is fresh.

use std::collections::HashMap;

use tracing::warn;

use crate::cache::{CacheEntry, LruIndex};

// == Memory Store ==
/// In-memory entries with byte accounting and least-recently-used eviction.
#[derive(Debug)]
pub struct MemoryStore {
    entries: HashMap<String, CacheEntry>,
    lru: LruIndex,
    /// Sum of `size` over all entries
    current_size: usize,
    max_size: usize,
}

impl MemoryStore {
    // == Constructor ==
    /// Creates an empty store holding at most `max_size` bytes.
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruIndex::new(),
            current_size: 0,
            max_size,
        }
    }

    // == Get ==
    /// Returns a copy of the entry and records the read on the stored one.
    pub fn get(&mut self, key: &str, now: u64) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        self.lru.touch(key, now);
        Some(entry.clone())
    }

    /// Reads an entry without counting it as an access.
    pub fn peek(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    // == Insert ==
    /// Stores `entry`, evicting least recently used entries until it fits.
    ///
    /// Returns the keys evicted to make room. An entry that could never fit
    /// is dropped instead of emptying the store for nothing.
    pub fn insert(&mut self, key: String, entry: CacheEntry) -> Vec<String> {
        self.remove(&key);

        if entry.size > self.max_size {
            warn!(
                "Entry '{}' ({} bytes) exceeds memory capacity of {} bytes, not cached",
                key, entry.size, self.max_size
            );
            return Vec::new();
        }

        let mut evicted = Vec::new();
        while self.current_size + entry.size > self.max_size {
            let Some(oldest) = self.lru.pop_oldest() else {
                break;
            };
            if let Some(old) = self.entries.remove(&oldest) {
                self.current_size -= old.size;
            }
            evicted.push(oldest);
        }

        self.current_size += entry.size;
        self.lru.touch(&key, entry.last_access);
        self.entries.insert(key, entry);
        evicted
    }

    // == Remove ==
    /// Removes an entry, releasing exactly its recorded size.
    pub fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru.remove(key);
        self.current_size -= entry.size;
        Some(entry)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.current_size = 0;
    }

    // == Remove Invalid ==
    /// Drops every entry that is expired at `now` or carries another version.
    ///
    /// Returns the number of entries removed.
    pub fn remove_invalid(&mut self, now: u64, version: &str) -> usize {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_valid(now, version))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            self.remove(key);
        }
        stale.len()
    }

    /// Keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_size(&self) -> usize {
        self.current_size
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
