//! Cache Analytics Module
//!
//! Tracks hits, misses, prefetches and evictions across all tiers.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Analytics ==
/// Monotonic counters shared by the manager and the preloader.
///
/// Counters only ever grow; they reset when a new manager is built.
#[derive(Debug, Default)]
pub struct Analytics {
    hits: AtomicU64,
    misses: AtomicU64,
    prefetches: AtomicU64,
    evictions: AtomicU64,
}

impl Analytics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_prefetch(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Reads every counter and combines it with the memory tier's usage.
    pub fn snapshot(
        &self,
        memory_usage: usize,
        memory_entries: usize,
        max_memory: usize,
    ) -> AnalyticsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        AnalyticsSnapshot {
            hits,
            misses,
            prefetches: self.prefetches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: hit_rate_percent(hits, misses),
            memory_usage,
            memory_entries,
            max_memory,
        }
    }
}

// == Analytics Snapshot ==
/// Read-only view of the counters, as exported to dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub prefetches: u64,
    pub evictions: u64,
    /// Hits as a rounded percentage of all lookups (0-100)
    pub hit_rate: u8,
    /// Bytes held by the memory tier
    pub memory_usage: usize,
    pub memory_entries: usize,
    pub max_memory: usize,
}

/// Returns round(hits / (hits + misses) * 100), or 0 with no lookups.
fn hit_rate_percent(hits: u64, misses: u64) -> u8 {
    let total = hits + misses;
    if total == 0 {
        0
    } else {
        ((hits as f64 / total as f64) * 100.0).round() as u8
    }
}
