//! Cache Module
//!
//! The memory tier, the entry envelope shared by all tiers, and the manager
//! that orchestrates them.

mod entry;
mod lru;
mod manager;
mod memory;
mod stats;


// Re-export public types
pub use entry::CacheEntry;
pub use lru::LruIndex;
pub use manager::{CacheManager, CacheManagerBuilder, CleanupReport};
pub use memory::MemoryStore;
pub use stats::{Analytics, AnalyticsSnapshot};
