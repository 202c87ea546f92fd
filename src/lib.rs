//! Tiered Cache - a multi-tier client cache
//!
//! Coordinates a size-bounded memory tier, a durable record store and an
//! optional background worker, with TTL/version validation, LRU eviction,
//! HTTP caching strategies and a resource preloader.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod preload;
pub mod suite;
pub mod tasks;
pub mod tiers;

pub use cache::{AnalyticsSnapshot, CacheEntry, CacheManager};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, PrefetchConfig};
pub use error::{CacheError, FetchError, Result};
pub use http::{CacheOptions, HttpCache, HttpRequest, HttpResponse, ReqwestFetcher, Strategy};
pub use preload::ResourcePreloader;
pub use suite::CacheSuite;
pub use tasks::spawn_cleanup_task;
