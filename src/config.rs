//! Configuration Module
//!
//! Handles loading and validating cache and prefetch configuration from
//! environment variables.

use std::env;
use std::path::PathBuf;

use crate::error::{CacheError, Result};
use crate::http::Strategy;

/// Cache configuration parameters.
///
/// Immutable once the manager is built. All values can be configured via
/// environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Default TTL in milliseconds, also the durable sweep horizon
    pub max_age_ms: u64,
    /// Memory tier capacity in bytes
    pub max_size: usize,
    /// Default HTTP caching strategy
    pub strategy: Strategy,
    /// Entries written under a different version are invalid
    pub version: String,
    /// Background cleanup interval in seconds
    pub cleanup_interval_secs: u64,
    /// How long a worker-tier lookup may take before it counts as a miss
    pub worker_timeout_ms: u64,
    /// Directory for the file-backed durable tier, None = in-memory records
    pub storage_dir: Option<PathBuf>,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_AGE_MS` - Default TTL in ms (default: 86400000)
    /// - `CACHE_MAX_SIZE` - Memory capacity in bytes (default: 52428800)
    /// - `CACHE_STRATEGY` - `cache-first`, `network-first` or
    ///   `stale-while-revalidate` (default)
    /// - `CACHE_VERSION` - Entry version tag (default: 1.0.0)
    /// - `CACHE_CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 300)
    /// - `CACHE_WORKER_TIMEOUT_MS` - Worker lookup timeout (default: 1000)
    /// - `CACHE_DIR` - Durable store directory (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_age_ms: parse_env("CACHE_MAX_AGE_MS").unwrap_or(defaults.max_age_ms),
            max_size: parse_env("CACHE_MAX_SIZE").unwrap_or(defaults.max_size),
            strategy: parse_env("CACHE_STRATEGY").unwrap_or(defaults.strategy),
            version: env::var("CACHE_VERSION").unwrap_or(defaults.version),
            cleanup_interval_secs: parse_env("CACHE_CLEANUP_INTERVAL")
                .unwrap_or(defaults.cleanup_interval_secs),
            worker_timeout_ms: parse_env("CACHE_WORKER_TIMEOUT_MS")
                .unwrap_or(defaults.worker_timeout_ms),
            storage_dir: env::var("CACHE_DIR").ok().map(PathBuf::from),
        }
    }

    /// Rejects configurations the manager cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(CacheError::InvalidConfig(
                "max_size must be greater than zero".to_string(),
            ));
        }
        if self.max_age_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "max_age_ms must be greater than zero".to_string(),
            ));
        }
        if self.version.trim().is_empty() {
            return Err(CacheError::InvalidConfig(
                "version must not be empty".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(CacheError::InvalidConfig(
                "cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.worker_timeout_ms == 0 {
            return Err(CacheError::InvalidConfig(
                "worker_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_age_ms: 24 * 60 * 60 * 1000,
            max_size: 50 * 1024 * 1024,
            strategy: Strategy::StaleWhileRevalidate,
            version: "1.0.0".to_string(),
            cleanup_interval_secs: 300,
            worker_timeout_ms: 1000,
            storage_dir: None,
        }
    }
}

/// Admission control for speculative prefetches.
#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    pub enabled: bool,
    /// Upper bound on prefetches in flight at once
    pub max_concurrent: usize,
    /// Chance in [0, 1] that a candidate URL is admitted
    pub probability: f64,
    /// Delay before each prefetch is issued, in milliseconds
    pub delay_ms: u64,
}

impl PrefetchConfig {
    /// Creates a new PrefetchConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `PREFETCH_ENABLED` (default: true)
    /// - `PREFETCH_MAX_CONCURRENT` (default: 3)
    /// - `PREFETCH_PROBABILITY` (default: 0.8, clamped to [0, 1])
    /// - `PREFETCH_DELAY_MS` (default: 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_env("PREFETCH_ENABLED").unwrap_or(defaults.enabled),
            max_concurrent: parse_env("PREFETCH_MAX_CONCURRENT")
                .unwrap_or(defaults.max_concurrent),
            probability: parse_env::<f64>("PREFETCH_PROBABILITY")
                .unwrap_or(defaults.probability)
                .clamp(0.0, 1.0),
            delay_ms: parse_env("PREFETCH_DELAY_MS").unwrap_or(defaults.delay_ms),
        }
    }
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent: 3,
            probability: 0.8,
            delay_ms: 100,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}
