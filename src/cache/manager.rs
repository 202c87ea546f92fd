//! Cache Manager Module
//!
//! Unifies the memory, durable and worker tiers behind get/set/delete/clear.
//!
//! Reads fall through memory -> durable -> worker. A durable hit is promoted
//! into memory; a worker hit is not, so the worker stays overflow only.
//! Writes fan out to every tier. Only the memory tier may fail an operation;
//! durable and worker errors are logged and otherwise ignored.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{Analytics, AnalyticsSnapshot, CacheEntry, MemoryStore};
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::Result;
use crate::tasks::spawn_cleanup_task;
use crate::tiers::{DurableStore, KeyFilter, MemoryRecordStore, WorkerMessage, WorkerTier};

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub memory_removed: usize,
    pub durable_removed: usize,
}

impl CleanupReport {
    pub fn total(&self) -> usize {
        self.memory_removed + self.durable_removed
    }
}

// == Builder ==
/// Assembles a [`CacheManager`] from its collaborators.
pub struct CacheManagerBuilder {
    config: CacheConfig,
    clock: Option<Arc<dyn Clock>>,
    durable: Option<Arc<dyn DurableStore>>,
    worker: Option<Arc<dyn WorkerTier>>,
}

impl CacheManagerBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn durable(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn worker(mut self, worker: Arc<dyn WorkerTier>) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Validates the configuration and builds the manager. Without an
    /// explicit durable store, records are kept in memory.
    pub fn build(self) -> Result<CacheManager> {
        self.config.validate()?;

        Ok(CacheManager {
            memory: RwLock::new(MemoryStore::new(self.config.max_size)),
            durable: self
                .durable
                .unwrap_or_else(|| Arc::new(MemoryRecordStore::new())),
            worker: self.worker,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            analytics: Analytics::new(),
            cleanup_handle: Mutex::new(None),
            config: Arc::new(self.config),
        })
    }
}

// == Cache Manager ==
/// The orchestrator every caller talks to.
pub struct CacheManager {
    config: Arc<CacheConfig>,
    memory: RwLock<MemoryStore>,
    durable: Arc<dyn DurableStore>,
    worker: Option<Arc<dyn WorkerTier>>,
    clock: Arc<dyn Clock>,
    analytics: Analytics,
    cleanup_handle: Mutex<Option<JoinHandle<()>>>,
}

impl CacheManager {
    // == Constructors ==
    /// Manager with the system clock, in-memory records and no worker.
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: CacheConfig) -> CacheManagerBuilder {
        CacheManagerBuilder {
            config,
            clock: None,
            durable: None,
            worker: None,
        }
    }

    // == Get ==
    /// Returns the cached value for `key`, or None.
    ///
    /// A payload that does not decode into `T` counts as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let decoded = match self.lookup(key).await {
            Some(entry) => match entry.decode::<T>() {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Cached value for '{}' has an unexpected shape: {}", key, e);
                    None
                }
            },
            None => None,
        };

        if decoded.is_some() {
            self.analytics.record_hit();
        } else {
            self.analytics.record_miss();
        }
        decoded
    }

    /// Returns the full envelope for `key`, counting a hit or a miss.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        match self.lookup(key).await {
            Some(entry) => {
                self.analytics.record_hit();
                Some(entry)
            }
            None => {
                self.analytics.record_miss();
                None
            }
        }
    }

    /// Tier fallback without touching the hit/miss counters.
    async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now_ms();
        let version = self.config.version.as_str();

        {
            let mut memory = self.memory.write().await;
            match memory.get(key, now) {
                Some(entry) if entry.is_valid(now, version) => {
                    debug!("Cache hit for '{}' in memory", key);
                    return Some(entry);
                }
                Some(_) => {
                    memory.remove(key);
                }
                None => {}
            }
        }

        match self.durable.get(key).await {
            Ok(Some(mut entry)) if entry.is_valid(now, version) => {
                entry.touch(now);
                self.store_in_memory(key, entry.clone()).await;
                debug!("Cache hit for '{}' in durable tier, promoted", key);
                return Some(entry);
            }
            Ok(Some(_)) => {
                if let Err(e) = self.durable.delete(key).await {
                    warn!("Failed to drop stale durable record '{}': {}", key, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Durable tier read failed for '{}': {}", key, e),
        }

        if let Some(worker) = &self.worker {
            let timeout = Duration::from_millis(self.config.worker_timeout_ms);
            if let Some(data) = worker.try_get(key, timeout).await {
                match serde_json::from_value::<CacheEntry>(data) {
                    Ok(entry) if entry.is_valid(now, version) => {
                        debug!("Cache hit for '{}' in worker tier", key);
                        return Some(entry);
                    }
                    Ok(_) => debug!("Worker entry for '{}' is stale", key),
                    Err(e) => debug!("Worker returned an unreadable entry for '{}': {}", key, e),
                }
            }
        }

        debug!("Cache miss for '{}'", key);
        None
    }

    // == Set ==
    /// Stores `data` under `key` in every tier. `ttl` defaults to the
    /// configured max age.
    ///
    /// Fails only when `data` cannot be serialized, in which case no tier is
    /// written.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        data: &T,
        ttl: Option<u64>,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let ttl = ttl.unwrap_or(self.config.max_age_ms);
        let entry = CacheEntry::encode(data, now, ttl, &self.config.version)?;

        self.store_in_memory(key, entry.clone()).await;

        if let Err(e) = self.durable.put(key, &entry).await {
            warn!("Durable tier write failed for '{}': {}", key, e);
        }

        if let Some(worker) = &self.worker {
            match serde_json::to_value(&entry) {
                Ok(data) => worker.notify(WorkerMessage::CacheSet {
                    key: key.to_string(),
                    data,
                }),
                Err(e) => warn!("Could not forward '{}' to worker: {}", key, e),
            }
        }
        Ok(())
    }

    async fn store_in_memory(&self, key: &str, entry: CacheEntry) {
        let evicted = self.memory.write().await.insert(key.to_string(), entry);
        if !evicted.is_empty() {
            debug!("Evicted {} entries to fit '{}'", evicted.len(), key);
            self.analytics.record_evictions(evicted.len() as u64);
        }
    }

    // == Delete ==
    pub async fn delete(&self, key: &str) {
        self.memory.write().await.remove(key);

        if let Err(e) = self.durable.delete(key).await {
            warn!("Durable tier delete failed for '{}': {}", key, e);
        }
        if let Some(worker) = &self.worker {
            worker.notify(WorkerMessage::CacheDelete {
                key: key.to_string(),
            });
        }
    }

    // == Clear ==
    pub async fn clear(&self) {
        self.memory.write().await.clear();

        if let Err(e) = self.durable.clear().await {
            warn!("Durable tier clear failed: {}", e);
        }
        if let Some(worker) = &self.worker {
            worker.notify(WorkerMessage::CacheClear);
        }
        info!("Cache cleared");
    }

    // == Invalidate ==
    /// Deletes every key starting with `prefix` from all tiers. Returns how
    /// many distinct keys were removed.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate_matching(prefix, &|_: &str| true).await
    }

    /// Deletes every key that starts with `prefix` and passes `matches`,
    /// wherever it lives: memory, durable records or the worker.
    pub async fn invalidate_matching(&self, prefix: &str, matches: &KeyFilter) -> usize {
        let mut removed: HashSet<String> = {
            let mut memory = self.memory.write().await;
            let keys: Vec<String> = memory
                .keys_with_prefix(prefix)
                .into_iter()
                .filter(|key| matches(key.as_str()))
                .collect();
            for key in &keys {
                memory.remove(key);
            }
            keys.into_iter().collect()
        };

        match self.durable.remove_keys(prefix, matches).await {
            Ok(keys) => removed.extend(keys),
            Err(e) => warn!("Durable tier invalidation of '{}' failed: {}", prefix, e),
        }

        if let Some(worker) = &self.worker {
            let timeout = Duration::from_millis(self.config.worker_timeout_ms);
            removed.extend(
                worker
                    .keys(prefix, timeout)
                    .await
                    .into_iter()
                    .filter(|key| matches(key.as_str())),
            );
            for key in &removed {
                worker.notify(WorkerMessage::CacheDelete { key: key.clone() });
            }
        }

        debug!("Invalidated {} keys under '{}'", removed.len(), prefix);
        removed.len()
    }

    // == Cleanup ==
    /// Removes invalid memory entries and durable records older than the
    /// configured max age or written under another version. The worker is
    /// told to sweep its own invalid entries.
    pub async fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now_ms();
        let memory_removed = self
            .memory
            .write()
            .await
            .remove_invalid(now, &self.config.version);

        let cutoff = now.saturating_sub(self.config.max_age_ms);
        let mut durable_removed = match self.durable.remove_older_than(cutoff).await {
            Ok(count) => count,
            Err(e) => {
                warn!("Durable tier sweep failed: {}", e);
                0
            }
        };
        match self
            .durable
            .remove_version_mismatch(&self.config.version)
            .await
        {
            Ok(count) => durable_removed += count,
            Err(e) => warn!("Durable tier version sweep failed: {}", e),
        }

        if let Some(worker) = &self.worker {
            worker.notify(WorkerMessage::CacheSweep {
                now,
                version: self.config.version.clone(),
            });
        }

        CleanupReport {
            memory_removed,
            durable_removed,
        }
    }

    // == Lifecycle ==
    /// Starts the periodic cleanup task. Calling it again while running is
    /// a no-op.
    pub fn start(self: &Arc<Self>) {
        let Ok(mut handle) = self.cleanup_handle.lock() else {
            return;
        };
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let interval = Duration::from_secs(self.config.cleanup_interval_secs);
        *handle = Some(spawn_cleanup_task(Arc::clone(self), interval));
    }

    /// Stops the periodic cleanup task, if running.
    pub fn stop(&self) {
        let handle = self.cleanup_handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            handle.abort();
            info!("Cache cleanup task stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.cleanup_handle
            .lock()
            .map(|h| h.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }

    // == Analytics ==
    pub fn record_prefetch(&self) {
        self.analytics.record_prefetch();
    }

    pub async fn analytics(&self) -> AnalyticsSnapshot {
        let memory = self.memory.read().await;
        self.analytics
            .snapshot(memory.current_size(), memory.len(), memory.max_size())
    }

    // == Accessors ==
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// True if `key` is currently held by the memory tier, valid or not.
    pub async fn memory_contains(&self, key: &str) -> bool {
        self.memory.read().await.contains(key)
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.read().await.len()
    }

    pub async fn memory_usage(&self) -> usize {
        self.memory.read().await.current_size()
    }
}
