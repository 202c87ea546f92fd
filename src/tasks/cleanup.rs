//! Cleanup Task
//!
//! Background task that periodically sweeps expired entries from the memory
//! and durable tiers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Spawns a background task that runs [`CacheManager::cleanup`] every
/// `interval`.
///
/// # Returns
/// A JoinHandle for the spawned task; aborting it stops the sweeps.
///
/// # Example
/// ```ignore
/// let manager = Arc::new(CacheManager::new(CacheConfig::default())?);
/// let handle = spawn_cleanup_task(manager.clone(), Duration::from_secs(300));
/// // Later, during shutdown:
/// handle.abort();
/// ```
pub fn spawn_cleanup_task(manager: Arc<CacheManager>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            "Starting cache cleanup task with interval of {} seconds",
            interval.as_secs()
        );

        loop {
            tokio::time::sleep(interval).await;

            let report = manager.cleanup().await;

            if report.total() > 0 {
                info!(
                    "Cache cleanup: removed {} memory entries and {} durable records",
                    report.memory_removed, report.durable_removed
                );
            } else {
                debug!("Cache cleanup: nothing to remove");
            }
        }
    })
}
