//! Composition root wiring the manager, tiers, HTTP cache and preloader.

use std::sync::Arc;

use tracing::info;

use crate::cache::CacheManager;
use crate::config::{CacheConfig, PrefetchConfig};
use crate::error::Result;
use crate::http::{Fetcher, HttpCache};
use crate::preload::ResourcePreloader;
use crate::tiers::{ChannelWorker, DurableStore, FileStore, MemoryRecordStore};

/// One shared instance of every cache component.
///
/// Build it once at application startup and hand clones of its parts to
/// whoever needs them.
pub struct CacheSuite<F> {
    pub manager: Arc<CacheManager>,
    pub http: HttpCache<F>,
    pub preloader: ResourcePreloader<F>,
    worker: Arc<ChannelWorker>,
}

impl<F: Fetcher> CacheSuite<F> {
    /// Builds every component from configuration and starts the cleanup
    /// task and the worker. Must be called inside a tokio runtime.
    pub fn from_config(
        cache_config: CacheConfig,
        prefetch_config: PrefetchConfig,
        fetcher: F,
    ) -> Result<Self> {
        let durable: Arc<dyn DurableStore> = match &cache_config.storage_dir {
            Some(dir) => {
                info!("Durable cache tier at {}", dir.display());
                Arc::new(FileStore::new(dir))
            }
            None => Arc::new(MemoryRecordStore::new()),
        };
        let worker = Arc::new(ChannelWorker::spawn());

        let manager = Arc::new(
            CacheManager::builder(cache_config)
                .durable(durable)
                .worker(worker.clone())
                .build()?,
        );
        manager.start();

        let http = HttpCache::new(manager.clone(), Arc::new(fetcher));
        let preloader = ResourcePreloader::new(http.clone(), prefetch_config);

        info!(
            "Cache suite ready: max_size={} bytes, strategy={}, version={}",
            manager.config().max_size,
            manager.config().strategy,
            manager.config().version
        );

        Ok(Self {
            manager,
            http,
            preloader,
            worker,
        })
    }

    /// Stops background work. Pending refreshes are awaited first.
    pub async fn shutdown(&self) {
        self.http.settle().await;
        self.preloader.wait_idle().await;
        self.manager.stop();
        self.worker.shutdown();
        info!("Cache suite shut down");
    }
}
