//! Fetch wrapper that caches responses through the cache manager.

use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::cache::CacheManager;
use crate::error::{FetchError, Result};
use crate::http::{Fetcher, HttpRequest, HttpResponse, RequestOptions, Strategy};

/// Per-call caching options. Unset fields fall back to the manager's
/// configuration and the request's default key.
#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    /// TTL in milliseconds
    pub ttl: Option<u64>,
    pub strategy: Option<Strategy>,
    pub key: Option<String>,
}

impl CacheOptions {
    pub fn with_strategy(strategy: Strategy) -> Self {
        Self {
            strategy: Some(strategy),
            ..Self::default()
        }
    }

    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl = Some(ttl_ms);
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

// == HTTP Cache ==
/// Cheap to clone; clones share the manager, the fetcher and the set of
/// background refreshes.
pub struct HttpCache<F> {
    manager: Arc<CacheManager>,
    fetcher: Arc<F>,
    refreshes: Arc<Mutex<JoinSet<()>>>,
}

impl<F> Clone for HttpCache<F> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
            fetcher: Arc::clone(&self.fetcher),
            refreshes: Arc::clone(&self.refreshes),
        }
    }
}

impl<F: Fetcher> HttpCache<F> {
    pub fn new(manager: Arc<CacheManager>, fetcher: Arc<F>) -> Self {
        Self {
            manager,
            fetcher,
            refreshes: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    // == Fetch ==
    /// Fetches `request` under the requested (or configured) strategy.
    ///
    /// Errors only when the network fails and no cached copy can stand in.
    pub async fn fetch(
        &self,
        request: HttpRequest,
        options: CacheOptions,
    ) -> Result<HttpResponse> {
        let strategy = options.strategy.unwrap_or(self.manager.config().strategy);
        let key = options.key.unwrap_or_else(|| request.cache_key());
        strategy.execute(self, &request, &key, options.ttl).await
    }

    /// GET `url` with default options.
    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.fetch(HttpRequest::get(url), CacheOptions::default()).await
    }

    /// Drops every cached response for exactly `url`, whatever its options.
    /// Responses stored under custom keys are left alone.
    pub async fn invalidate(&self, url: &str) -> usize {
        let prefix = format!("http:{}:", url);
        let owned_prefix = prefix.clone();
        let for_url = move |key: &str| {
            key.strip_prefix(owned_prefix.as_str())
                .is_some_and(|rest| serde_json::from_str::<RequestOptions>(rest).is_ok())
        };
        self.manager.invalidate_matching(&prefix, &for_url).await
    }

    /// Waits for every background refresh started so far.
    pub async fn settle(&self) {
        let mut pending = match self.refreshes.lock() {
            Ok(mut set) => std::mem::take(&mut *set),
            Err(_) => return,
        };
        while pending.join_next().await.is_some() {}
    }

    pub fn manager(&self) -> &Arc<CacheManager> {
        &self.manager
    }

    // == Strategy Building Blocks ==
    pub(crate) async fn cached(&self, key: &str) -> Option<HttpResponse> {
        let mut response: HttpResponse = self.manager.get(key).await?;
        response.from_cache = true;
        Some(response)
    }

    pub(crate) async fn network(
        &self,
        request: &HttpRequest,
    ) -> std::result::Result<HttpResponse, FetchError> {
        self.fetcher.fetch(request).await
    }

    /// Caches 2xx responses; anything else passes through uncached.
    pub(crate) async fn store(&self, key: &str, response: &HttpResponse, ttl: Option<u64>) {
        if !response.is_success() {
            debug!("Not caching {} response for '{}'", response.status, key);
            return;
        }
        if let Err(e) = self.manager.set(key, response, ttl).await {
            warn!("Failed to cache response for '{}': {}", key, e);
        }
    }

    /// Refreshes `key` from the network without blocking the caller.
    /// Failures are logged and otherwise dropped.
    pub(crate) fn revalidate(&self, request: HttpRequest, key: String, ttl: Option<u64>) {
        let cache = self.clone();
        let task = async move {
            match cache.network(&request).await {
                Ok(response) => cache.store(&key, &response, ttl).await,
                Err(e) => warn!("Background refresh of {} failed: {}", request.url, e),
            }
        };

        match self.refreshes.lock() {
            Ok(mut set) => {
                // Reap finished refreshes so the set does not grow unbounded
                while set.try_join_next().is_some() {}
                set.spawn(task);
            }
            Err(_) => {
                tokio::spawn(task);
            }
        }
    }
}
