//! Resource Preloader
//!
//! Speculative prefetching through the HTTP cache with probabilistic
//! admission, URL dedup and a cap on concurrent fetches. Viewport triggers
//! and explicit critical batches share the same queue.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::PrefetchConfig;
use crate::http::{CacheOptions, Fetcher, HttpCache, HttpRequest, Strategy};

/// Source of uniform samples in `[0, 1)` for admission decisions.
pub trait Sampler: Send + Sync {
    fn sample(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn sample(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Always returns the same sample.
#[derive(Debug, Clone, Copy)]
pub struct FixedSampler(pub f64);

impl Sampler for FixedSampler {
    fn sample(&self) -> f64 {
        self.0
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queued: VecDeque<String>,
    in_flight: HashSet<String>,
}

impl QueueState {
    fn knows(&self, url: &str) -> bool {
        self.in_flight.contains(url) || self.queued.iter().any(|u| u == url)
    }

    fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty()
    }
}

// == Resource Preloader ==
/// Must be used from within a tokio runtime; prefetches run as spawned
/// tasks.
pub struct ResourcePreloader<F> {
    http: HttpCache<F>,
    config: Arc<PrefetchConfig>,
    sampler: Arc<dyn Sampler>,
    state: Arc<Mutex<QueueState>>,
    idle: Arc<Notify>,
}

impl<F> Clone for ResourcePreloader<F> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            config: Arc::clone(&self.config),
            sampler: Arc::clone(&self.sampler),
            state: Arc::clone(&self.state),
            idle: Arc::clone(&self.idle),
        }
    }
}

impl<F: Fetcher> ResourcePreloader<F> {
    pub fn new(http: HttpCache<F>, config: PrefetchConfig) -> Self {
        Self::with_sampler(http, config, Arc::new(RandomSampler))
    }

    pub fn with_sampler(
        http: HttpCache<F>,
        config: PrefetchConfig,
        sampler: Arc<dyn Sampler>,
    ) -> Self {
        Self {
            http,
            config: Arc::new(config),
            sampler,
            state: Arc::new(Mutex::new(QueueState::default())),
            idle: Arc::new(Notify::new()),
        }
    }

    // == Prefetch ==
    /// Offers `url` for speculative prefetching.
    ///
    /// Skipped with probability `1 - probability`, and skipped outright when
    /// disabled or already queued or in flight. Returns whether it was queued.
    pub fn prefetch(&self, url: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        if self.sampler.sample() >= self.config.probability {
            debug!("Prefetch of {} not sampled", url);
            return false;
        }
        self.admit(url)
    }

    /// Called when an element referencing `url` enters the viewport.
    pub fn on_visible(&self, url: &str) -> bool {
        self.prefetch(url)
    }

    /// Queues resources the page cannot do without. Critical URLs skip the
    /// probability sample but still dedup and respect the concurrency cap.
    ///
    /// Returns how many URLs were queued.
    pub fn preload_critical<I, S>(&self, urls: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.config.enabled {
            return 0;
        }
        urls.into_iter()
            .filter(|url| self.admit(url.as_ref()))
            .count()
    }

    fn admit(&self, url: &str) -> bool {
        {
            let Ok(mut state) = self.state.lock() else {
                return false;
            };
            if state.knows(url) {
                debug!("Prefetch of {} already pending", url);
                return false;
            }
            state.queued.push_back(url.to_string());
        }
        self.pump();
        true
    }

    /// Starts queued prefetches until the concurrency cap is reached.
    fn pump(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let max_concurrent = self.config.max_concurrent.max(1);

        while state.in_flight.len() < max_concurrent {
            let Some(url) = state.queued.pop_front() else {
                break;
            };
            state.in_flight.insert(url.clone());
            let preloader = self.clone();
            tokio::spawn(async move { preloader.run(url).await });
        }
    }

    async fn run(self, url: String) {
        if self.config.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.delay_ms)).await;
        }

        let request = HttpRequest::get(url.as_str());
        match self
            .http
            .fetch(request, CacheOptions::with_strategy(Strategy::CacheFirst))
            .await
        {
            Ok(_) => self.http.manager().record_prefetch(),
            Err(e) => debug!("Prefetch of {} failed: {}", url, e),
        }

        let idle = match self.state.lock() {
            Ok(mut state) => {
                state.in_flight.remove(&url);
                state.is_idle()
            }
            Err(_) => false,
        };
        self.pump();
        if idle {
            self.idle.notify_waiters();
        }
    }

    // == Introspection ==
    pub fn queued_len(&self) -> usize {
        self.state.lock().map(|s| s.queued.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.state.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn is_idle(&self) -> bool {
        self.state.lock().map(|s| s.is_idle()).unwrap_or(true)
    }

    /// Resolves once nothing is queued or in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheManager;
    use crate::config::CacheConfig;
    use crate::error::FetchError;
    use crate::http::HttpResponse;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Takes 50ms per request and records the peak number in flight.
    #[derive(Default)]
    struct SlowFetcher {
        calls: AtomicUsize,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, request: &HttpRequest) -> Result<HttpResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if request.url.contains("broken") {
                Err(FetchError::Unavailable("broken".to_string()))
            } else {
                Ok(HttpResponse::new(200, request.url.clone()))
            }
        }
    }

    fn preloader(
        config: PrefetchConfig,
        sample: f64,
    ) -> (ResourcePreloader<SlowFetcher>, Arc<SlowFetcher>) {
        let manager = Arc::new(CacheManager::new(CacheConfig::default()).unwrap());
        let fetcher = Arc::new(SlowFetcher::default());
        let http = HttpCache::new(manager, fetcher.clone());
        (
            ResourcePreloader::with_sampler(http, config, Arc::new(FixedSampler(sample))),
            fetcher,
        )
    }

    fn config(max_concurrent: usize) -> PrefetchConfig {
        PrefetchConfig {
            enabled: true,
            max_concurrent,
            probability: 0.5,
            delay_ms: 10,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetch_respects_probability() {
        let (admitted, _) = preloader(config(2), 0.2);
        assert!(admitted.prefetch("/a"));

        let (rejected, fetcher) = preloader(config(2), 0.7);
        assert!(!rejected.prefetch("/a"));
        rejected.wait_idle().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_preloader_admits_nothing() {
        let cfg = PrefetchConfig {
            enabled: false,
            ..config(2)
        };
        let (preloader, _) = preloader(cfg, 0.0);

        assert!(!preloader.prefetch("/a"));
        assert_eq!(preloader.preload_critical(["/b", "/c"]), 0);
        assert!(preloader.is_idle());
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_urls_are_skipped() {
        let (preloader, fetcher) = preloader(config(1), 0.0);

        assert!(preloader.prefetch("/a"));
        assert!(preloader.prefetch("/b"));
        // "/a" in flight, "/b" queued
        assert!(!preloader.on_visible("/a"));
        assert!(!preloader.prefetch("/b"));
        assert_eq!(preloader.in_flight_len(), 1);
        assert_eq!(preloader.queued_len(), 1);

        preloader.wait_idle().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap() {
        let (preloader, fetcher) = preloader(config(2), 0.0);

        let queued = preloader.preload_critical(["/1", "/2", "/3", "/4", "/5"]);
        assert_eq!(queued, 5);
        assert_eq!(preloader.in_flight_len(), 2);

        preloader.wait_idle().await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 5);
        assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
        let analytics = preloader.http.manager().analytics().await;
        assert_eq!(analytics.prefetches, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_critical_skips_sampling() {
        // A sample of 0.9 fails the 0.5 probability gate
        let (preloader, fetcher) = preloader(config(2), 0.9);

        assert!(!preloader.prefetch("/speculative"));
        assert_eq!(preloader.preload_critical(["/critical"]), 1);

        preloader.wait_idle().await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prefetched_resource_is_cached() {
        let (preloader, fetcher) = preloader(config(2), 0.0);

        preloader.prefetch("/jobs");
        preloader.wait_idle().await;

        let response = preloader.http.get("/jobs").await.unwrap();
        preloader.http.settle().await;
        assert!(response.from_cache);

        // Prefetching again is admitted but served from cache
        assert!(preloader.prefetch("/jobs"));
        preloader.wait_idle().await;
        assert_eq!(preloader.http.manager().analytics().await.prefetches, 2);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_prefetch_is_not_counted() {
        let (preloader, _) = preloader(config(2), 0.0);

        preloader.prefetch("/broken");
        preloader.wait_idle().await;

        assert!(preloader.is_idle());
        assert_eq!(preloader.http.manager().analytics().await.prefetches, 0);
    }
}
