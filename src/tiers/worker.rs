//! Worker-Delegated Tier
//!
//! An optional cooperating task with its own cache, reached only by message
//! passing. Lookups are bounded by a timeout; writes are fire-and-forget.
//! Entries are full envelopes, so the worker can sweep expired ones itself.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::CacheEntry;

// == Protocol ==
/// Messages understood by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    CacheGet { key: String },
    CacheSet { key: String, data: Value },
    CacheDelete { key: String },
    CacheClear,
    /// Lists stored keys starting with `prefix`.
    CacheKeys { prefix: String },
    /// Drops every entry that is no longer valid at `now` under `version`.
    CacheSweep { now: u64, version: String },
}

/// Reply to a `CACHE_GET` or `CACHE_KEYS`, sent on its own reply channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerReply {
    pub data: Option<Value>,
}

/// The worker tier as seen by the cache manager.
///
/// Implementations must never block the caller past `timeout` and never
/// surface errors: an unavailable worker is simply a miss.
#[async_trait]
pub trait WorkerTier: Send + Sync {
    async fn try_get(&self, key: &str, timeout: Duration) -> Option<Value>;

    /// Keys held by the worker that start with `prefix`; empty on timeout.
    async fn keys(&self, prefix: &str, timeout: Duration) -> Vec<String>;

    fn notify(&self, message: WorkerMessage);
}

/// Applies `message` to a worker-side map and returns the reply payload.
fn apply(store: &mut HashMap<String, Value>, message: WorkerMessage) -> Option<Value> {
    match message {
        WorkerMessage::CacheGet { key } => store.get(&key).cloned(),
        WorkerMessage::CacheSet { key, data } => {
            store.insert(key, data);
            None
        }
        WorkerMessage::CacheDelete { key } => {
            store.remove(&key);
            None
        }
        WorkerMessage::CacheClear => {
            store.clear();
            None
        }
        WorkerMessage::CacheKeys { prefix } => Some(Value::Array(
            store
                .keys()
                .filter(|key| key.starts_with(&prefix))
                .map(|key| Value::String(key.clone()))
                .collect(),
        )),
        WorkerMessage::CacheSweep { now, version } => {
            let before = store.len();
            store.retain(|_, data| {
                CacheEntry::<Value>::deserialize(&*data)
                    .is_ok_and(|entry| entry.is_valid(now, &version))
            });
            debug!("Cache worker swept {} entries", before - store.len());
            None
        }
    }
}

fn key_list(reply: Option<Value>) -> Vec<String> {
    reply
        .and_then(|data| serde_json::from_value(data).ok())
        .unwrap_or_default()
}

struct WorkerRequest {
    message: WorkerMessage,
    reply: Option<oneshot::Sender<WorkerReply>>,
}

// == Channel Worker ==
/// Handle to a background task holding the worker-side cache.
pub struct ChannelWorker {
    sender: mpsc::UnboundedSender<WorkerRequest>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelWorker {
    /// Spawns the worker task on the current tokio runtime.
    pub fn spawn() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(receiver));
        info!("Cache worker started");

        Self {
            sender,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Stops the worker task. Later lookups resolve to a miss.
    pub fn shutdown(&self) {
        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle {
            handle.abort();
            info!("Cache worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .map(|guard| guard.as_ref().is_some_and(|h| !h.is_finished()))
            .unwrap_or(false)
    }
}

impl Drop for ChannelWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl ChannelWorker {
    /// Sends `message` and waits up to `timeout` for the reply payload.
    async fn request(&self, message: WorkerMessage, timeout: Duration) -> Option<Value> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = WorkerRequest {
            message,
            reply: Some(reply_tx),
        };
        if self.sender.send(request).is_err() {
            debug!("Cache worker unavailable");
            return None;
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => reply.data,
            Ok(Err(_)) => None,
            Err(_) => {
                debug!("Cache worker timed out after {:?}", timeout);
                None
            }
        }
    }
}

#[async_trait]
impl WorkerTier for ChannelWorker {
    async fn try_get(&self, key: &str, timeout: Duration) -> Option<Value> {
        let message = WorkerMessage::CacheGet {
            key: key.to_string(),
        };
        self.request(message, timeout).await
    }

    async fn keys(&self, prefix: &str, timeout: Duration) -> Vec<String> {
        let message = WorkerMessage::CacheKeys {
            prefix: prefix.to_string(),
        };
        key_list(self.request(message, timeout).await)
    }

    fn notify(&self, message: WorkerMessage) {
        if self
            .sender
            .send(WorkerRequest {
                message,
                reply: None,
            })
            .is_err()
        {
            debug!("Cache worker unavailable, notification dropped");
        }
    }
}

/// Worker loop: owns its cache and answers until every handle is gone.
async fn run_worker(mut receiver: mpsc::UnboundedReceiver<WorkerRequest>) {
    let mut store: HashMap<String, Value> = HashMap::new();

    while let Some(request) = receiver.recv().await {
        let data = apply(&mut store, request.message);
        if let Some(reply) = request.reply {
            let _ = reply.send(WorkerReply { data });
        }
    }
}

// == Static Worker ==
/// In-process stand-in for the worker: a plain map plus an optional delay,
/// recording every notification it receives before applying it.
#[derive(Default)]
pub struct StaticWorker {
    data: Mutex<HashMap<String, Value>>,
    latency: Option<Duration>,
    notifications: Mutex<Vec<WorkerMessage>>,
}

impl StaticWorker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every lookup waits `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub fn insert(&self, key: &str, data: Value) {
        if let Ok(mut map) = self.data.lock() {
            map.insert(key.to_string(), data);
        }
    }

    pub fn notifications(&self) -> Vec<WorkerMessage> {
        self.notifications
            .lock()
            .map(|n| n.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl WorkerTier for StaticWorker {
    async fn try_get(&self, key: &str, timeout: Duration) -> Option<Value> {
        let lookup = async {
            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }
            self.data.lock().ok().and_then(|map| map.get(key).cloned())
        };
        tokio::time::timeout(timeout, lookup).await.ok().flatten()
    }

    async fn keys(&self, prefix: &str, _timeout: Duration) -> Vec<String> {
        let message = WorkerMessage::CacheKeys {
            prefix: prefix.to_string(),
        };
        let reply = self.data.lock().ok().and_then(|mut map| apply(&mut map, message));
        key_list(reply)
    }

    fn notify(&self, message: WorkerMessage) {
        if let Ok(mut notifications) = self.notifications.lock() {
            notifications.push(message.clone());
        }
        if let Ok(mut map) = self.data.lock() {
            apply(&mut map, message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[test]
    fn test_message_wire_format() {
        let msg = WorkerMessage::CacheSet {
            key: "k".to_string(),
            data: json!({"x": 1}),
        };
        let wire = serde_json::to_value(&msg).unwrap();
        assert_eq!(wire, json!({"type": "CACHE_SET", "key": "k", "data": {"x": 1}}));

        let clear = serde_json::to_value(WorkerMessage::CacheClear).unwrap();
        assert_eq!(clear, json!({"type": "CACHE_CLEAR"}));

        let sweep = serde_json::to_value(WorkerMessage::CacheSweep {
            now: 5,
            version: "v1".to_string(),
        })
        .unwrap();
        assert_eq!(sweep, json!({"type": "CACHE_SWEEP", "now": 5, "version": "v1"}));
    }

    fn envelope(timestamp: u64, ttl: u64, version: &str) -> Value {
        let entry = CacheEntry::encode(&"payload", timestamp, ttl, version).unwrap();
        serde_json::to_value(entry).unwrap()
    }

    #[tokio::test]
    async fn test_channel_worker_lists_keys_by_prefix() {
        let worker = ChannelWorker::spawn();
        for key in ["http:/a:{}", "http:/b:{}", "user:1"] {
            worker.notify(WorkerMessage::CacheSet {
                key: key.to_string(),
                data: json!(1),
            });
        }

        let mut keys = worker.keys("http:", TIMEOUT).await;
        keys.sort();
        assert_eq!(keys, vec!["http:/a:{}", "http:/b:{}"]);
        assert_eq!(worker.keys("", TIMEOUT).await.len(), 3);
    }

    #[tokio::test]
    async fn test_channel_worker_sweep_drops_invalid_entries() {
        let worker = ChannelWorker::spawn();
        let entries = [
            ("expired", envelope(0, 100, "v1")),
            ("fresh", envelope(0, 10_000, "v1")),
            ("old-version", envelope(0, 10_000, "v0")),
            ("not-an-envelope", json!("raw")),
        ];
        for (key, data) in entries {
            worker.notify(WorkerMessage::CacheSet {
                key: key.to_string(),
                data,
            });
        }

        worker.notify(WorkerMessage::CacheSweep {
            now: 500,
            version: "v1".to_string(),
        });

        assert_eq!(worker.keys("", TIMEOUT).await, vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_channel_worker_set_get_delete() {
        let worker = ChannelWorker::spawn();

        worker.notify(WorkerMessage::CacheSet {
            key: "k".to_string(),
            data: json!("v"),
        });
        assert_eq!(worker.try_get("k", TIMEOUT).await, Some(json!("v")));

        worker.notify(WorkerMessage::CacheDelete {
            key: "k".to_string(),
        });
        assert_eq!(worker.try_get("k", TIMEOUT).await, None);
    }

    #[tokio::test]
    async fn test_channel_worker_clear() {
        let worker = ChannelWorker::spawn();
        worker.notify(WorkerMessage::CacheSet {
            key: "a".to_string(),
            data: json!(1),
        });
        worker.notify(WorkerMessage::CacheClear);

        assert_eq!(worker.try_get("a", TIMEOUT).await, None);
    }

    #[tokio::test]
    async fn test_channel_worker_after_shutdown_is_miss() {
        let worker = ChannelWorker::spawn();
        worker.notify(WorkerMessage::CacheSet {
            key: "a".to_string(),
            data: json!(1),
        });
        worker.shutdown();
        tokio::task::yield_now().await;

        assert_eq!(worker.try_get("a", TIMEOUT).await, None);
        assert!(!worker.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_static_worker_timeout_is_miss() {
        let worker = StaticWorker::with_latency(Duration::from_secs(5));
        worker.insert("slow", json!(1));

        assert_eq!(worker.try_get("slow", TIMEOUT).await, None);
        assert_eq!(
            worker.try_get("slow", Duration::from_secs(10)).await,
            Some(json!(1))
        );
    }

    #[tokio::test]
    async fn test_static_worker_records_and_applies_notifications() {
        let worker = StaticWorker::new();
        worker.insert("a", json!(1));
        worker.notify(WorkerMessage::CacheClear);

        assert_eq!(worker.notifications(), vec![WorkerMessage::CacheClear]);
        assert!(worker.keys("", TIMEOUT).await.is_empty());
    }
}
