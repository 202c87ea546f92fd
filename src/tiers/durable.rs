//! Durable Tier
//!
//! Record stores that keep full entry envelopes so validity can be replayed
//! after a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::{fs, sync::RwLock};
use tracing::debug;

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

const RECORD_EXTENSION: &str = "entry";
const TEMP_EXTENSION: &str = "tmp";

/// Exact-match test applied to keys that already share a prefix.
pub type KeyFilter = dyn Fn(&str) -> bool + Send + Sync;

/// Key-indexed record store backing the durable tier.
///
/// Errors are returned to the caller; the manager treats them as non-fatal.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Removes every record with `timestamp < cutoff_ms`.
    async fn remove_older_than(&self, cutoff_ms: u64) -> Result<usize>;

    /// Removes every record written under a version other than `version`.
    async fn remove_version_mismatch(&self, version: &str) -> Result<usize>;

    /// Removes every record whose key starts with `prefix` and passes
    /// `matches`. Returns the removed keys.
    async fn remove_keys(&self, prefix: &str, matches: &KeyFilter) -> Result<Vec<String>>;

    async fn len(&self) -> Result<usize>;
}

// == Memory Record Store ==
/// Map-backed record store, used when no storage directory is configured.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, CacheEntry>>,
    failing: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent operation fail, as an unavailable store would.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            Err(CacheError::Storage("record store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MemoryRecordStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.check_available()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        self.check_available()?;
        self.records
            .write()
            .await
            .insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check_available()?;
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.check_available()?;
        self.records.write().await.clear();
        Ok(())
    }

    async fn remove_older_than(&self, cutoff_ms: u64) -> Result<usize> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, entry| entry.timestamp >= cutoff_ms);
        Ok(before - records.len())
    }

    async fn remove_version_mismatch(&self, version: &str) -> Result<usize> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, entry| entry.version == version);
        Ok(before - records.len())
    }

    async fn remove_keys(&self, prefix: &str, matches: &KeyFilter) -> Result<Vec<String>> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let keys: Vec<String> = records
            .keys()
            .filter(|key| key.starts_with(prefix) && matches(key.as_str()))
            .cloned()
            .collect();
        for key in &keys {
            records.remove(key);
        }
        Ok(keys)
    }

    async fn len(&self) -> Result<usize> {
        self.check_available()?;
        Ok(self.records.read().await.len())
    }
}

// == File Store ==
/// On-disk record: the entry together with the key it was stored under.
#[derive(Serialize)]
struct RecordRef<'a> {
    key: &'a str,
    entry: &'a CacheEntry,
}

#[derive(Deserialize)]
struct Record {
    key: String,
    entry: CacheEntry,
}

/// One JSON record per key inside a directory.
///
/// File names are the SHA-256 of the key, so every key maps to a short,
/// fixed-length name. The key itself lives inside the record. Writes go to
/// a temporary file first and are renamed into place.
pub struct FileStore {
    base_path: PathBuf,
    write_seq: AtomicU64,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
            write_seq: AtomicU64::new(0),
        }
    }

    fn key_digest(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.base_path
            .join(format!("{}.{}", Self::key_digest(key), RECORD_EXTENSION))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        self.base_path.join(format!(
            "{}.{}-{}.{}",
            Self::key_digest(key),
            std::process::id(),
            seq,
            TEMP_EXTENSION
        ))
    }

    async fn ensure_base_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn read_record(path: &Path) -> Result<Record> {
        let raw = fs::read(path).await?;
        serde_json::from_slice(&raw).map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    /// Lists record files, empty when the directory does not exist yet.
    async fn record_paths(&self) -> Result<Vec<PathBuf>> {
        let mut dir = match fs::read_dir(&self.base_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut paths = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn remove_record(path: &Path) -> Result<()> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes every record `predicate` rejects; unreadable records go too.
    async fn retain<F>(&self, predicate: F) -> Result<usize>
    where
        F: Fn(&CacheEntry) -> bool + Send + Sync,
    {
        let mut removed = 0;
        for path in self.record_paths().await? {
            let keep = match Self::read_record(&path).await {
                Ok(record) => predicate(&record.entry),
                Err(e) => {
                    debug!("Dropping unreadable record {}: {}", path.display(), e);
                    false
                }
            };
            if !keep {
                Self::remove_record(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let raw = match fs::read(self.record_path(key)).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: Record =
            serde_json::from_slice(&raw).map_err(|e| CacheError::Deserialization(e.to_string()))?;
        if record.key != key {
            debug!("Record for '{}' holds key '{}', ignoring", key, record.key);
            return Ok(None);
        }
        Ok(Some(record.entry))
    }

    async fn put(&self, key: &str, entry: &CacheEntry) -> Result<()> {
        self.ensure_base_dir().await?;
        let raw = serde_json::to_vec(&RecordRef { key, entry })
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        let temp = self.temp_path(key);
        fs::write(&temp, raw).await?;
        if let Err(e) = fs::rename(&temp, self.record_path(key)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Self::remove_record(&self.record_path(key)).await
    }

    async fn clear(&self) -> Result<()> {
        for path in self.record_paths().await? {
            Self::remove_record(&path).await?;
        }
        Ok(())
    }

    async fn remove_older_than(&self, cutoff_ms: u64) -> Result<usize> {
        self.retain(|entry| entry.timestamp >= cutoff_ms).await
    }

    async fn remove_version_mismatch(&self, version: &str) -> Result<usize> {
        let version = version.to_string();
        self.retain(move |entry| entry.version == version).await
    }

    async fn remove_keys(&self, prefix: &str, matches: &KeyFilter) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for path in self.record_paths().await? {
            let record = match Self::read_record(&path).await {
                Ok(record) => record,
                Err(e) => {
                    debug!("Skipping unreadable record {}: {}", path.display(), e);
                    continue;
                }
            };
            if record.key.starts_with(prefix) && matches(record.key.as_str()) {
                Self::remove_record(&path).await?;
                removed.push(record.key);
            }
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.record_paths().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry_at(timestamp: u64, version: &str) -> CacheEntry {
        CacheEntry::encode(&json!({"at": timestamp}), timestamp, 60_000, version).unwrap()
    }

    #[tokio::test]
    async fn test_memory_store_roundtrip_and_delete() {
        let store = MemoryRecordStore::new();
        let entry = entry_at(1_000, "v1");

        store.put("k", &entry).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(entry));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_memory_store_failing_mode() {
        let store = MemoryRecordStore::new();
        store.set_failing(true);

        assert!(matches!(store.get("k").await, Err(CacheError::Storage(_))));
        assert!(store.put("k", &entry_at(1, "v1")).await.is_err());

        store.set_failing(false);
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_sweeps() {
        let store = MemoryRecordStore::new();
        store.put("old", &entry_at(100, "v1")).await.unwrap();
        store.put("new", &entry_at(900, "v1")).await.unwrap();
        store.put("other", &entry_at(900, "v0")).await.unwrap();

        assert_eq!(store.remove_older_than(500).await.unwrap(), 1);
        assert_eq!(store.remove_version_mismatch("v1").await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_store_remove_keys() {
        let store = MemoryRecordStore::new();
        store.put("http:/a:{}", &entry_at(1, "v1")).await.unwrap();
        store.put("http:/a:b:{}", &entry_at(1, "v1")).await.unwrap();
        store.put("user:1", &entry_at(1, "v1")).await.unwrap();

        let removed = store
            .remove_keys("http:/a:", &|key: &str| !key.contains(":b:"))
            .await
            .unwrap();

        assert_eq!(removed, vec!["http:/a:{}".to_string()]);
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_file_store_missing_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("records"));

        assert_eq!(store.get("nope").await.unwrap(), None);
        assert_eq!(store.len().await.unwrap(), 0);
        store.delete("nope").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let entry = entry_at(1_000, "v1");

        FileStore::new(dir.path())
            .put("http:/api/jobs:{}", &entry)
            .await
            .unwrap();

        let reopened = FileStore::new(dir.path());
        assert_eq!(reopened.get("http:/api/jobs:{}").await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_file_store_sweeps_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("old", &entry_at(100, "v1")).await.unwrap();
        store.put("new", &entry_at(900, "v1")).await.unwrap();
        store.put("stale-version", &entry_at(900, "v0")).await.unwrap();

        assert_eq!(store.remove_older_than(500).await.unwrap(), 1);
        assert_eq!(store.remove_version_mismatch("v1").await.unwrap(), 1);
        assert_eq!(store.len().await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_file_store_long_key_uses_fixed_length_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let url = format!("https://example.com/api/projects?filter={}", "q".repeat(200));
        let key = format!("http:{}:{{\"method\":\"GET\"}}", url);
        let entry = entry_at(1_000, "v1");

        store.put(&key, &entry).await.unwrap();

        let name = store.record_path(&key);
        assert_eq!(name.file_name().unwrap().len(), 64 + 1 + RECORD_EXTENSION.len());
        assert_eq!(store.len().await.unwrap(), 1);
        assert_eq!(store.get(&key).await.unwrap(), Some(entry));
    }

    #[tokio::test]
    async fn test_file_store_put_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.put("k", &entry_at(1, "v1")).await.unwrap();
        store.put("k", &entry_at(2, "v1")).await.unwrap();

        let mut listing = fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(item) = listing.next_entry().await.unwrap() {
            names.push(item.file_name());
        }
        assert_eq!(names.len(), 1);
        assert_eq!(store.get("k").await.unwrap().unwrap().timestamp, 2);
    }

    #[tokio::test]
    async fn test_file_store_sweep_keeps_records_written_concurrently() {
        let dir = tempfile::tempdir().unwrap();
        let store = std::sync::Arc::new(FileStore::new(dir.path()));
        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..50u64 {
                    store.put("hot", &entry_at(10_000 + i, "v1")).await.unwrap();
                }
            })
        };
        for _ in 0..50 {
            store.remove_older_than(5_000).await.unwrap();
        }
        writer.await.unwrap();

        assert_eq!(store.get("hot").await.unwrap().unwrap().timestamp, 10_049);
    }

    #[tokio::test]
    async fn test_file_store_remove_keys_reads_key_from_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.put("http:/jobs:{}", &entry_at(1, "v1")).await.unwrap();
        store.put("http:/jobs/7:{}", &entry_at(1, "v1")).await.unwrap();
        store.put("user:1", &entry_at(1, "v1")).await.unwrap();

        let mut removed = store.remove_keys("http:", &|_: &str| true).await.unwrap();
        removed.sort();

        assert_eq!(removed, vec!["http:/jobs/7:{}", "http:/jobs:{}"]);
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.get("user:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_store_corrupt_record_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        fs::write(store.record_path("bad"), b"not json").await.unwrap();

        assert!(matches!(
            store.get("bad").await,
            Err(CacheError::Deserialization(_))
        ));
        // The sweep discards it
        assert_eq!(store.remove_older_than(0).await.unwrap(), 1);
    }
}
