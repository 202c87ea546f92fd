//! Cache Entry Module
//!
//! Defines the envelope stored by every tier, with TTL and version validity.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::{CacheError, Result};

// == Cache Entry ==
/// A single cached value and its metadata.
///
/// Every tier holds its own copy; entries are never shared mutably.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T = Value> {
    /// The stored value
    pub data: T,
    /// Creation timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Time to live in milliseconds
    pub ttl: u64,
    /// Config version the entry was written under
    pub version: String,
    /// Serialized size in bytes
    pub size: usize,
    pub access_count: u64,
    /// Last read (Unix milliseconds)
    pub last_access: u64,
}

impl CacheEntry<Value> {
    // == Constructor ==
    /// Serializes `data` once to size it and builds the envelope.
    ///
    /// Values that cannot be represented as JSON are rejected rather than
    /// stored with a guessed size.
    pub fn encode<T: Serialize + ?Sized>(
        data: &T,
        now: u64,
        ttl: u64,
        version: &str,
    ) -> Result<Self> {
        let bytes =
            serde_json::to_vec(data).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;

        Ok(Self {
            data: value,
            timestamp: now,
            ttl,
            version: version.to_string(),
            size: bytes.len(),
            access_count: 0,
            last_access: now,
        })
    }

    /// Decodes the payload into a concrete type.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.data).map_err(|e| CacheError::Deserialization(e.to_string()))
    }
}

impl<T> CacheEntry<T> {
    // == Validity ==
    /// An entry is valid while `now - timestamp < ttl` and its version
    /// matches the current configuration.
    pub fn is_valid(&self, now: u64, version: &str) -> bool {
        !self.is_expired(now) && self.version == version
    }

    /// Checks the TTL half of validity only.
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.timestamp) >= self.ttl
    }

    /// Records a read.
    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_access = now;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_encode_measures_serialized_size() {
        let entry = CacheEntry::encode(&json!({"x": 1}), 1_000, 500, "v1").unwrap();

        assert_eq!(entry.size, r#"{"x":1}"#.len());
        assert_eq!(entry.timestamp, 1_000);
        assert_eq!(entry.last_access, 1_000);
        assert_eq!(entry.access_count, 0);
        assert_eq!(entry.version, "v1");
    }

    #[test]
    fn test_encode_rejects_non_string_map_keys() {
        let mut map = HashMap::new();
        map.insert(vec![1u8, 2], "value");

        let result = CacheEntry::encode(&map, 0, 100, "v1");
        assert!(matches!(result, Err(CacheError::Serialization(_))));
    }

    #[test]
    fn test_validity_window() {
        let entry = CacheEntry::encode(&"value", 1_000, 1_000, "v1").unwrap();

        assert!(entry.is_valid(1_000, "v1"));
        assert!(entry.is_valid(1_999, "v1"));
        // Boundary: expired once the full TTL has elapsed
        assert!(!entry.is_valid(2_000, "v1"));
        assert!(!entry.is_valid(2_001, "v1"));
    }

    #[test]
    fn test_version_mismatch_is_invalid() {
        let entry = CacheEntry::encode(&"value", 1_000, 60_000, "v1").unwrap();

        assert!(!entry.is_valid(1_000, "v2"));
        assert!(!entry.is_expired(1_000));
    }

    #[test]
    fn test_touch_updates_access_metadata() {
        let mut entry = CacheEntry::encode(&1, 1_000, 10_000, "v1").unwrap();
        entry.touch(1_200);
        entry.touch(1_300);

        assert_eq!(entry.access_count, 2);
        assert_eq!(entry.last_access, 1_300);
    }

    #[test]
    fn test_decode_into_type() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Point {
            x: i32,
        }

        let entry = CacheEntry::encode(&json!({"x": 7}), 0, 100, "v1").unwrap();
        assert_eq!(entry.decode::<Point>().unwrap(), Point { x: 7 });
        assert!(matches!(
            entry.decode::<Vec<String>>(),
            Err(CacheError::Deserialization(_))
        ));
    }

    #[test]
    fn test_envelope_uses_camel_case() {
        let entry = CacheEntry::encode(&1, 5, 10, "v1").unwrap();
        let wire = serde_json::to_value(&entry).unwrap();

        assert!(wire.get("accessCount").is_some());
        assert!(wire.get("lastAccess").is_some());
    }
}
