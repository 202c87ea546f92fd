//! Error types for the tiered cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Fetch Error Enum ==
/// Errors raised by a network fetch.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Transport-level failure reported by the HTTP client
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The origin could not be reached
    #[error("Origin unavailable: {0}")]
    Unavailable(String),

    /// The response body could not be read
    #[error("Invalid response body: {0}")]
    Body(String),
}

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Value could not be serialized into an entry
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Stored payload could not be decoded
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Durable storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Network failure that no cached entry could satisfy
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<std::io::Error> for CacheError {
    fn from(err: std::io::Error) -> Self {
        CacheError::Storage(err.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
