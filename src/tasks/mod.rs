//! Background Tasks Module
//!
//! Contains background tasks that run periodically while the cache is live.
//!
//! # Tasks
//! - Cleanup: sweeps expired entries at the configured interval

mod cleanup;

pub use cleanup::spawn_cleanup_task;
