//! Backing Tiers Module
//!
//! The slower tiers consulted after the memory store: a durable record
//! store and an optional worker-delegated cache.

mod durable;
mod worker;

pub use durable::{DurableStore, FileStore, KeyFilter, MemoryRecordStore};
pub use worker::{ChannelWorker, StaticWorker, WorkerMessage, WorkerReply, WorkerTier};
