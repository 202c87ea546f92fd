//! HTTP Caching Module
//!
//! Wraps network fetches in one of three caching strategies built on the
//! cache manager. Responses are stored as `{status, headers, data}` entries,
//! so the usual TTL and version rules apply to them.

mod client;
mod fetcher;
mod request;
mod strategy;

pub use client::{CacheOptions, HttpCache};
pub use fetcher::{Fetcher, ReqwestFetcher};
pub use request::{HttpRequest, HttpResponse, RequestOptions};
pub use strategy::Strategy;
