//! LRU Cache - a size-bounded in-process cache
//!
//! Provides TTL expiration, LRU eviction driven by estimated memory usage,
//! and a background janitor that shrinks and sweeps the cache.

pub mod cache;
pub mod config;
pub mod error;
mod tasks;

pub use cache::{CacheStats, DeepSize, LruCache, SizeContext};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
