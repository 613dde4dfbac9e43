//! Cache Module
//!
//! Provides in-memory caching with TTL expiration, size estimation and LRU eviction.

mod entry;
mod index;
mod size;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use index::OrderedIndex;
pub use size::{DeepSize, SizeContext};
pub use stats::CacheStats;
pub use store::LruCache;

pub(crate) use store::Shared;
