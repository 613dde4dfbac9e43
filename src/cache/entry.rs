//! Cache Entry Module
//!
//! Defines the record stored per key together with its expiry and size metadata.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::DeepSize;

// == Footprint constants ==
/// Per-key bookkeeping added to the key length, counted twice (map slot and node)
const KEY_OVERHEAD: usize = 16;
/// Expiry bookkeeping (timestamp and ttl)
const EXPIRY_OVERHEAD: usize = 16;
/// Node header and recency list links
const LINK_OVERHEAD: usize = 32;

// == Cache Entry ==
/// Represents a single cache entry with value and metadata.
#[derive(Debug)]
pub struct CacheEntry<V> {
    /// The key this entry is indexed under
    pub key: String,
    /// The stored value, shared with readers
    pub value: Arc<V>,
    /// Last write or successful read
    pub last_access: Instant,
    /// Time to live measured from `last_access`
    pub ttl: Duration,
    /// Memoized footprint estimate
    size_bytes: usize,
}

impl<V: DeepSize> CacheEntry<V> {
    // == Constructor ==
    /// Creates a new entry, stamped now, and measures it.
    pub fn new(key: String, value: V, ttl: Duration) -> Self {
        let mut entry = Self {
            key,
            value: Arc::new(value),
            last_access: Instant::now(),
            ttl,
            size_bytes: 0,
        };
        entry.size_bytes = entry.measure();
        entry
    }

    fn measure(&self) -> usize {
        (self.key.len() + KEY_OVERHEAD) * 2
            + (*self.value).deep_size()
            + EXPIRY_OVERHEAD
            + LINK_OVERHEAD
    }
}

impl<V> CacheEntry<V> {
    /// Estimated footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    // == Is Expired ==
    /// Checks whether the entry is past its ttl.
    ///
    /// An entry is expired once the time since `last_access` exceeds `ttl`.
    /// A zero ttl marks the entry expired from the moment it is written.
    pub fn is_expired(&self) -> bool {
        self.ttl.is_zero() || self.last_access.elapsed() > self.ttl
    }

    /// Restamps the entry as accessed now.
    pub fn touch(&mut self) {
        self.last_access = Instant::now();
    }

    /// Reschedules expiry to `ttl` from now.
    pub fn reschedule(&mut self, ttl: Duration) {
        self.ttl = ttl;
        self.last_access = Instant::now();
    }
}
