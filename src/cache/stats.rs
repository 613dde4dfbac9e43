//! Cache Statistics Module
//!
//! Tracks hits, misses and what the janitor reclaimed.

use chrono::{DateTime, Utc};
use serde::Serialize;

// == Cache Stats ==
/// Snapshot of cache counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    /// Reads that returned a live value
    pub hits: u64,
    /// Reads that found nothing or an expired entry
    pub misses: u64,
    /// Entries evicted by shrinking to the low watermark
    pub evictions: u64,
    /// Expired entries physically removed by the sweep
    pub expirations: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// Current estimated size in bytes
    pub size_bytes: usize,
    /// Completion time of the last expiry sweep
    pub last_sweep_at: Option<DateTime<Utc>>,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    // == Record Hit ==
    /// Records a cache hit.
    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    // == Record Miss ==
    /// Records a cache miss.
    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    // == Record Eviction ==
    /// Records an entry evicted by shrinking.
    pub fn record_eviction(&mut self) {
        self.evictions += 1;
    }

    // == Record Expiration ==
    /// Records an expired entry removed by the sweep.
    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    // == Record Sweep ==
    /// Stamps the end of a sweep.
    pub fn record_sweep(&mut self) {
        self.last_sweep_at = Some(Utc::now());
    }
}
