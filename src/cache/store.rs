//! Cache Store Module
//!
//! Main cache engine: the ordered index and size accounting behind one lock,
//! plus the handle that feeds shrink requests to the janitor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

use crate::cache::{CacheEntry, CacheStats, DeepSize, OrderedIndex};
use crate::config::{CacheConfig, DEFAULT_TTL_SECS};
use crate::error::{CacheError, Result};
use crate::tasks::Janitor;

// == Cache State ==
/// Everything guarded by the cache lock.
#[derive(Debug)]
pub(crate) struct CacheState<V> {
    pub(crate) index: OrderedIndex<V>,
    /// Sum of `size_bytes` over all entries in `index`
    pub(crate) cur_size: usize,
    pub(crate) stats: CacheStats,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            index: OrderedIndex::new(),
            cur_size: 0,
            stats: CacheStats::new(),
        }
    }

    /// Inserts or replaces an entry and returns the new running size.
    fn upsert(&mut self, entry: CacheEntry<V>) -> usize {
        self.cur_size += entry.size_bytes();
        if let Some(old) = self.index.insert_or_update(entry) {
            self.cur_size -= old.size_bytes();
        }
        self.cur_size
    }

    /// Returns the value if the entry is live, bumping its recency.
    ///
    /// Expired entries are left where they are for the sweep to collect.
    fn read(&mut self, key: &str) -> Option<Arc<V>> {
        let value = match self.index.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.touch();
                Some(Arc::clone(&entry.value))
            }
            _ => None,
        };

        if value.is_some() {
            self.index.touch(key);
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }
        value
    }

    pub(crate) fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.index.remove(key)?;
        self.cur_size -= entry.size_bytes();
        Some(entry)
    }

    /// Evicts the least recently used entry, returning its size.
    pub(crate) fn evict_oldest(&mut self) -> Option<usize> {
        let entry = self.index.pop_oldest()?;
        self.cur_size -= entry.size_bytes();
        self.stats.record_eviction();
        Some(entry.size_bytes())
    }

    /// Removes `key` if it is still present and expired, returning its size.
    pub(crate) fn remove_if_expired(&mut self, key: &str) -> Option<usize> {
        if !self.index.get(key)?.is_expired() {
            return None;
        }
        let entry = self.remove(key)?;
        self.stats.record_expiration();
        Some(entry.size_bytes())
    }

    fn clear(&mut self) {
        self.index.clear();
        self.cur_size = 0;
    }

    /// Full-scan recomputation of the running size.
    #[cfg(test)]
    pub(crate) fn recomputed_size(&self) -> usize {
        self.index.iter().map(|entry| entry.size_bytes()).sum()
    }
}

// == Shared ==
/// State shared between the cache handle and its janitor.
#[derive(Debug)]
pub(crate) struct Shared<V> {
    pub(crate) name: String,
    pub(crate) low: usize,
    pub(crate) high: usize,
    pub(crate) interval: Duration,
    pub(crate) state: Mutex<CacheState<V>>,
}

// == LRU Cache ==
/// Size-bounded cache with TTL expiration and LRU eviction.
///
/// Values are estimated with [`DeepSize`]. When the estimated total reaches
/// the high watermark, a background janitor evicts least recently used
/// entries until the total is at or below the low watermark. The janitor also
/// sweeps expired entries every `interval`.
///
/// Reads hand out `Arc<V>`, so `V` does not need to be `Clone`.
pub struct LruCache<V> {
    shared: Arc<Shared<V>>,
    /// Capacity-one queue of shrink requests
    shrink_tx: mpsc::Sender<()>,
    janitor: Mutex<Option<Janitor>>,
}

impl<V> LruCache<V>
where
    V: DeepSize + Send + Sync + 'static,
{
    // == Constructor ==
    /// Creates a cache named `name`, optionally configured by a JSON payload.
    ///
    /// Recognised keys are `name`, `low`, `high` (bytes) and `interval`
    /// (seconds). Fails if the resulting low watermark is not below the high
    /// one.
    pub fn new(name: impl Into<String>, config: Option<&str>) -> Result<Self> {
        Self::with_config(CacheConfig::from_json(name, config)?)
    }

    /// Creates a cache from an explicit configuration and starts its janitor.
    pub fn with_config(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared {
            name: config.name,
            low: config.low,
            high: config.high,
            interval: config.interval,
            state: Mutex::new(CacheState::new()),
        });
        let (shrink_tx, shrink_rx) = mpsc::channel(1);
        let janitor = Janitor::spawn(Arc::clone(&shared), shrink_rx)?;

        info!(
            "LruCache created: name=\"{}\", low={}B ({:.3}MB), high={}B ({:.3}MB), interval={:?}",
            shared.name,
            shared.low,
            shared.low as f64 / 1024.0 / 1024.0,
            shared.high,
            shared.high as f64 / 1024.0 / 1024.0,
            shared.interval
        );

        Ok(Self {
            shared,
            shrink_tx,
            janitor: Mutex::new(Some(janitor)),
        })
    }

    // == Put ==
    /// Stores `value` under `key` with a ttl in seconds.
    ///
    /// A negative ttl means the default of 365 days. A zero ttl stores the
    /// entry already expired: reads will not return it and the next sweep
    /// removes it. Overwriting a key replaces value and ttl and makes it the
    /// most recently used entry.
    ///
    /// If the total size reaches the high watermark a shrink is requested.
    /// While a previous request is still pending this call waits for the
    /// janitor to pick it up.
    pub fn put(&self, key: impl Into<String>, value: V, ttl_secs: i64) {
        let entry = CacheEntry::new(key.into(), value, normalize_ttl(ttl_secs));
        let cur_size = self.shared.state.lock().upsert(entry);

        if cur_size >= self.shared.high {
            self.request_shrink();
        }
    }

    fn request_shrink(&self) {
        // Blocking is not allowed on a runtime thread; the pending request
        // already drains to the low watermark.
        if tokio::runtime::Handle::try_current().is_ok() {
            match self.shrink_tx.try_send(()) {
                Ok(()) => {}
                Err(TrySendError::Full(())) => {
                    debug!(
                        "LruCache({}) shrink already pending, request coalesced",
                        self.shared.name
                    );
                }
                Err(TrySendError::Closed(())) => {
                    debug!(
                        "LruCache({}) janitor stopped, shrink request dropped",
                        self.shared.name
                    );
                }
            }
            return;
        }
        if self.shrink_tx.blocking_send(()).is_err() {
            debug!(
                "LruCache({}) janitor stopped, shrink request dropped",
                self.shared.name
            );
        }
    }
}

impl<V> LruCache<V> {
    // == Get ==
    /// Returns the value if present and not expired, marking it most recently used.
    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        self.shared.state.lock().read(key)
    }

    /// Looks up several keys under one lock, in input order.
    pub fn get_multi<K: AsRef<str>>(&self, keys: &[K]) -> Vec<Option<Arc<V>>> {
        let mut state = self.shared.state.lock();
        keys.iter().map(|key| state.read(key.as_ref())).collect()
    }

    /// Like [`LruCache::get`], with an explicit found flag.
    pub fn get_ex(&self, key: &str) -> (Option<Arc<V>>, bool) {
        let value = self.get(key);
        let found = value.is_some();
        (value, found)
    }

    // == Delete ==
    /// Removes `key`.
    pub fn delete(&self, key: &str) -> Result<()> {
        match self.shared.state.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(CacheError::KeyNotFound(key.to_string())),
        }
    }

    // == Delay Delete ==
    /// Postpones expiry of a live entry to `delay_secs` from now.
    ///
    /// An entry that already expired is left untouched.
    pub fn delay_delete(&self, key: &str, delay_secs: u64) -> Result<()> {
        let mut state = self.shared.state.lock();
        let entry = state
            .index
            .get_mut(key)
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))?;
        if !entry.is_expired() {
            entry.reschedule(Duration::from_secs(delay_secs));
        }
        Ok(())
    }

    /// Returns true if `key` is present and not expired. Recency is unchanged.
    pub fn is_exist(&self, key: &str) -> bool {
        self.shared
            .state
            .lock()
            .index
            .get(key)
            .is_some_and(|entry| !entry.is_expired())
    }

    // == Clear ==
    /// Drops every entry.
    pub fn clear_all(&self) {
        self.shared.state.lock().clear();
    }

    /// Removes every key starting with `prefix`, returning how many were removed.
    ///
    /// Keys are snapshotted first and removed one lock acquisition at a time,
    /// so a matching key inserted meanwhile may survive.
    pub fn clear_prefix_keys(&self, prefix: &str) -> usize {
        let name = &self.shared.name;
        info!("LruCache({}) clear prefix \"{}\" start", name, prefix);

        let started = Instant::now();
        let (keys, cur_size) = {
            let state = self.shared.state.lock();
            (state.index.keys(), state.cur_size)
        };
        info!(
            "LruCache({}) clear prefix \"{}\" scanning: total={}, size={}B, elapsed={:?}",
            name,
            prefix,
            keys.len(),
            cur_size,
            started.elapsed()
        );

        let started = Instant::now();
        let (mut cleared, mut cleared_bytes) = (0, 0);
        for key in keys.iter().filter(|key| key.starts_with(prefix)) {
            if let Some(entry) = self.shared.state.lock().remove(key) {
                cleared += 1;
                cleared_bytes += entry.size_bytes();
            }
        }

        info!(
            "LruCache({}) clear prefix \"{}\" end: total={}, cleared={}, cleared_size={}B, elapsed={:?}",
            name,
            prefix,
            keys.len(),
            cleared,
            cleared_bytes,
            started.elapsed()
        );
        cleared
    }

    // == Introspection ==
    pub fn cache_name(&self) -> &str {
        &self.shared.name
    }

    pub fn low(&self) -> usize {
        self.shared.low
    }

    pub fn high(&self) -> usize {
        self.shared.high
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.shared.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.state.lock().index.is_empty()
    }

    /// Estimated total size in bytes.
    pub fn cache_size(&self) -> usize {
        self.shared.state.lock().cur_size
    }

    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> CacheStats {
        let state = self.shared.state.lock();
        let mut stats = state.stats.clone();
        stats.total_entries = state.index.len();
        stats.size_bytes = state.cur_size;
        stats
    }

    // == Destroy ==
    /// Stops the janitor and waits for it to exit. Later calls do nothing.
    pub fn destroy(&self) {
        let janitor = self.janitor.lock().take();
        if let Some(janitor) = janitor {
            info!("LruCache({}) destroy", self.shared.name);
            janitor.stop();
        }
    }

    #[cfg(test)]
    pub(crate) fn shared(&self) -> &Shared<V> {
        &self.shared
    }
}

impl<V> Drop for LruCache<V> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<V> std::fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("name", &self.shared.name)
            .field("low", &self.shared.low)
            .field("high", &self.shared.high)
            .field("interval", &self.shared.interval)
            .finish()
    }
}

/// Maps a caller ttl in seconds to a duration; negative means the default.
fn normalize_ttl(ttl_secs: i64) -> Duration {
    match u64::try_from(ttl_secs) {
        Ok(secs) => Duration::from_secs(secs),
        Err(_) => Duration::from_secs(DEFAULT_TTL_SECS),
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{shrink, sweep};
    use std::thread::sleep;

    /// Watermarks far above anything these tests store.
    fn quiet_cache() -> LruCache<String> {
        LruCache::new("test", Some(r#"{"low": 1000000, "high": 2000000}"#)).unwrap()
    }

    fn entry_size(key: &str, value: &str) -> usize {
        CacheEntry::new(key.to_string(), value.to_string(), Duration::ZERO).size_bytes()
    }

    fn assert_size_consistent<V>(cache: &LruCache<V>) {
        let state = cache.shared().state.lock();
        assert_eq!(state.cur_size, state.recomputed_size());
    }

    #[test]
    fn test_store_new() {
        let cache = quiet_cache();
        assert_eq!(cache.len(), 0);
        assert!(cache.is_empty());
        assert_eq!(cache.cache_size(), 0);
        assert_eq!(cache.cache_name(), "test");
    }

    #[test]
    fn test_config_name_override() {
        let cache: LruCache<String> =
            LruCache::new("given", Some(r#"{"name":"configured","low":10,"high":20}"#)).unwrap();
        assert_eq!(cache.cache_name(), "configured");
        assert_eq!(cache.low(), 10);
        assert_eq!(cache.high(), 20);
    }

    #[test]
    fn test_invalid_watermarks_fail_construction() {
        let result: Result<LruCache<String>> = LruCache::new("bad", Some(r#"{"low":20,"high":10}"#));
        assert!(matches!(result, Err(CacheError::InvalidConfig(_))));
    }

    #[test]
    fn test_put_and_get() {
        let cache = quiet_cache();

        cache.put("key1", "value1".to_string(), 60);
        let value = cache.get("key1").unwrap();

        assert_eq!(value.as_str(), "value1");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cache_size(), entry_size("key1", "value1"));
    }

    #[test]
    fn test_get_nonexistent() {
        let cache = quiet_cache();
        assert!(cache.get("nonexistent").is_none());
        assert_eq!(cache.get_ex("nonexistent"), (None, false));
    }

    #[test]
    fn test_get_ex_found_flag() {
        let cache = quiet_cache();
        cache.put("k", "v".to_string(), 60);

        let (value, found) = cache.get_ex("k");
        assert!(found);
        assert_eq!(value.unwrap().as_str(), "v");
    }

    #[test]
    fn test_overwrite_adjusts_size() {
        let cache = quiet_cache();

        cache.put("key1", "short".to_string(), 60);
        cache.put("key1", "a much longer value".to_string(), 60);

        assert_eq!(cache.get("key1").unwrap().as_str(), "a much longer value");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cache_size(), entry_size("key1", "a much longer value"));
        assert_size_consistent(&cache);
    }

    #[test]
    fn test_delete() {
        let cache = quiet_cache();
        cache.put("a", "1".to_string(), 60);
        cache.put("b", "2".to_string(), 60);

        cache.delete("a").unwrap();

        assert!(cache.get("a").is_none());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.cache_size(), entry_size("b", "2"));
    }

    #[test]
    fn test_delete_nonexistent_leaves_state() {
        let cache = quiet_cache();
        cache.put("a", "1".to_string(), 60);
        let size = cache.cache_size();

        let result = cache.delete("missing");

        assert!(matches!(result, Err(CacheError::KeyNotFound(ref k)) if k == "missing"));
        assert_eq!(cache.cache_size(), size);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ttl_expiration_is_logical() {
        let cache = quiet_cache();
        cache.put("k", "v".to_string(), 1);

        assert!(cache.get("k").is_some());
        sleep(Duration::from_millis(1100));

        assert!(cache.get("k").is_none());
        assert!(!cache.is_exist("k"));
        // Still stored until swept.
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_zero_ttl_never_readable() {
        let cache = quiet_cache();
        cache.put("k", "v".to_string(), 0);

        assert!(cache.get("k").is_none());
        assert!(!cache.is_exist("k"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_negative_ttl_uses_default() {
        let cache = quiet_cache();
        cache.put("k", "v".to_string(), -1);

        let state = cache.shared().state.lock();
        let entry = state.index.get("k").unwrap();
        assert_eq!(entry.ttl, Duration::from_secs(DEFAULT_TTL_SECS));
    }

    #[test]
    fn test_expired_read_keeps_recency() {
        let cache = quiet_cache();
        cache.put("old", "v".to_string(), 0);
        cache.put("new", "v".to_string(), 60);

        assert!(cache.get("old").is_none());

        let state = cache.shared().state.lock();
        assert_eq!(state.index.oldest().unwrap().key, "old");
    }

    #[test]
    fn test_get_multi_in_input_order() {
        let cache = quiet_cache();
        cache.put("b", "2".to_string(), 0);
        cache.put("a", "1".to_string(), 60);
        cache.put("c", "3".to_string(), 60);

        let values = cache.get_multi(&["b", "missing", "a"]);

        assert_eq!(values.len(), 3);
        assert!(values[0].is_none());
        assert!(values[1].is_none());
        assert_eq!(values[2].as_deref().map(String::as_str), Some("1"));

        // The expired entry is neither removed nor promoted.
        assert_eq!(cache.len(), 3);
        let state = cache.shared().state.lock();
        assert_eq!(state.index.keys(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_delay_delete_reschedules() {
        let cache = quiet_cache();
        cache.put("k", "v".to_string(), 1);

        cache.delay_delete("k", 3).unwrap();
        sleep(Duration::from_millis(1500));

        assert!(cache.is_exist("k"));
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn test_delay_delete_expired_is_noop() {
        let cache = quiet_cache();
        cache.put("k", "v".to_string(), 0);

        assert!(cache.delay_delete("k", 60).is_ok());
        assert!(!cache.is_exist("k"));
    }

    #[test]
    fn test_delay_delete_missing() {
        let cache = quiet_cache();
        let result = cache.delay_delete("missing", 5);
        assert!(matches!(result, Err(CacheError::KeyNotFound(_))));
    }

    #[test]
    fn test_is_exist_does_not_touch() {
        let cache = quiet_cache();
        cache.put("a", "1".to_string(), 60);
        cache.put("b", "2".to_string(), 60);

        assert!(cache.is_exist("a"));

        let state = cache.shared().state.lock();
        assert_eq!(state.index.oldest().unwrap().key, "a");
    }

    #[test]
    fn test_clear_all() {
        let cache = quiet_cache();
        cache.put("a", "1".to_string(), 60);
        cache.put("b", "2".to_string(), 60);

        cache.clear_all();

        assert!(cache.is_empty());
        assert_eq!(cache.cache_size(), 0);
    }

    #[test]
    fn test_clear_prefix_keys() {
        let cache = quiet_cache();
        for key in ["a1", "a2", "b1"] {
            cache.put(key, "value".to_string(), 60);
        }
        let before = cache.cache_size();

        let cleared = cache.clear_prefix_keys("a");

        assert_eq!(cleared, 2);
        assert!(cache.get("a1").is_none());
        assert!(cache.get("a2").is_none());
        assert!(cache.get("b1").is_some());
        assert_eq!(
            cache.cache_size(),
            before - entry_size("a1", "value") - entry_size("a2", "value")
        );
        assert_size_consistent(&cache);
    }

    #[test]
    fn test_shrink_evicts_least_recently_used() {
        // Three equal entries of 90 bytes; one eviction brings 270 down to 180.
        let cache: LruCache<u64> =
            LruCache::new("lru", Some(r#"{"low": 200, "high": 100000}"#)).unwrap();
        cache.put("A", 1, 60);
        cache.put("B", 2, 60);
        cache.put("C", 3, 60);
        assert_eq!(cache.cache_size(), 3 * 90);
        cache.get("A");

        let reclaimed = shrink(cache.shared());

        assert_eq!(reclaimed.entries, 1);
        assert!(cache.get("B").is_none());
        assert!(cache.get("A").is_some());
        assert!(cache.get("C").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_sweep_removes_expired_only() {
        let cache = quiet_cache();
        cache.put("gone", "v".to_string(), 0);
        cache.put("kept", "v".to_string(), 60);

        let reclaimed = sweep(cache.shared());

        assert_eq!(reclaimed.entries, 1);
        assert_eq!(reclaimed.bytes, entry_size("gone", "v"));
        assert_eq!(cache.len(), 1);
        assert!(cache.is_exist("kept"));
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert!(stats.last_sweep_at.is_some());
        assert_size_consistent(&cache);
    }

    #[test]
    fn test_stats_counts_hits_and_misses() {
        let cache = quiet_cache();
        cache.put("k", "v".to_string(), 60);
        cache.get("k");
        cache.get("missing");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.total_entries, 1);
        assert_eq!(stats.size_bytes, cache.cache_size());
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let cache = quiet_cache();
        cache.destroy();
        cache.destroy();

        // Foreground operations keep working without a janitor.
        cache.put("k", "v".to_string(), 60);
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn test_normalize_ttl() {
        assert_eq!(normalize_ttl(5), Duration::from_secs(5));
        assert_eq!(normalize_ttl(0), Duration::ZERO);
        assert_eq!(normalize_ttl(-1), Duration::from_secs(DEFAULT_TTL_SECS));
        assert_eq!(normalize_ttl(i64::MIN), Duration::from_secs(DEFAULT_TTL_SECS));
    }

    #[tokio::test]
    async fn test_put_in_runtime_after_destroy_does_not_block() {
        let cache: LruCache<u64> =
            LruCache::new("closed", Some(r#"{"low": 100, "high": 200}"#)).unwrap();
        cache.destroy();

        // Every put past high hits the closed queue and returns immediately.
        for i in 0..10u64 {
            cache.put(format!("k{i}"), i, 60);
        }
        assert_eq!(cache.len(), 10);
        assert!(cache.cache_size() >= 200);
    }
}
