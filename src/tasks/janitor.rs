//! Janitor Task
//!
//! Background worker that shrinks the cache to its low watermark on request
//! and periodically removes expired entries.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::Shared;
use crate::error::Result;

/// Entries and bytes reclaimed by one shrink or sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reclaimed {
    pub entries: usize,
    pub bytes: usize,
}

impl Reclaimed {
    fn add(&mut self, bytes: usize) {
        self.entries += 1;
        self.bytes += bytes;
    }
}

// == Janitor ==
/// Handle to the janitor thread.
///
/// The worker runs on its own OS thread with a single-threaded tokio runtime
/// and reacts to three events: a shrink request, a sweep tick and shutdown.
#[derive(Debug)]
pub(crate) struct Janitor {
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

impl Janitor {
    /// Starts the janitor for `shared`, consuming shrink requests from `shrink_rx`.
    pub(crate) fn spawn<V>(shared: Arc<Shared<V>>, shrink_rx: mpsc::Receiver<()>) -> Result<Self>
    where
        V: Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        let (shutdown, shutdown_rx) = oneshot::channel();

        let thread = std::thread::Builder::new()
            .name(format!("lru-janitor-{}", shared.name))
            .spawn(move || runtime.block_on(run(shared, shrink_rx, shutdown_rx)))?;

        Ok(Self { shutdown, thread })
    }

    /// Signals shutdown and waits for the worker to exit.
    pub(crate) fn stop(self) {
        // A send error means the worker is already gone; join still applies.
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            warn!("LruCache janitor thread panicked");
        }
    }
}

async fn run<V>(
    shared: Arc<Shared<V>>,
    mut shrink_rx: mpsc::Receiver<()>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("LruCache({}) janitor start", shared.name);

    // First sweep one full period after start.
    let period = shared.interval;
    let mut ticker = time::interval_at(time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown_rx => break,
            Some(()) = shrink_rx.recv() => {
                shrink(&shared);
            }
            _ = ticker.tick() => {
                sweep(&shared);
            }
        }
    }

    debug!("LruCache({}) janitor end", shared.name);
}

// == Shrink ==
/// Evicts least recently used entries until the size is at or below `low`.
///
/// The lock is taken once per eviction so foreground calls interleave.
pub(crate) fn shrink<V>(shared: &Shared<V>) -> Reclaimed {
    let started = Instant::now();
    let start_size = shared.state.lock().cur_size;

    let mut reclaimed = Reclaimed::default();
    loop {
        let mut state = shared.state.lock();
        if state.cur_size <= shared.low {
            break;
        }
        match state.evict_oldest() {
            Some(bytes) => reclaimed.add(bytes),
            None => break,
        }
    }

    if reclaimed.entries > 0 {
        info!(
            "LruCache({}) shrink: size={}B, shrunk={}B, evicted={}, elapsed={:?}",
            shared.name,
            start_size,
            reclaimed.bytes,
            reclaimed.entries,
            started.elapsed()
        );
    }
    reclaimed
}

// == Sweep ==
/// Physically removes every entry found expired at sweep time.
///
/// Keys are snapshotted once and each is re-checked under its own lock
/// acquisition.
pub(crate) fn sweep<V>(shared: &Shared<V>) -> Reclaimed {
    info!("LruCache({}) sweep start", shared.name);

    let (keys, cur_size) = {
        let state = shared.state.lock();
        (state.index.keys(), state.cur_size)
    };
    info!(
        "LruCache({}) sweep: total={}, size={}B",
        shared.name,
        keys.len(),
        cur_size
    );

    let started = Instant::now();
    let mut reclaimed = Reclaimed::default();
    for key in &keys {
        if let Some(bytes) = shared.state.lock().remove_if_expired(key) {
            reclaimed.add(bytes);
        }
    }
    shared.state.lock().stats.record_sweep();

    info!(
        "LruCache({}) sweep end: cleared={}, cleared_size={}B, elapsed={:?}",
        shared.name,
        reclaimed.entries,
        reclaimed.bytes,
        started.elapsed()
    );
    reclaimed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::LruCache;
    use std::thread::sleep;
    use std::time::Duration;

    fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            sleep(Duration::from_millis(20));
        }
        done()
    }

    #[test]
    fn test_janitor_shrinks_on_high_watermark() {
        // Each u64 entry with a 2-byte key is 92 bytes.
        let cache: LruCache<u64> =
            LruCache::new("shrink", Some(r#"{"low": 300, "high": 500}"#)).unwrap();

        for i in 0..6u64 {
            cache.put(format!("k{i}"), i, 60);
        }

        assert!(wait_until(Duration::from_secs(2), || cache.cache_size() <= 300));
        // 552 bytes drained to 276: the three oldest keys are gone.
        assert_eq!(cache.cache_size(), 276);
        assert!(!cache.is_exist("k0"));
        assert!(!cache.is_exist("k2"));
        assert!(cache.is_exist("k3"));
        assert!(cache.is_exist("k5"));
    }

    #[test]
    fn test_janitor_sweeps_on_interval() {
        let cache: LruCache<String> =
            LruCache::new("sweep", Some(r#"{"low": 100000, "high": 200000, "interval": 0.2}"#))
                .unwrap();

        cache.put("expire_soon", "value".to_string(), 0);
        cache.put("long_lived", "value".to_string(), 3600);

        assert!(wait_until(Duration::from_secs(2), || cache.len() == 1));
        assert!(cache.is_exist("long_lived"));
        assert_eq!(cache.stats().expirations, 1);
    }

    #[test]
    fn test_janitor_stops_on_destroy() {
        let cache: LruCache<u32> =
            LruCache::new("stop", Some(r#"{"low": 100, "high": 200, "interval": 0.1}"#)).unwrap();

        cache.destroy();

        // Crossing the high watermark with no janitor must not block.
        for i in 0..10u32 {
            cache.put(format!("key{i}"), i, 60);
        }
        assert!(cache.cache_size() >= 200);
    }

    #[test]
    fn test_shrink_on_empty_cache() {
        let cache: LruCache<u32> =
            LruCache::new("empty", Some(r#"{"low": 0, "high": 100}"#)).unwrap();
        assert_eq!(shrink(cache.shared()), Reclaimed::default());
    }
}
