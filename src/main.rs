//! LRU Cache demo
//!
//! Builds a cache from a JSON configuration, runs a small workload through
//! every operation and prints the resulting statistics.
//!
//! The configuration is read from the first command-line argument, falling
//! back to the `LRU_CACHE_CONFIG` environment variable.

use std::env;

use anyhow::Context;
use serde_json::json;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lru_cache::LruCache;

const DEMO_ENTRIES: usize = 2_000;

fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lru_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = env::args().nth(1).or_else(|| env::var("LRU_CACHE_CONFIG").ok());
    let cache: LruCache<serde_json::Value> = LruCache::new("demo", config.as_deref())
        .context("failed to create cache")?;
    info!("Cache \"{}\" ready", cache.cache_name());

    for i in 0..DEMO_ENTRIES {
        let parity = if i % 2 == 0 { "even" } else { "odd" };
        let value = json!({
            "id": i,
            "token": format!("token-{i:06}"),
            "tags": ["demo", parity],
        });
        let ttl = if i % 10 == 0 { 0 } else { -1 };
        cache.put(format!("user:{i}"), value, ttl);
    }

    let hits = cache
        .get_multi(&["user:1", "user:2", "user:10", "missing"])
        .iter()
        .filter(|value| value.is_some())
        .count();
    info!("Multi-get returned {} live values", hits);

    if let Err(e) = cache.delete("missing") {
        info!("Expected failure: {}", e);
    }
    if let Err(e) = cache.delay_delete("user:1", 30) {
        info!("user:1 already evicted: {}", e);
    }
    cache.clear_prefix_keys("user:19");

    let stats = serde_json::to_string_pretty(&cache.stats())?;
    println!("{stats}");

    cache.destroy();
    info!("Demo complete");
    Ok(())
}
