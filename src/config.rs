//! Configuration Module
//!
//! Handles cache watermarks and sweep period, optionally overridden by a JSON payload.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::{CacheError, Result};

// == Defaults ==
/// Default low watermark: shrinking drains down to this size (800 MiB)
pub const DEFAULT_LOW_SIZE: usize = 800 * (1 << 20);

/// Default high watermark: reaching this size triggers a shrink (1 GiB)
pub const DEFAULT_HIGH_SIZE: usize = 1 << 30;

/// Default expiry sweep period in seconds (1 day)
pub const DEFAULT_INTERVAL_SECS: u64 = 24 * 3600;

/// Longest accepted sweep period in seconds (10 years)
const MAX_INTERVAL_SECS: f64 = 10.0 * 365.0 * 24.0 * 3600.0;

/// TTL applied when `put` receives a negative ttl (365 days)
pub const DEFAULT_TTL_SECS: u64 = 365 * 24 * 3600;

/// Cache configuration parameters.
///
/// Built from defaults and optionally patched by a JSON payload with the keys
/// `name`, `low`, `high` and `interval`.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Cache name used in logs and returned by `cache_name`
    pub name: String,
    /// Low watermark in bytes
    pub low: usize,
    /// High watermark in bytes
    pub high: usize,
    /// Period of the expiry sweep
    pub interval: Duration,
}

impl CacheConfig {
    /// Creates a config with default watermarks and sweep period.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            low: DEFAULT_LOW_SIZE,
            high: DEFAULT_HIGH_SIZE,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
        }
    }

    /// Creates a config from a name and an optional JSON payload.
    ///
    /// The payload is applied leniently (see [`CacheConfig::apply_json`]);
    /// the resulting watermarks are then validated.
    pub fn from_json(name: impl Into<String>, payload: Option<&str>) -> Result<Self> {
        let mut config = Self::new(name);
        if let Some(payload) = payload {
            config.apply_json(payload);
        }
        config.validate()?;
        Ok(config)
    }

    // == Apply JSON ==
    /// Overrides fields from a JSON object payload.
    ///
    /// A payload that is not a JSON object is logged and ignored as a whole.
    /// Individual keys with the wrong type are logged and skipped.
    pub fn apply_json(&mut self, payload: &str) {
        if payload.trim().is_empty() {
            return;
        }
        info!("LruCache config: {}", payload);

        let fields: Map<String, Value> = match serde_json::from_str(payload) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("LruCache config format error: {}, using defaults", e);
                return;
            }
        };

        if let Some(value) = fields.get("name") {
            match value.as_str() {
                Some(name) => self.name = name.to_string(),
                None => warn!("LruCache config: ignoring non-string name {}", value),
            }
        }
        if let Some(value) = fields.get("low") {
            match as_bytes(value) {
                Some(low) => self.low = low,
                None => warn!("LruCache config: ignoring invalid low {}", value),
            }
        }
        if let Some(value) = fields.get("high") {
            match as_bytes(value) {
                Some(high) => self.high = high,
                None => warn!("LruCache config: ignoring invalid high {}", value),
            }
        }
        if let Some(value) = fields.get("interval") {
            let interval = value
                .as_f64()
                .filter(|secs| *secs <= MAX_INTERVAL_SECS)
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok());
            match interval {
                Some(interval) => self.interval = interval,
                None => warn!("LruCache config: ignoring invalid interval {}", value),
            }
        }
    }

    // == Validate ==
    /// Checks the invariants the engine relies on.
    pub fn validate(&self) -> Result<()> {
        if self.low >= self.high {
            return Err(CacheError::InvalidConfig(format!(
                "low watermark ({}) must be less than high watermark ({})",
                self.low, self.high
            )));
        }
        if self.interval.is_zero() || self.interval.as_secs_f64() > MAX_INTERVAL_SECS {
            return Err(CacheError::InvalidConfig(format!(
                "sweep interval {:?} out of range",
                self.interval
            )));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::new("default")
    }
}

/// Reads a non-negative byte count; fractional values are truncated.
fn as_bytes(value: &Value) -> Option<usize> {
    if let Some(n) = value.as_u64() {
        return usize::try_from(n).ok();
    }
    value
        .as_f64()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n as usize)
}
