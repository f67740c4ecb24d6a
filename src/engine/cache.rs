//! Time-bounded weather cache.
//!
//! Entries are keyed by coordinates rounded to a fixed number of decimal
//! places and expire a fixed TTL after they were stored. Expired entries are
//! never returned: they are dropped when read and purged in bulk by an
//! optional background sweep.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::types::WeatherRecord;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_KEY_PRECISION: u32 = 4;

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// Coordinates scaled by `10^precision` and rounded to integers.
///
/// Two points produce the same key exactly when they agree to `precision`
/// decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    lat: i64,
    lon: i64,
    precision: u32,
}

impl CacheKey {
    pub fn new(lat: f64, lon: f64, precision: u32) -> Self {
        let scale = 10f64.powi(precision as i32);
        Self {
            lat: (lat * scale).round() as i64,
            lon: (lon * scale).round() as i64,
            precision,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scale = 10f64.powi(self.precision as i32);
        let p = self.precision as usize;
        write!(
            f,
            "{:.p$}, {:.p$}",
            self.lat as f64 / scale,
            self.lon as f64 / scale
        )
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CacheEntry {
    value: WeatherRecord,
    stored_at: Instant,
}

/// Counters exposed on the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Shared, internally locked TTL cache of untagged weather records.
pub struct WeatherCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    sweep_interval: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl WeatherCache {
    pub fn new(ttl: Duration, sweep_interval: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            sweep_interval,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The cached record for `key`, if present and younger than the TTL.
    pub fn get(&self, key: &CacheKey) -> Option<WeatherRecord> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(key) {
                Some(entry) if now.duration_since(entry.stored_at) < self.ttl => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Expired: drop it unless a concurrent put already replaced it.
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = entries.get(key) {
            if now.duration_since(entry.stored_at) >= self.ttl {
                entries.remove(key);
                debug!(key = %key, "Evicted expired cache entry");
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` under `key`, replacing any previous entry.
    pub fn put(&self, key: CacheKey, value: WeatherRecord) {
        let entry = CacheEntry {
            value,
            stored_at: Instant::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, entry);
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.stored_at) < self.ttl);
        before - entries.len()
    }

    /// Number of physically stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Spawn the periodic purge task.
    ///
    /// The task only holds a weak reference and exits once the cache has
    /// been dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.sweep_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = cache.len(), "Cache sweep");
                }
            }
        })
    }
}

impl Default for WeatherCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_SWEEP_INTERVAL)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
