//! TTL + LRU result cache with snapshot persistence and a background sweep.
//!
//! The cache is generic over its value type so each caller stores a concrete
//! result shape. It holds no reference to the data its values were computed
//! from; callers clear it when that data changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::config::CacheConfig;
use crate::error::Result;
use crate::obs;
use crate::snapshot;

/// Bounds required of cached values.
pub trait CacheValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CacheValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry<V> {
    value: V,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    /// Logical access clock; breaks ties between equal timestamps.
    #[serde(skip)]
    access_seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        (now - self.created_at)
            .to_std()
            .map_or(false, |age| age > ttl)
    }

    fn recency(&self) -> (DateTime<Utc>, u64) {
        (self.last_accessed_at, self.access_seq)
    }
}

/// Cache statistics. Hits and misses are cumulative for the session.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub max_size: usize,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PersistedStats {
    hits: u64,
    misses: u64,
    size: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PersistedConfig {
    max_size: usize,
    ttl_secs: u64,
}

#[derive(Serialize)]
struct SnapshotOut<'a, V> {
    entries: &'a HashMap<String, CacheEntry<V>>,
    stats: PersistedStats,
    config: PersistedConfig,
}

#[derive(Deserialize)]
struct SnapshotIn<V> {
    entries: HashMap<String, CacheEntry<V>>,
    #[serde(default)]
    config: Option<PersistedConfig>,
}

#[derive(Debug)]
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    clock: u64,
}

impl<V> Default for CacheState<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            clock: 0,
        }
    }
}

impl<V> CacheState<V> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Remove the least recently accessed entry.
    fn evict_lru(&mut self) -> Option<String> {
        let key = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.recency())
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&key);
        obs::emit_cache_evicted(&key);
        Some(key)
    }

    fn remove_expired(&mut self, now: DateTime<Utc>, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now, ttl));
        before - self.entries.len()
    }
}

#[derive(Debug)]
struct CacheInner<V> {
    state: Mutex<CacheState<V>>,
    config: CacheConfig,
    path: Option<PathBuf>,
}

impl<V: CacheValue> CacheInner<V> {
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep(&self) -> usize {
        let mut state = self.lock();
        let expired = state.remove_expired(Utc::now(), self.config.ttl);
        if expired > 0 {
            obs::emit_cache_swept(expired, state.entries.len());
        }
        expired
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        let state = self.lock();
        let out = SnapshotOut {
            entries: &state.entries,
            stats: PersistedStats {
                hits: state.hits,
                misses: state.misses,
                size: state.entries.len(),
            },
            config: PersistedConfig {
                max_size: self.config.max_size,
                ttl_secs: self.config.ttl.as_secs(),
            },
        };
        snapshot::write_atomic(path, &out)?;
        debug!(path = %path.display(), entries = state.entries.len(), "cache snapshot saved");
        Ok(())
    }

    fn load_from(&self, path: &Path) -> usize {
        let loaded = match snapshot::read::<SnapshotIn<V>>(path) {
            Ok(Some(snap)) => snap,
            Ok(None) => {
                debug!(path = %path.display(), "no cache snapshot; starting empty");
                *self.lock() = CacheState::default();
                return 0;
            }
            Err(e) => {
                obs::emit_persistence_degraded("cache", path, &e);
                *self.lock() = CacheState::default();
                return 0;
            }
        };

        if let Some(saved) = loaded.config {
            if saved.max_size != self.config.max_size
                || saved.ttl_secs != self.config.ttl.as_secs()
            {
                debug!(
                    saved_max_size = saved.max_size,
                    saved_ttl_secs = saved.ttl_secs,
                    "cache snapshot written with different config; active config applies"
                );
            }
        }

        let mut next = CacheState {
            entries: loaded.entries,
            ..CacheState::default()
        };
        let dropped = next.remove_expired(Utc::now(), self.config.ttl);

        // Restore a stable LRU order for entries that share a timestamp.
        let mut order: Vec<(String, DateTime<Utc>)> = next
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.last_accessed_at))
            .collect();
        order.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        for (key, _) in order {
            let seq = next.tick();
            if let Some(entry) = next.entries.get_mut(&key) {
                entry.access_seq = seq;
            }
        }

        while next.entries.len() > self.config.max_size {
            if next.evict_lru().is_none() {
                break;
            }
        }

        let count = next.entries.len();
        *self.lock() = next;
        debug!(path = %path.display(), entries = count, expired = dropped, "cache snapshot loaded");
        count
    }
}

struct Sweeper {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Bounded, expiring key/value cache.
pub struct ResultCache<V: CacheValue> {
    inner: Arc<CacheInner<V>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<V: CacheValue> ResultCache<V> {
    /// Create a cache, load the snapshot at `path` if given, and start the
    /// expiry sweep when called inside a tokio runtime.
    pub fn new(config: CacheConfig, path: Option<PathBuf>) -> Self {
        let inner = Arc::new(CacheInner {
            state: Mutex::new(CacheState::default()),
            config,
            path,
        });
        if let Some(ref path) = inner.path {
            inner.load_from(path);
        }

        let sweeper = spawn_sweeper(Arc::clone(&inner));
        Self {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Cache without a snapshot file.
    pub fn in_memory(config: CacheConfig) -> Self {
        Self::new(config, None)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up `key`. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Utc::now();
        let mut state = self.inner.lock();

        let expired = match state.entries.get(key) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(now, self.inner.config.ttl),
        };
        if expired {
            state.entries.remove(key);
            state.misses += 1;
            return None;
        }

        let seq = state.tick();
        state.hits += 1;
        let entry = state.entries.get_mut(key)?;
        entry.last_accessed_at = now;
        entry.access_seq = seq;
        Some(entry.value.clone())
    }

    /// Insert or replace `key`, evicting the least recently accessed entry
    /// when a new key would exceed capacity.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_if(key, value, || true);
    }

    /// Like [`ResultCache::set`], but only stores the value if `still_valid`
    /// returns true. The check runs under the cache lock, so it is ordered
    /// against concurrent [`ResultCache::clear`] calls. Returns whether the
    /// value was stored.
    pub fn set_if(
        &self,
        key: impl Into<String>,
        value: V,
        still_valid: impl FnOnce() -> bool,
    ) -> bool {
        let key = key.into();
        if self.inner.config.max_size == 0 {
            return false;
        }

        let now = Utc::now();
        let mut state = self.inner.lock();
        if !still_valid() {
            return false;
        }
        if !state.entries.contains_key(&key) {
            while state.entries.len() >= self.inner.config.max_size {
                if state.evict_lru().is_none() {
                    break;
                }
            }
        }
        let seq = state.tick();
        state.entries.insert(
            key,
            CacheEntry {
                value,
                created_at: now,
                last_accessed_at: now,
                access_seq: seq,
            },
        );
        true
    }

    /// Drop every entry. Hit and miss counters are kept.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        debug!(dropped, "cache cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        let lookups = state.hits + state.misses;
        CacheStats {
            size: state.entries.len(),
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups > 0 {
                state.hits as f64 / lookups as f64
            } else {
                0.0
            },
            max_size: self.inner.config.max_size,
            ttl_secs: self.inner.config.ttl.as_secs(),
        }
    }

    /// Remove every expired entry now. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep()
    }

    /// Write the snapshot to the configured path. No-op without a path.
    pub fn save(&self) -> Result<()> {
        match self.inner.path {
            Some(ref path) => self.inner.save_to(path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.inner.save_to(path)
    }

    /// Replace the contents with the snapshot at `path`, dropping expired
    /// entries and resetting hit/miss counters. Failures leave the cache
    /// empty and are only logged. Returns the number of entries kept.
    pub fn load_from(&self, path: &Path) -> usize {
        self.inner.load_from(path)
    }

    /// Stop the expiry sweep and write a final snapshot.
    pub fn close(&self) {
        self.stop_sweeper();
        if let Some(ref path) = self.inner.path {
            if let Err(e) = self.inner.save_to(path) {
                obs::emit_persistence_degraded("cache", path, &e);
            }
        }
    }

    /// Whether the background sweep task is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(false, |s| !s.task.is_finished())
    }

    fn stop_sweeper(&self) {
        let sweeper = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown.send(true);
            sweeper.task.abort();
        }
    }
}

impl<V: CacheValue> Drop for ResultCache<V> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

fn spawn_sweeper<V: CacheValue>(inner: Arc<CacheInner<V>>) -> Option<Sweeper> {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            debug!("no tokio runtime; cache expiry sweep disabled, TTL enforced on read");
            return None;
        }
    };

    let period = inner.config.sweep_interval();
    let (shutdown, mut stopped) = watch::channel(false);
    let task = handle.spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if inner.sweep() > 0 && inner.path.is_some() {
                        let snapshot = Arc::clone(&inner);
                        let saved = tokio::task::spawn_blocking(move || {
                            if let Some(ref path) = snapshot.path {
                                if let Err(e) = snapshot.save_to(path) {
                                    obs::emit_persistence_degraded("cache", path, &e);
                                }
                            }
                        })
                        .await;
                        if let Err(e) = saved {
                            debug!(error = %e, "cache snapshot task did not complete");
                        }
                    }
                }
                _ = stopped.changed() => break,
            }
        }
    });

    debug!(period_ms = period.as_millis() as u64, "cache expiry sweep started");
    Some(Sweeper { shutdown, task })
}
