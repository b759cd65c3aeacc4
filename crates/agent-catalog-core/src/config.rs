//! Engine and cache configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fuzzy::DEFAULT_THRESHOLD;

/// Lower bound for the derived sweep interval.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Result cache sizing and expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub max_size: usize,
    /// Age after which an entry is considered expired.
    #[serde(with = "duration_secs")]
    pub ttl: Duration,
    /// Explicit sweep period. When unset it is derived from `ttl`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            ttl: Duration::from_secs(60 * 60),
            sweep_interval: None,
        }
    }
}

impl CacheConfig {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            max_size,
            ttl,
            sweep_interval: None,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Period of the background expiry sweep: a quarter of the TTL, never
    /// less than one minute, unless overridden. A zero override is ignored.
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| (self.ttl / 4).max(MIN_SWEEP_INTERVAL))
    }
}

/// Configuration for a [`crate::engine::QueryEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Index snapshot location; `None` keeps the index in memory only.
    pub index_path: Option<PathBuf>,
    /// Cache snapshot location; `None` keeps the cache in memory only.
    pub cache_path: Option<PathBuf>,
    pub cache: CacheConfig,
    pub fuzzy_threshold: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_path: None,
            cache_path: None,
            cache: CacheConfig::default(),
            fuzzy_threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl EngineConfig {
    /// Persist both snapshots under `dir` (`index.json`, `cache.json`).
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            index_path: Some(dir.join("index.json")),
            cache_path: Some(dir.join("cache.json")),
            ..Self::default()
        }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_fuzzy_threshold(mut self, threshold: f64) -> Self {
        self.fuzzy_threshold = threshold;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
