//! Agent Catalog core library
//!
//! An in-memory index of agent definitions with a persistent TTL + LRU result
//! cache and fuzzy name resolution. [`QueryEngine`] is the entry point; the
//! other components are exported for callers that need them directly.

pub mod cache;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod fuzzy;
pub mod index;
pub mod metrics;
pub mod obs;
pub mod record;
pub mod snapshot;
pub mod source;
pub mod telemetry;

pub use cache::{CacheStats, CacheValue, ResultCache};
pub use cancel::CancellationToken;
pub use config::{CacheConfig, EngineConfig};
pub use engine::{EngineStats, QueryEngine};
pub use error::{CatalogError, Result};
pub use fuzzy::{FuzzyMatcher, MultiFieldOptions, ScoreField, ScoredRecord};
pub use index::{AgentIndex, IndexStats, QueryOptions};
pub use metrics::{MetricsSnapshot, QueryMetrics};
pub use record::{AgentRecord, SearchField};
pub use source::RecordSource;
pub use telemetry::{init_tracing, LogFormat};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
