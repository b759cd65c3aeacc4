//! Query engine: the single entry point over index, cache and fuzzy matcher.
//!
//! Plain and fuzzy queries are answered from the result cache when possible
//! and computed against the index otherwise. Every operation that changes the
//! index also clears the cache before returning.
//!
//! The index and the cache each own their lock; the engine never holds both.
//! A generation counter, bumped after each index swap and checked by the
//! cache under its own lock, keeps results computed against a replaced index
//! from being stored after the clear.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::SecondsFormat;
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::{CacheStats, ResultCache};
use crate::cancel::CancellationToken;
use crate::config::EngineConfig;
use crate::error::{CatalogError, Result};
use crate::fuzzy::{FuzzyMatcher, MultiFieldOptions};
use crate::index::{compile_pattern, AgentIndex, IndexStats, QueryOptions};
use crate::metrics::{MetricsSnapshot, QueryMetrics};
use crate::obs::{self, QuerySpan};
use crate::record::{AgentRecord, SearchField};
use crate::source::RecordSource;

/// Suffix tried when a show lookup misses on the bare identifier.
const DEFINITION_SUFFIX: &str = ".md";

/// Separator between cache key components.
const KEY_DELIMITER: char = '|';

/// Which search path produced a cached result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryMode {
    Plain,
    Fuzzy,
}

impl QueryMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Fuzzy => "fuzzy",
        }
    }
}

/// Aggregate view for observability.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub index: IndexStats,
    pub cache: CacheStats,
    /// Record count per source name.
    pub by_source: BTreeMap<String, usize>,
    pub inherited_capabilities: usize,
    pub explicit_capabilities: usize,
    pub fuzzy_threshold: f64,
    pub metrics: MetricsSnapshot,
}

/// Orchestrates queries over an [`AgentIndex`], a [`ResultCache`] and a
/// [`FuzzyMatcher`].
pub struct QueryEngine {
    index: AgentIndex,
    cache: ResultCache<Vec<AgentRecord>>,
    matcher: FuzzyMatcher,
    source: Arc<dyn RecordSource>,
    metrics: QueryMetrics,
    generation: AtomicU64,
    config: EngineConfig,
}

impl QueryEngine {
    /// Build an engine, loading any existing snapshots.
    ///
    /// Missing or corrupt snapshots are tolerated: the index starts empty and
    /// the cache starts empty with reset counters. Call inside a tokio
    /// runtime to get the background cache sweep.
    pub fn open(config: EngineConfig, source: Arc<dyn RecordSource>) -> Result<Self> {
        let matcher = FuzzyMatcher::default();
        matcher.set_threshold(config.fuzzy_threshold)?;

        let index = AgentIndex::new();
        if let Some(ref path) = config.index_path {
            index.load(path);
        }
        let cache = ResultCache::new(config.cache.clone(), config.cache_path.clone());

        info!(
            records = index.len(),
            cached = cache.len(),
            fuzzy_threshold = matcher.threshold(),
            "query engine ready"
        );

        Ok(Self {
            index,
            cache,
            matcher,
            source,
            metrics: QueryMetrics::new(),
            generation: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Substring (or regex) search across name, description and body.
    pub fn query(
        &self,
        text: &str,
        opts: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentRecord>> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        if opts.regex && !text.is_empty() {
            compile_pattern(text)?;
        }
        self.metrics.inc_queries();

        self.cached_or_compute(QueryMode::Plain, text, opts, || {
            self.index.search(text, opts)
        })
    }

    /// Ranked approximate search over name, description, file identifier and
    /// body. Option filters are applied to the ranked list afterwards.
    pub fn query_with_fuzzy(
        &self,
        text: &str,
        opts: &QueryOptions,
        cancel: &CancellationToken,
    ) -> Result<Vec<AgentRecord>> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }
        self.metrics.inc_fuzzy_queries();

        self.cached_or_compute(QueryMode::Fuzzy, text, opts, || {
            let records = self.index.get_all();
            let ranked =
                self.matcher
                    .multi_field_search(text, &records, &MultiFieldOptions::default());

            let mut results = Vec::new();
            for scored in ranked {
                if opts.is_full(results.len()) {
                    break;
                }
                if opts.accepts(&scored.record) {
                    results.push(scored.record);
                }
            }
            Ok(results)
        })
    }

    /// Substring search on a single named field. Not cached.
    pub fn query_by_field(&self, field: &str, value: &str) -> Result<Vec<AgentRecord>> {
        let field: SearchField = field.parse()?;
        self.metrics.inc_field_queries();
        let results = self.index.search_by_field(field, value);
        debug!(field = %field, value = %value, matched = results.len(), "field query");
        Ok(results)
    }

    /// Resolve one agent: exact file identifier, then with the definition
    /// suffix appended, then the closest fuzzy match.
    pub fn show_agent(&self, identifier: &str) -> Result<AgentRecord> {
        self.metrics.inc_show_lookups();

        if let Some(record) = self.index.get_by_file_identifier(identifier) {
            return Ok(record);
        }
        if !identifier.ends_with(DEFINITION_SUFFIX) {
            let with_suffix = format!("{identifier}{DEFINITION_SUFFIX}");
            if let Some(record) = self.index.get_by_file_identifier(&with_suffix) {
                return Ok(record);
            }
        }

        let records = self.index.get_all();
        match self.matcher.find_best(identifier, &records) {
            Some(best) => {
                debug!(
                    identifier = %identifier,
                    resolved = %best.record.file_identifier,
                    score = best.score,
                    "show resolved by fuzzy match"
                );
                Ok(best.record)
            }
            None => Err(CatalogError::AgentNotFound {
                identifier: identifier.to_string(),
            }),
        }
    }

    /// Re-parse `dir` and replace the whole index with its records.
    ///
    /// Source errors propagate unchanged and leave index and cache untouched.
    pub async fn rebuild_index(&self, dir: &Path) -> Result<usize> {
        let started = Instant::now();
        let records = self
            .source
            .load_directory(dir)
            .await
            .map_err(CatalogError::Source)?;
        let count = self.index.rebuild_from_dir(dir, records);
        self.after_index_change("rebuild", count, started);
        Ok(count)
    }

    /// Re-parse `dir` and replace only the records that came from it.
    pub async fn update_index(&self, dir: &Path) -> Result<usize> {
        let started = Instant::now();
        let records = self
            .source
            .load_directory(dir)
            .await
            .map_err(CatalogError::Source)?;
        let count = self.index.replace_under(dir, records);
        self.after_index_change("update", count, started);
        Ok(count)
    }

    /// Replace the index with an externally supplied record set.
    pub fn rebuild_from_records(&self, records: Vec<AgentRecord>) -> usize {
        let started = Instant::now();
        let count = self.index.rebuild(records);
        self.after_index_change("records", count, started);
        count
    }

    pub fn get_all_agents(&self) -> Vec<AgentRecord> {
        self.index.get_all()
    }

    pub fn get_stats(&self) -> EngineStats {
        let records = self.index.get_all();
        let mut by_source = BTreeMap::new();
        let mut inherited = 0;
        for record in &records {
            *by_source.entry(record.source_name.clone()).or_insert(0) += 1;
            if record.capabilities_inherited {
                inherited += 1;
            }
        }

        EngineStats {
            index: self.index.stats(),
            cache: self.cache.stats(),
            by_source,
            inherited_capabilities: inherited,
            explicit_capabilities: records.len() - inherited,
            fuzzy_threshold: self.matcher.threshold(),
            metrics: self.metrics.snapshot(),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Change the fuzzy threshold for subsequent lookups. Cached fuzzy
    /// results are keyed by threshold, so earlier entries are not reused.
    pub fn set_fuzzy_threshold(&self, threshold: f64) -> Result<()> {
        self.matcher.set_threshold(threshold)?;
        debug!(threshold, "fuzzy threshold updated");
        Ok(())
    }

    /// Stop background work and write the final cache snapshot.
    pub fn close(&self) {
        self.cache.close();
        self.metrics.flush();
    }

    fn cached_or_compute(
        &self,
        mode: QueryMode,
        text: &str,
        opts: &QueryOptions,
        compute: impl FnOnce() -> Result<Vec<AgentRecord>>,
    ) -> Result<Vec<AgentRecord>> {
        let key = self.cache_key(mode, text, opts);
        let _span = QuerySpan::enter(mode.as_str(), &key);
        let started = Instant::now();

        if let Some(hit) = self.cache.get(&key) {
            obs::emit_query_cache_hit(mode.as_str(), &key);
            obs::emit_query_executed(mode.as_str(), hit.len(), true, elapsed_us(started));
            return Ok(hit);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let results = compute()?;
        self.cache.set_if(key, results.clone(), || {
            self.generation.load(Ordering::Acquire) == generation
        });

        obs::emit_query_executed(mode.as_str(), results.len(), false, elapsed_us(started));
        Ok(results)
    }

    fn after_index_change(&self, trigger: &str, count: usize, started: Instant) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.cache.clear();
        self.metrics.inc_rebuilds();

        if let Some(ref path) = self.config.index_path {
            if let Err(e) = self.index.save(path) {
                obs::emit_persistence_degraded("index", path, &e);
            }
        }
        obs::emit_index_rebuilt(trigger, count, started.elapsed().as_millis() as u64);
    }

    /// Deterministic key from the query text and every non-default option.
    fn cache_key(&self, mode: QueryMode, text: &str, opts: &QueryOptions) -> String {
        let mut parts = vec![format!("{}:{}", mode.as_str(), escape_key_part(text))];
        if opts.limit > 0 {
            parts.push(format!("limit={}", opts.limit));
        }
        if opts.inherited_only {
            parts.push("no-tools".to_string());
        }
        if opts.explicit_only {
            parts.push("explicit-tools".to_string());
        }
        if opts.regex {
            parts.push("regex".to_string());
        }
        if let Some(ref source) = opts.source {
            parts.push(format!("source={}", escape_key_part(source)));
        }
        if let Some(after) = opts.installed_after {
            parts.push(format!(
                "after={}",
                after.to_rfc3339_opts(SecondsFormat::Nanos, true)
            ));
        }
        if mode == QueryMode::Fuzzy {
            parts.push(format!("threshold={}", self.matcher.threshold()));
        }
        parts.join(&KEY_DELIMITER.to_string())
    }
}

fn escape_key_part(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '\\' || c == KEY_DELIMITER {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn elapsed_us(started: Instant) -> u64 {
    started.elapsed().as_micros() as u64
}
