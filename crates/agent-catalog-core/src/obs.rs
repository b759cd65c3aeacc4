//! Structured observability hooks for catalog lifecycle events.
//!
//! This module provides:
//! - Query-scoped tracing spans via the `QuerySpan` RAII guard
//! - Emission functions for queries, index rebuilds, cache maintenance and
//!   degraded persistence
//!
//! Every event carries a stable `event = "..."` field so log pipelines can
//! filter on it regardless of the message text.

use std::fmt::Display;
use std::path::Path;

use tracing::{debug, info, warn};

/// RAII guard that enters a query-scoped span for the duration of a call.
///
/// # Example
///
/// ```ignore
/// let _span = QuerySpan::enter("fuzzy", "fuzzy:go-exp");
/// // tracing calls made here carry mode = "fuzzy" and the cache key.
/// ```
pub struct QuerySpan {
    _span: tracing::span::EnteredSpan,
}

impl QuerySpan {
    pub fn enter(mode: &str, cache_key: &str) -> Self {
        let span = tracing::debug_span!("catalog.query", mode = %mode, cache_key = %cache_key);
        Self {
            _span: span.entered(),
        }
    }
}

/// Emit event: a query was answered, either from cache or by computation.
pub fn emit_query_executed(mode: &str, results: usize, cached: bool, duration_us: u64) {
    debug!(
        event = "query.executed",
        mode = %mode,
        results = results,
        cached = cached,
        duration_us = duration_us,
    );
}

/// Emit event: a query key was found in the result cache.
pub fn emit_query_cache_hit(mode: &str, cache_key: &str) {
    debug!(event = "query.cache_hit", mode = %mode, cache_key = %cache_key);
}

/// Emit event: the index contents were replaced.
pub fn emit_index_rebuilt(trigger: &str, records: usize, duration_ms: u64) {
    info!(
        event = "index.rebuilt",
        trigger = %trigger,
        records = records,
        duration_ms = duration_ms,
    );
}

/// Emit event: the expiry sweep removed entries.
pub fn emit_cache_swept(expired: usize, remaining: usize) {
    debug!(event = "cache.swept", expired = expired, remaining = remaining);
}

/// Emit event: an entry was evicted to make room.
pub fn emit_cache_evicted(key: &str) {
    debug!(event = "cache.evicted", key = %key);
}

/// Emit event: a snapshot could not be loaded or saved (warning level).
///
/// The catalog keeps running on in-memory state; this is the only trace of
/// the failure.
pub fn emit_persistence_degraded(component: &str, path: &Path, error: &dyn Display) {
    warn!(
        event = "persistence.degraded",
        component = %component,
        path = %path.display(),
        error = %error,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_span_create() {
        let _span = QuerySpan::enter("plain", "q:test");
    }
}
