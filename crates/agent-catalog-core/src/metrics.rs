//! Per-engine atomic counters.
//!
//! Counters are incremented silently at the call site. Call
//! [`QueryMetrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the engine shuts down).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Lightweight atomic counters owned by one engine instance.
#[derive(Debug, Default)]
pub struct QueryMetrics {
    queries: AtomicU64,
    fuzzy_queries: AtomicU64,
    field_queries: AtomicU64,
    show_lookups: AtomicU64,
    rebuilds: AtomicU64,
}

/// Point-in-time copy of [`QueryMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub queries: u64,
    pub fuzzy_queries: u64,
    pub field_queries: u64,
    pub show_lookups: u64,
    pub rebuilds: u64,
}

impl QueryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_queries(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "queries", "counter incremented");
    }

    pub fn inc_fuzzy_queries(&self) {
        self.fuzzy_queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "fuzzy_queries", "counter incremented");
    }

    pub fn inc_field_queries(&self) {
        self.field_queries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "field_queries", "counter incremented");
    }

    pub fn inc_show_lookups(&self) {
        self.show_lookups.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "show_lookups", "counter incremented");
    }

    pub fn inc_rebuilds(&self) {
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "rebuilds", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries: self.queries.load(Ordering::Relaxed),
            fuzzy_queries: self.fuzzy_queries.load(Ordering::Relaxed),
            field_queries: self.field_queries.load(Ordering::Relaxed),
            show_lookups: self.show_lookups.load(Ordering::Relaxed),
            rebuilds: self.rebuilds.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            queries = s.queries,
            fuzzy_queries = s.fuzzy_queries,
            field_queries = s.field_queries,
            show_lookups = s.show_lookups,
            rebuilds = s.rebuilds,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = QueryMetrics::new();
        m.inc_queries();
        m.inc_queries();
        m.inc_fuzzy_queries();
        m.inc_rebuilds();

        let s = m.snapshot();
        assert_eq!(s.queries, 2);
        assert_eq!(s.fuzzy_queries, 1);
        assert_eq!(s.field_queries, 0);
        assert_eq!(s.show_lookups, 0);
        assert_eq!(s.rebuilds, 1);
    }

    #[test]
    fn instances_are_independent() {
        let a = QueryMetrics::new();
        let b = QueryMetrics::new();
        a.inc_show_lookups();
        assert_eq!(a.snapshot().show_lookups, 1);
        assert_eq!(b.snapshot().show_lookups, 0);
    }
}
