//! Structured events emitted by the catalog.
//!
//! Every lifecycle event carries an `event` field; these tests check that the
//! engine emits the expected ones on its main paths.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use agent_catalog_core::fakes::StaticSource;
use agent_catalog_core::obs::{
    emit_cache_evicted, emit_cache_swept, emit_index_rebuilt, emit_persistence_degraded,
    emit_query_cache_hit, emit_query_executed, QuerySpan,
};
use agent_catalog_core::{
    AgentRecord, CacheConfig, CancellationToken, EngineConfig, QueryEngine, QueryOptions,
    ResultCache,
};
use tracing_test::traced_test;

fn engine() -> QueryEngine {
    QueryEngine::open(EngineConfig::default(), Arc::new(StaticSource::new())).unwrap()
}

#[traced_test]
#[test]
fn test_emitters_do_not_panic() {
    let _span = QuerySpan::enter("plain", "plain:go");
    emit_query_executed("plain", 3, false, 120);
    emit_query_cache_hit("plain", "plain:go");
    emit_index_rebuilt("records", 3, 1);
    emit_cache_swept(2, 5);
    emit_cache_evicted("plain:old");
    emit_persistence_degraded("cache", Path::new("/tmp/cache.json"), &"disk full");

    assert!(logs_contain("persistence.degraded"));
    assert!(logs_contain("disk full"));
}

#[traced_test]
#[test]
fn test_query_emits_executed_then_cache_hit() {
    let engine = engine();
    engine.rebuild_from_records(vec![AgentRecord::new("go-expert", "go-expert.md")]);
    assert!(logs_contain("index.rebuilt"));

    let none = CancellationToken::new();
    engine.query("go", &QueryOptions::default(), &none).unwrap();
    assert!(logs_contain("query.executed"));
    assert!(!logs_contain("query.cache_hit"));

    engine.query("go", &QueryOptions::default(), &none).unwrap();
    assert!(logs_contain("query.cache_hit"));
}

#[traced_test]
#[test]
fn test_eviction_is_logged() {
    let cache: ResultCache<String> =
        ResultCache::in_memory(CacheConfig::new(1, Duration::from_secs(60)));
    cache.set("first", "1".to_string());
    cache.set("second", "2".to_string());
    assert!(logs_contain("cache.evicted"));
}

#[traced_test]
#[test]
fn test_corrupt_index_snapshot_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("index.json"), "not json").unwrap();

    let engine =
        QueryEngine::open(EngineConfig::in_dir(dir.path()), Arc::new(StaticSource::new()))
            .unwrap();
    assert!(engine.get_all_agents().is_empty());
    assert!(logs_contain("persistence.degraded"));
    assert!(logs_contain("WARN"));
}

#[traced_test]
#[tokio::test]
async fn test_failed_rebuild_emits_no_rebuild_event() {
    let engine = engine();
    assert!(engine.rebuild_index(Path::new("/nowhere")).await.is_err());
    assert!(!logs_contain("index.rebuilt"));
}
