//! TTL and LRU behaviour of the result cache.

use std::thread::sleep;
use std::time::Duration;

use agent_catalog_core::{CacheConfig, ResultCache};

fn cache(max_size: usize, ttl: Duration) -> ResultCache<String> {
    ResultCache::in_memory(CacheConfig::new(max_size, ttl))
}

#[test]
fn test_entry_expires_on_read() {
    let cache = cache(10, Duration::from_millis(80));
    cache.set("k", "v".to_string());

    assert_eq!(cache.get("k").as_deref(), Some("v"));
    sleep(Duration::from_millis(120));
    assert_eq!(cache.get("k"), None);
    assert!(cache.is_empty());

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[test]
fn test_entry_expires_by_sweep() {
    let cache = cache(10, Duration::from_millis(80));
    cache.set("stale", "v".to_string());
    sleep(Duration::from_millis(120));
    cache.set("fresh", "v".to_string());

    assert_eq!(cache.sweep_expired(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(cache.get("stale"), None);
    assert!(cache.get("fresh").is_some());
}

#[test]
fn test_refreshed_entry_outlives_newer_unread_entry() {
    let cache = cache(3, Duration::from_secs(3600));
    cache.set("a", "1".to_string());
    cache.set("b", "2".to_string());
    cache.set("c", "3".to_string());

    // "a" is the oldest by creation but the most recently read.
    assert!(cache.get("a").is_some());
    cache.set("d", "4".to_string());

    assert_eq!(cache.len(), 3);
    assert!(cache.get("b").is_none());
    assert!(cache.get("a").is_some());
    assert!(cache.get("c").is_some());
    assert!(cache.get("d").is_some());
}

#[test]
fn test_hit_rate() {
    let cache = cache(10, Duration::from_secs(60));
    cache.set("k", "v".to_string());
    cache.get("k");
    cache.get("k");
    cache.get("k");
    cache.get("missing");

    let stats = cache.stats();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.75).abs() < 1e-9);
    assert_eq!(stats.max_size, 10);
    assert_eq!(stats.ttl_secs, 60);
}

#[tokio::test]
async fn test_background_sweep_persists_after_expiry() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.json");
    let config = CacheConfig::new(10, Duration::from_millis(40))
        .with_sweep_interval(Duration::from_millis(25));

    let cache: ResultCache<String> = ResultCache::new(config, Some(path.clone()));
    assert!(cache.is_sweeping());
    cache.set("k", "v".to_string());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(cache.is_empty());

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["entries"].as_object().map(|m| m.len()), Some(0));

    cache.close();
    assert!(!cache.is_sweeping());
}
