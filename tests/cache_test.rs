use futures::future::join_all;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use vini_data::reliability::{CacheConfig, CacheHit, ResilientCache};

fn cache(ttl: Duration, max_size: usize) -> ResilientCache<String> {
    ResilientCache::new(CacheConfig { ttl, max_size })
}

#[tokio::test]
async fn test_miss_fetches_then_hits_fresh() {
    let cache = cache(Duration::from_secs(60), 10);
    let calls = AtomicUsize::new(0);

    let first = cache
        .get_or_fetch("producao_2020_2020", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("rows".to_string())
        })
        .await;
    assert_eq!(first, Some(CacheHit::Fetched("rows".to_string())));

    let second = cache
        .get_or_fetch("producao_2020_2020", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>("other".to_string())
        })
        .await;
    assert_eq!(second, Some(CacheHit::Fresh("rows".to_string())));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_fetch_serves_historical_value() {
    let cache = cache(Duration::from_millis(20), 10);
    cache.set("importacao_2019_2019", "last good".to_string());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let hit = cache
        .get_or_fetch("importacao_2019_2019", || async {
            Err::<String, _>("upstream down")
        })
        .await;

    assert_eq!(hit, Some(CacheHit::Historical("last good".to_string())));
    assert!(hit.is_some_and(|h| h.is_stale()));
}

#[tokio::test]
async fn test_failed_fetch_without_history_is_none() {
    let cache = cache(Duration::from_secs(60), 10);
    let hit = cache
        .get_or_fetch("exportacao_2000_2001", || async { Err::<String, _>("timeout") })
        .await;
    assert_eq!(hit, None);
    assert_eq!(cache.historical_len(), 0);
}

#[tokio::test]
async fn test_invalidated_key_refetches_and_refreshes_both_tiers() {
    let cache = cache(Duration::from_secs(60), 10);
    cache.set("k", "old".to_string());
    assert!(cache.invalidate("k"));

    let hit = cache
        .get_or_fetch("k", || async { Ok::<_, String>("new".to_string()) })
        .await;
    assert_eq!(hit, Some(CacheHit::Fetched("new".to_string())));
    assert_eq!(cache.get_historical("k"), Some("new".to_string()));
}

#[tokio::test]
async fn test_concurrent_callers_all_get_values() {
    let cache = Arc::new(cache(Duration::from_secs(60), 16));
    let fetches = Arc::new(AtomicUsize::new(0));

    let tasks = (0..40).map(|i| {
        let cache = Arc::clone(&cache);
        let fetches = Arc::clone(&fetches);
        tokio::spawn(async move {
            let key = format!("key{}", i % 4);
            cache
                .get_or_fetch(&key, || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok::<_, String>(key.clone())
                })
                .await
        })
    });

    let results = join_all(tasks).await;
    for result in results {
        let hit = result.expect("task panicked").expect("value available");
        assert!(hit.into_inner().starts_with("key"));
    }

    // Duplicate fetches for one key are allowed, but each key is fetched at
    // least once and never more often than it was requested.
    let fetched = fetches.load(Ordering::SeqCst);
    assert!((4..=40).contains(&fetched));
    assert_eq!(cache.fresh_len(), 4);
}
