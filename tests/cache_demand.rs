mod common;

use flowstate::cache::{CacheChange, CacheKey, DemandCache, DemandOptions, DemandOutcome};
use flowstate::config::CacheConfig;
use flowstate::storage::{KeyValueStore, MemoryStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn counted(
    cache: &DemandCache,
    key: &CacheKey<u64>,
    options: DemandOptions,
    calls: &Arc<AtomicUsize>,
    value: u64,
) -> impl std::future::Future<Output = Result<DemandOutcome, flowstate::cache::CacheError>> {
    let cache = cache.clone();
    let key = key.clone();
    let calls = Arc::clone(calls);
    async move {
        cache
            .demand(&key, options, |ctx| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                ctx.set(value);
                Ok(())
            })
            .await
    }
}

/// Test that concurrent demands for one entry run a single producer.
#[tokio::test(start_paused = true)]
async fn test_concurrent_demands_run_one_producer() {
    let cache = DemandCache::new(CacheConfig::default());
    let key = CacheKey::<Vec<String>>::new("payment_flow", "transactions");
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..10)
        .map(|_| {
            let cache = cache.clone();
            let key = key.clone();
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .demand(&key, DemandOptions::new(), |ctx| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        ctx.set(vec!["t1".to_string()]);
                        Ok(())
                    })
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.unwrap().unwrap());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcomes.iter().filter(|o| **o == DemandOutcome::Produced).count(),
        1
    );
    assert_eq!(
        outcomes.iter().filter(|o| **o == DemandOutcome::InFlight).count(),
        9
    );
    assert_eq!(cache.read(&key), Some(vec!["t1".to_string()]));
}

/// Test that clearing a scope leaves other scopes untouched.
#[tokio::test]
async fn test_clear_scope_isolated() {
    let cache = DemandCache::new(CacheConfig::default());
    let fees = CacheKey::<u64>::new("payment_flow", "fees");
    let limits = CacheKey::<u64>::new("payment_flow", "limits");
    let quizzes = CacheKey::<u64>::new("secondary_flow", "quizzes");
    cache.write(&fees, 1);
    cache.write(&limits, 2);
    cache.write(&quizzes, 3);
    let mut changes = cache.changes();

    assert_eq!(cache.clear_scope("payment_flow"), 2);

    assert_eq!(cache.read(&fees), None);
    assert_eq!(cache.read(&limits), None);
    assert_eq!(cache.read(&quizzes), Some(3));
    assert_eq!(
        changes.recv().await.unwrap(),
        CacheChange::ScopeCleared {
            scope: "payment_flow".to_string(),
            removed: 2
        }
    );
}

/// Test lazy TTL expiry: fresh at half the TTL, stale at twice the TTL.
#[tokio::test(start_paused = true)]
async fn test_ttl_staleness() {
    let cache = DemandCache::new(CacheConfig::default());
    let key = CacheKey::<u64>::new("mission_flow", "daily");
    let calls = Arc::new(AtomicUsize::new(0));
    let options = || DemandOptions::new().ttl(Duration::from_secs(1));

    assert_eq!(
        counted(&cache, &key, options(), &calls, 1).await.unwrap(),
        DemandOutcome::Produced
    );

    tokio::time::advance(Duration::from_millis(500)).await;
    assert_eq!(
        counted(&cache, &key, options(), &calls, 2).await.unwrap(),
        DemandOutcome::Fresh
    );
    assert_eq!(cache.read(&key), Some(1));

    tokio::time::advance(Duration::from_millis(1500)).await;
    assert_eq!(
        counted(&cache, &key, options(), &calls, 3).await.unwrap(),
        DemandOutcome::Produced
    );
    assert_eq!(cache.read(&key), Some(3));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Test that a configured default TTL applies when a demand sets none.
#[tokio::test(start_paused = true)]
async fn test_default_ttl_from_config() {
    let cache = DemandCache::new(CacheConfig {
        default_ttl_seconds: Some(10),
        ..CacheConfig::default()
    });
    let key = CacheKey::<u64>::new("achievements_flow", "badges");
    let calls = Arc::new(AtomicUsize::new(0));

    counted(&cache, &key, DemandOptions::new(), &calls, 1).await.unwrap();
    tokio::time::advance(Duration::from_secs(11)).await;
    counted(&cache, &key, DemandOptions::new(), &calls, 2).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

/// Test that changed deps force a re-fetch before the TTL elapses.
#[tokio::test(start_paused = true)]
async fn test_deps_change_invalidates() {
    let cache = DemandCache::new(CacheConfig::default());
    let key = CacheKey::<u64>::new("secondary_flow", "copy");
    let calls = Arc::new(AtomicUsize::new(0));
    let with_locale = |locale: &str| {
        DemandOptions::new()
            .ttl(Duration::from_secs(60))
            .deps(&[locale])
    };

    counted(&cache, &key, with_locale("en"), &calls, 1).await.unwrap();
    assert_eq!(
        counted(&cache, &key, with_locale("en"), &calls, 2).await.unwrap(),
        DemandOutcome::Fresh
    );
    assert_eq!(
        counted(&cache, &key, with_locale("fr"), &calls, 3).await.unwrap(),
        DemandOutcome::Produced
    );
    assert_eq!(cache.read(&key), Some(3));
}

/// Test that a producer may short-circuit on a value it already sees.
#[tokio::test]
async fn test_producer_sees_current_value() {
    let cache = DemandCache::new(CacheConfig::default());
    let key = CacheKey::<u64>::new("payment_flow", "balance");
    cache.write(&key, 40);

    cache
        .demand(&key, DemandOptions::new().deps(&[1]), |ctx| async move {
            if let Some(current) = ctx.get() {
                ctx.set(current + 2);
            }
            Ok(())
        })
        .await
        .unwrap();

    assert_eq!(cache.read(&key), Some(42));
}

/// Test that demand waits for hydration and then honours the persisted value.
#[tokio::test]
async fn test_demand_waits_for_hydration() {
    let storage = Arc::new(MemoryStore::new());
    let key = CacheKey::<Vec<u64>>::new("payment_flow", "transactions");
    {
        let cache = DemandCache::with_storage(CacheConfig::default(), storage.clone());
        cache.hydrate();
        cache
            .demand(&key, DemandOptions::new().persist(), |ctx| async move {
                ctx.set(vec![7, 8]);
                Ok(())
            })
            .await
            .unwrap();
    }

    let cache = DemandCache::with_storage(CacheConfig::default(), storage.clone());
    assert!(!cache.meta().is_hydrated);

    let pending = {
        let cache = cache.clone();
        let key = key.clone();
        tokio::spawn(async move {
            cache
                .demand(&key, DemandOptions::new(), |ctx| async move {
                    ctx.set(Vec::new());
                    Ok(())
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    assert!(!pending.is_finished());

    assert_eq!(cache.hydrate(), 1);
    assert_eq!(pending.await.unwrap().unwrap(), DemandOutcome::Fresh);
    assert_eq!(cache.read(&key), Some(vec![7, 8]));
}

/// Test that clearing a scope also removes its persisted copies.
#[tokio::test]
async fn test_clear_scope_removes_persisted() {
    let storage = Arc::new(MemoryStore::new());
    let cache = DemandCache::with_storage(CacheConfig::default(), storage.clone());
    cache.hydrate();
    let key = CacheKey::<u64>::new("payment_flow", "limits");

    cache
        .demand(&key, DemandOptions::new().persist(), |ctx| async move {
            ctx.set(5);
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(storage.keys("cache/payment_flow/").unwrap().len(), 1);

    cache.clear_scope("payment_flow");
    assert!(storage.keys("cache/").unwrap().is_empty());
}

/// Test that polling re-demands until disposed.
#[tokio::test(start_paused = true)]
async fn test_poll_until_disposed() {
    let cache = DemandCache::new(CacheConfig::default());
    let key = CacheKey::<u64>::new("mission_flow", "progress");
    let calls = Arc::new(AtomicUsize::new(0));

    let handle = {
        let calls = Arc::clone(&calls);
        cache.poll(
            key.clone(),
            Duration::from_secs(5),
            DemandOptions::new().ttl(Duration::from_secs(1)),
            move |ctx| {
                let calls = Arc::clone(&calls);
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst) as u64;
                    ctx.set(n);
                    Ok(())
                }
            },
        )
    };

    tokio::time::sleep(Duration::from_millis(10_500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    handle.dispose();
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(cache.read(&key), Some(2));
}
