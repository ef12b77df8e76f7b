//! AsyncCache 测试

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::Semaphore;
use twinguard_common::Revision;
use twinguard_errors::AppError;

use crate::{AsyncCache, CacheConfig, Entry};

fn cache(name: &str) -> AsyncCache<String, String> {
    AsyncCache::new(CacheConfig::new(name, Duration::from_secs(60))).unwrap()
}

/// 被 gate 挡住的 loader，统计调用次数
fn gated_loader(
    calls: Arc<AtomicUsize>,
    gate: Arc<Semaphore>,
    value: &str,
) -> impl FnOnce() -> futures::future::BoxFuture<'static, twinguard_errors::AppResult<Entry<String>>>
+ Send
+ 'static {
    let value = value.to_string();
    move || {
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            let _permit = gate
                .acquire()
                .await
                .map_err(|e| AppError::internal(e.to_string()))?;
            Ok(Entry::present(value, Revision(1)))
        })
    }
}

#[tokio::test]
async fn test_concurrent_misses_share_one_load() {
    let cache = cache("single-flight");
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let key = "policy:org.acme:p1".to_string();

    let gets = (0..5).map(|_| {
        let cache = cache.clone();
        let key = key.clone();
        let loader = gated_loader(calls.clone(), gate.clone(), "v1");
        async move { cache.get(&key, loader).await }
    });

    let release = {
        let gate = gate.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.add_permits(1);
        }
    };

    let (results, ()) = tokio::join!(join_all(gets), release);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(result.unwrap(), Entry::present("v1".to_string(), Revision(1)));
    }
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_different_keys_load_independently() {
    let cache = cache("parallel");
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(2));

    let key_a = "a".to_string();
    let key_b = "b".to_string();
    let a = cache.get(&key_a, gated_loader(calls.clone(), gate.clone(), "A"));
    let b = cache.get(&key_b, gated_loader(calls.clone(), gate.clone(), "B"));
    let (a, b) = tokio::join!(a, b);

    assert_eq!(a.unwrap().into_value(), Some("A".to_string()));
    assert_eq!(b.unwrap().into_value(), Some("B".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_hit_does_not_call_loader() {
    let cache = cache("hit");
    let key = "k".to_string();
    cache.put(key.clone(), Entry::present("cached".to_string(), Revision(2)));

    let entry = cache
        .get(&key, || async { Err(AppError::internal("loader must not run")) })
        .await
        .unwrap();
    assert_eq!(entry.revision(), Revision(2));
}

#[tokio::test]
async fn test_not_found_is_cached_as_absent() {
    let cache = cache("negative");
    let calls = Arc::new(AtomicUsize::new(0));
    let key = "missing".to_string();

    for _ in 0..2 {
        let calls = calls.clone();
        let entry = cache
            .get(&key, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::not_found("policy missing"))
            })
            .await
            .unwrap();
        assert_eq!(entry, Entry::absent(Revision::ZERO));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_load_is_not_cached() {
    let cache = cache("failure");
    let key = "k".to_string();

    let err = cache
        .get(&key, || async { Err(AppError::database("connection reset")) })
        .await
        .unwrap_err();
    assert_eq!(err, AppError::database("connection reset"));
    assert!(cache.get_if_present(&key).is_none());

    let entry = cache
        .get(&key, || async {
            Ok(Entry::present("recovered".to_string(), Revision(1)))
        })
        .await
        .unwrap();
    assert!(entry.is_present());
}

#[tokio::test]
async fn test_all_waiters_see_the_same_failure() {
    let cache = cache("shared-failure");
    let gate = Arc::new(Semaphore::new(0));
    let key = "k".to_string();

    let gets = (0..3).map(|_| {
        let cache = cache.clone();
        let key = key.clone();
        let gate = gate.clone();
        async move {
            cache
                .get(&key, move || async move {
                    let _permit = gate.acquire().await;
                    Err::<Entry<String>, _>(AppError::external_service("store unavailable"))
                })
                .await
        }
    });
    let release = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(1);
    };

    let (results, ()) = tokio::join!(join_all(gets), release);
    for result in results {
        assert_eq!(
            result.unwrap_err(),
            AppError::external_service("store unavailable")
        );
    }
}

#[tokio::test]
async fn test_timeout_affects_only_the_timed_out_caller() {
    let cache = cache("timeout");
    let calls = Arc::new(AtomicUsize::new(0));
    let gate = Arc::new(Semaphore::new(0));
    let key = "slow".to_string();

    let impatient = cache.get_with_timeout(
        &key,
        Duration::from_millis(10),
        gated_loader(calls.clone(), gate.clone(), "late"),
    );
    let patient = {
        let cache = cache.clone();
        let key = key.clone();
        let loader = gated_loader(calls.clone(), gate.clone(), "unused");
        async move {
            cache
                .get_with_timeout(&key, Duration::from_secs(5), loader)
                .await
        }
    };
    let release = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        gate.add_permits(1);
    };

    let (impatient, patient, ()) = tokio::join!(impatient, patient, release);

    assert!(matches!(impatient, Err(AppError::LoadTimeout { .. })));
    assert_eq!(patient.unwrap().into_value(), Some("late".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.get_if_present(&key).is_some());
}

#[tokio::test]
async fn test_invalidate_detaches_in_flight_load() {
    let cache = cache("detach");
    let gate = Arc::new(Semaphore::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = "k".to_string();

    let stale = {
        let cache = cache.clone();
        let key = key.clone();
        let loader = gated_loader(calls.clone(), gate.clone(), "stale");
        async move { cache.get(&key, loader).await }
    };
    let invalidate_then_release = {
        let cache = cache.clone();
        let key = key.clone();
        let gate = gate.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cache.invalidate(&key);
            gate.add_permits(1);
        }
    };

    let (stale, ()) = tokio::join!(stale, invalidate_then_release);
    // 调用方在失效之前发起，仍然拿到加载结果
    assert_eq!(stale.unwrap().into_value(), Some("stale".to_string()));

    // 给后台任务写回的机会
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(cache.get_if_present(&key).is_none());

    let fresh = cache
        .get(&key, || async {
            Ok(Entry::present("fresh".to_string(), Revision(2)))
        })
        .await
        .unwrap();
    assert_eq!(fresh.into_value(), Some("fresh".to_string()));
}

#[tokio::test]
async fn test_invalidate_is_idempotent() {
    let cache = cache("idempotent");
    let key = "k".to_string();
    cache.put(key.clone(), Entry::present("v".to_string(), Revision(1)));

    cache.invalidate(&key);
    cache.invalidate(&key);
    cache.invalidate(&"never-seen".to_string());

    assert!(cache.get_if_present(&key).is_none());
    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test]
async fn test_put_with_ticket_is_skipped_after_invalidation() {
    let cache = cache("ticket");
    let key = "k".to_string();

    let ticket = cache.ticket();
    cache.invalidate(&key);
    assert!(!cache.put_if_unchanged(
        ticket,
        key.clone(),
        Entry::present("old".to_string(), Revision(2))
    ));
    assert!(cache.get_if_present(&key).is_none());

    let ticket = cache.ticket();
    assert!(cache.put_if_unchanged(
        ticket,
        key.clone(),
        Entry::present("new".to_string(), Revision(3))
    ));
    assert_eq!(
        cache.get_if_present(&key),
        Some(Entry::present("new".to_string(), Revision(3)))
    );
}

#[tokio::test]
async fn test_put_with_ticket_detaches_in_flight_load() {
    let cache = cache("ticket-detach");
    let gate = Arc::new(Semaphore::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = "k".to_string();

    let ticket = cache.ticket();
    let load = {
        let cache = cache.clone();
        let key = key.clone();
        let loader = gated_loader(calls.clone(), gate.clone(), "loaded");
        async move { cache.get(&key, loader).await }
    };
    let put_then_release = {
        let cache = cache.clone();
        let key = key.clone();
        let gate = gate.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(cache.put_if_unchanged(
                ticket,
                key,
                Entry::present("written".to_string(), Revision(5))
            ));
            gate.add_permits(1);
        }
    };

    let (loaded, ()) = tokio::join!(load, put_then_release);
    assert_eq!(loaded.unwrap().into_value(), Some("loaded".to_string()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(
        cache.get_if_present(&key).and_then(Entry::into_value),
        Some("written".to_string())
    );
}

#[tokio::test]
async fn test_invalidate_all() {
    let cache = cache("clear");
    cache.put("a".to_string(), Entry::present("1".to_string(), Revision(1)));
    cache.put("b".to_string(), Entry::absent(Revision(3)));
    assert_eq!(cache.entry_count(), 2);

    cache.invalidate_all();
    assert!(cache.get_if_present(&"a".to_string()).is_none());
    assert!(cache.get_if_present(&"b".to_string()).is_none());
}

#[tokio::test]
async fn test_entries_expire_after_ttl() {
    let cache: AsyncCache<String, String> =
        AsyncCache::new(CacheConfig::new("ttl", Duration::from_millis(50))).unwrap();
    cache.put("k".to_string(), Entry::present("v".to_string(), Revision(1)));
    assert!(cache.get_if_present(&"k".to_string()).is_some());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(cache.get_if_present(&"k".to_string()).is_none());
}

#[test]
fn test_zero_ttl_is_rejected() {
    let result: Result<AsyncCache<String, String>, _> =
        AsyncCache::new(CacheConfig::new("no-ttl", Duration::ZERO));
    assert!(matches!(result, Err(AppError::Validation(_))));
}

#[test]
fn test_entry_map_keeps_revision() {
    let present = Entry::present(2, Revision(4)).map(|v| v * 10);
    assert_eq!(present, Entry::present(20, Revision(4)));

    let absent: Entry<i32> = Entry::absent(Revision(7));
    assert_eq!(absent.map(|v| v * 10).revision(), Revision(7));
}
