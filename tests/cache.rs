//! Access cache tests.

mod common;

use hostplane::cache::{AccessCache, CacheKey, CacheSettings, ResourceClass};
use hostplane::error::HostplaneError;
use hostplane::time::{ManualClock, Tick};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn cache(clock: &Arc<ManualClock>) -> AccessCache<String> {
    AccessCache::new(
        "test",
        CacheSettings {
            ttl: Duration::from_secs(60),
            max_age: Duration::from_secs(60),
        },
        clock.clone(),
    )
}

fn key(subject: &str) -> CacheKey {
    CacheKey::new(ResourceClass::TenantHierarchy, subject)
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn concurrent_misses_compute_once_per_key() {
    let clock = Arc::new(ManualClock::new(common::START));
    let cache = Arc::new(cache(&clock));
    let computed = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            let computed = computed.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_compute(&key("tenant:3"), || {
                        computed.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(20));
                        Ok::<_, HostplaneError>("scope".to_string())
                    })
                    .unwrap()
            })
        })
        .collect();

    let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(computed.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
}

#[test]
fn unrelated_keys_do_not_wait_for_each_other() {
    let clock = Arc::new(ManualClock::new(common::START));
    let cache = Arc::new(cache(&clock));
    let slow_started = Arc::new(Barrier::new(2));

    let slow = {
        let cache = cache.clone();
        let slow_started = slow_started.clone();
        thread::spawn(move || {
            cache
                .get_or_compute(&key("tenant:1"), || {
                    slow_started.wait();
                    thread::sleep(Duration::from_millis(500));
                    Ok::<_, HostplaneError>("slow".to_string())
                })
                .unwrap()
        })
    };

    slow_started.wait();
    let start = std::time::Instant::now();
    let fast = cache
        .get_or_compute(&key("tenant:2"), || {
            Ok::<_, HostplaneError>("fast".to_string())
        })
        .unwrap();
    assert_eq!(*fast, "fast");
    assert!(start.elapsed() < Duration::from_millis(400));

    assert_eq!(*slow.join().unwrap(), "slow");
}

#[test]
fn invalidation_during_compute_forces_recompute() {
    let clock = Arc::new(ManualClock::new(common::START));
    let cache = Arc::new(cache(&clock));
    let computing = Arc::new(Barrier::new(2));
    let computed = Arc::new(AtomicUsize::new(0));

    let worker = {
        let cache = cache.clone();
        let computing = computing.clone();
        let computed = computed.clone();
        thread::spawn(move || {
            cache
                .get_or_compute(&key("tenant:3"), || {
                    computed.fetch_add(1, Ordering::SeqCst);
                    computing.wait();
                    thread::sleep(Duration::from_millis(50));
                    Ok::<_, HostplaneError>("stale".to_string())
                })
                .unwrap()
        })
    };

    computing.wait();
    cache.invalidate_class(&ResourceClass::TenantHierarchy);
    assert_eq!(*worker.join().unwrap(), "stale");

    let fresh = cache
        .get_or_compute(&key("tenant:3"), || {
            computed.fetch_add(1, Ordering::SeqCst);
            Ok::<_, HostplaneError>("fresh".to_string())
        })
        .unwrap();
    assert_eq!(*fresh, "fresh");
    assert_eq!(computed.load(Ordering::SeqCst), 2);
}

// ============================================================================
// Failure and expiry
// ============================================================================

#[test]
fn failed_compute_is_retried() {
    let clock = Arc::new(ManualClock::new(common::START));
    let cache = cache(&clock);

    let err = cache
        .get_or_compute(&key("tenant:3"), || {
            Err::<String, _>(HostplaneError::metadata("timeout"))
        })
        .unwrap_err();
    assert!(err.is_retriable());
    assert!(cache.peek(&key("tenant:3")).is_none());

    let value = cache
        .get_or_compute(&key("tenant:3"), || {
            Ok::<_, HostplaneError>("ok".to_string())
        })
        .unwrap();
    assert_eq!(*value, "ok");
    assert_eq!(cache.stats().misses, 2);
}

#[test]
fn entries_expire_after_ttl() {
    let clock = Arc::new(ManualClock::new(common::START));
    let cache = cache(&clock);
    cache
        .get_or_compute(&key("a"), || Ok::<_, HostplaneError>("v1".to_string()))
        .unwrap();

    clock.advance(Duration::from_secs(59));
    assert!(cache.peek(&key("a")).is_some());

    clock.advance(Duration::from_secs(1));
    assert!(cache.peek(&key("a")).is_none());
}

#[test]
fn backwards_clock_jump_expires_entries() {
    let clock = Arc::new(ManualClock::new(common::START));
    let cache = cache(&clock);
    cache
        .get_or_compute(&key("a"), || Ok::<_, HostplaneError>("v1".to_string()))
        .unwrap();

    // After jumping back an hour the stored expiry is an hour and a minute
    // away, which no entry written at the current time could have.
    clock.set(common::START.sub_ms(3_600_000));
    assert!(cache.peek(&key("a")).is_none());

    let value = cache
        .get_or_compute(&key("a"), || Ok::<_, HostplaneError>("v2".to_string()))
        .unwrap();
    assert_eq!(*value, "v2");
}

#[test]
fn purge_drops_only_expired_entries() {
    let clock = Arc::new(ManualClock::new(Tick::new(1_000_000)));
    let cache = cache(&clock);
    cache
        .get_or_compute(&key("old"), || Ok::<_, HostplaneError>("old".to_string()))
        .unwrap();
    clock.advance(Duration::from_secs(30));
    cache
        .get_or_compute(&key("new"), || Ok::<_, HostplaneError>("new".to_string()))
        .unwrap();

    clock.advance(Duration::from_secs(40));
    assert_eq!(cache.purge_expired(), 1);
    assert_eq!(cache.len(), 1);
    assert!(cache.peek(&key("new")).is_some());
    assert_eq!(cache.stats().evictions, 1);
}

// ============================================================================
// Invalidation
// ============================================================================

#[test]
fn invalidation_is_per_class() {
    let clock = Arc::new(ManualClock::new(common::START));
    let cache = cache(&clock);
    let hierarchy = CacheKey::new(ResourceClass::TenantHierarchy, "tenant:3");
    let topology = CacheKey::new(ResourceClass::HostTopology, "scoped:ops");
    for k in [&hierarchy, &topology] {
        cache
            .get_or_compute(k, || Ok::<_, HostplaneError>(k.subject.clone()))
            .unwrap();
    }

    assert_eq!(cache.invalidate_class(&ResourceClass::TenantHierarchy), 1);
    assert!(cache.peek(&hierarchy).is_none());
    assert!(cache.peek(&topology).is_some());

    let stats = cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.entries_by_class.get("host-topology"), Some(&1));

    assert_eq!(cache.invalidate_all(), 1);
    assert!(cache.is_empty());
}
