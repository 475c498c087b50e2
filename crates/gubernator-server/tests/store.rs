//! Counter cache: bounds, eviction rules, sweeping.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use gubernator_core::algorithms::{CounterState, TokenBucketState};
use gubernator_core::error::GubernatorError;
use gubernator_server::store::CounterCache;

fn token_state(remaining: i64, reset_time: i64) -> CounterState {
    CounterState::TokenBucket(TokenBucketState {
        limit: 10,
        duration: 60_000,
        remaining,
        reset_time,
        created_at: 0,
    })
}

#[test]
fn get_put_remove_roundtrip() {
    let cache = CounterCache::new(100);
    let key = "ns_key-1";

    {
        let mut entry = cache.entry(key);
        assert!(entry.get().is_none());
        entry.put(token_state(5, 10_000), 1_000).unwrap();
    }
    {
        let mut entry = cache.entry(key);
        match entry.get() {
            Some(CounterState::TokenBucket(t)) => assert_eq!(t.remaining, 5),
            other => panic!("unexpected state: {other:?}"),
        }
    }

    cache.remove(key);
    let mut entry = cache.entry(key);
    assert!(entry.get().is_none());
}

#[test]
fn live_entries_are_never_evicted() {
    // 32 shards at capacity one each: 40 live keys must overflow at
    // least one shard, and that overflow is an error, not an eviction.
    let cache = CounterCache::new(32);
    let mut failures = 0;
    for i in 0..40 {
        let key = format!("ns_live-{i}");
        let mut entry = cache.entry(&key);
        // reset far in the future: nothing here is evictable
        match entry.put(token_state(10, i64::MAX), 1_000) {
            Ok(()) => {}
            Err(GubernatorError::CacheFull) => failures += 1,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    assert!(failures > 0, "expected at least one full shard");
    assert_eq!(cache.len() + failures, 40);
}

#[test]
fn expired_entries_make_room() {
    let cache = CounterCache::new(32);
    for i in 0..40 {
        let key = format!("ns_expired-{i}");
        let mut entry = cache.entry(&key);
        // reset already in the past: earlier entries may be dropped
        entry.put(token_state(10, 500), 1_000).unwrap();
    }
    assert!(cache.len() <= 32);
}

#[test]
fn overwriting_a_key_never_needs_room() {
    let cache = CounterCache::new(32);
    let key = "ns_rewrite";
    for round in 0..100 {
        let mut entry = cache.entry(key);
        entry.put(token_state(round, i64::MAX), 1_000).unwrap();
    }
    let mut entry = cache.entry(key);
    match entry.get() {
        Some(CounterState::TokenBucket(t)) => assert_eq!(t.remaining, 99),
        other => panic!("unexpected state: {other:?}"),
    }
}

#[test]
fn sweep_removes_only_expired() {
    let cache = CounterCache::new(100);
    {
        let mut entry = cache.entry("ns_old");
        entry.put(token_state(1, 500), 0).unwrap();
    }
    {
        let mut entry = cache.entry("ns_new");
        entry.put(token_state(1, 10_000), 0).unwrap();
    }

    let removed = cache.sweep_expired(1_000);
    assert_eq!(removed, 1);
    assert!(cache.entry("ns_old").get().is_none());
    assert!(cache.entry("ns_new").get().is_some());
}

#[test]
fn each_snapshots_all_entries() {
    let cache = CounterCache::new(100);
    for i in 0..10 {
        let key = format!("ns_iter-{i}");
        cache.entry(&key).put(token_state(i, 10_000), 0).unwrap();
    }
    let all = cache.each();
    assert_eq!(all.len(), 10);
    assert!(all.iter().all(|(k, _)| k.starts_with("ns_iter-")));
}
