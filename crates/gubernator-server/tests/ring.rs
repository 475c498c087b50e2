//! Consistent-hash ring and batch splitting.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::collections::{HashMap, HashSet};

use gubernator_core::types::{PeerInfo, RateLimitReq};
use gubernator_server::peers::PeerSnapshot;

fn peer(port: u16) -> PeerInfo {
    PeerInfo {
        grpc_address: format!("10.0.0.{}:1051", port % 250),
        http_address: format!("10.0.0.{}:1050", port % 250),
        data_center: String::new(),
    }
}

fn snapshot(n: u16) -> PeerSnapshot {
    let peers: Vec<PeerInfo> = (1..=n).map(peer).collect();
    PeerSnapshot::new(peers[0].clone(), peers)
}

fn req(key: &str) -> RateLimitReq {
    RateLimitReq {
        name: "ring_test".into(),
        unique_key: key.into(),
        hits: 1,
        limit: 10,
        duration: 60_000,
        ..RateLimitReq::default()
    }
}

#[test]
fn ownership_is_deterministic_across_rebuilds() {
    let a = snapshot(5);
    let b = snapshot(5);
    for i in 0..200 {
        let key = format!("key-{i}");
        assert_eq!(
            a.owner_of("ring_test", &key).grpc_address,
            b.owner_of("ring_test", &key).grpc_address,
            "key={key}"
        );
    }
}

#[test]
fn keys_spread_over_all_peers() {
    let snap = snapshot(3);
    let mut seen: HashMap<String, usize> = HashMap::new();
    for i in 0..1000 {
        let owner = snap.owner_of("ring_test", &format!("key-{i}"));
        *seen.entry(owner.grpc_address.clone()).or_default() += 1;
    }
    assert_eq!(seen.len(), 3);
    for (addr, count) in &seen {
        assert!(*count > 100, "peer {addr} owns only {count} of 1000 keys");
    }
}

#[test]
fn empty_ring_owns_everything_locally() {
    let local = peer(1);
    let snap = PeerSnapshot::new(local.clone(), Vec::new());
    let owner = snap.owner_of("ring_test", "any");
    assert_eq!(owner.grpc_address, local.grpc_address);
    assert!(snap.is_local(owner));
}

#[test]
fn split_batch_preserves_every_index() {
    let snap = snapshot(4);
    for size in [1usize, 2, 5, 10, 100, 1000] {
        let batch: Vec<(usize, RateLimitReq)> = (0..size)
            .map(|i| (i, req(&format!("key-{i}"))))
            .collect();
        let split = snap.split_batch(batch);

        let mut indices: HashSet<usize> = HashSet::new();
        for (i, _) in &split.local {
            assert!(indices.insert(*i), "duplicate index {i}");
        }
        for items in split.remote.values() {
            for (i, _) in items {
                assert!(indices.insert(*i), "duplicate index {i}");
            }
        }
        assert_eq!(indices.len(), size, "size={size}");
        assert!(indices.iter().all(|i| *i < size));
    }
}

#[test]
fn split_batch_groups_by_owner() {
    let snap = snapshot(3);
    let batch: Vec<(usize, RateLimitReq)> =
        (0..50).map(|i| (i, req(&format!("key-{i}")))).collect();
    let split = snap.split_batch(batch);

    for (addr, items) in &split.remote {
        for (_, r) in items {
            assert_eq!(
                &snap.owner_of(&r.name, &r.unique_key).grpc_address,
                addr
            );
        }
    }
    for (_, r) in &split.local {
        assert!(snap.is_local(snap.owner_of(&r.name, &r.unique_key)));
    }
}
