//! Consistent-hash ring over the peer set.
//!
//! The snapshot is immutable; the pool swaps whole snapshots on peer-set
//! change and in-flight requests complete against the one they captured.
//! The point hash is fnv64 — stable across releases, do not change it
//! without a migration plan.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;

use fnv::FnvHasher;

use gubernator_core::types::{PeerInfo, RateLimitReq};

/// Virtual nodes per peer; enough for reasonable balance in small
/// clusters.
pub const VIRTUAL_NODES: usize = 512;

fn hash64(s: &str) -> u64 {
    let mut h = FnvHasher::default();
    h.write(s.as_bytes());
    h.finish()
}

pub struct PeerSnapshot {
    local: PeerInfo,
    peers: Vec<PeerInfo>,
    ring: BTreeMap<u64, usize>,
}

impl PeerSnapshot {
    pub fn new(local: PeerInfo, peers: Vec<PeerInfo>) -> Self {
        let mut ring = BTreeMap::new();
        for (idx, peer) in peers.iter().enumerate() {
            for vnode in 0..VIRTUAL_NODES {
                ring.insert(hash64(&format!("{}-{vnode}", peer.grpc_address)), idx);
            }
        }
        Self { local, peers, ring }
    }

    pub fn local(&self) -> &PeerInfo {
        &self.local
    }

    pub fn peers(&self) -> &[PeerInfo] {
        &self.peers
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// The peer holding authoritative state for this counter. Walks the
    /// ring clockwise from the key's hash, wrapping at the end. An empty
    /// ring means single-node operation: everything is local.
    pub fn owner_of(&self, name: &str, unique_key: &str) -> &PeerInfo {
        let h = hash64(&format!("{name}_{unique_key}"));
        self.ring
            .range(h..)
            .next()
            .or_else(|| self.ring.iter().next())
            .and_then(|(_, idx)| self.peers.get(*idx))
            .unwrap_or(&self.local)
    }

    pub fn is_local(&self, peer: &PeerInfo) -> bool {
        peer.grpc_address == self.local.grpc_address
    }

    /// Group a batch by owner. Original indices ride along so the final
    /// response array can be reassembled in request order.
    pub fn split_batch(
        &self,
        reqs: impl IntoIterator<Item = (usize, RateLimitReq)>,
    ) -> SplitBatch {
        let mut split = SplitBatch::default();
        for (idx, req) in reqs {
            let owner = self.owner_of(&req.name, &req.unique_key);
            if self.is_local(owner) {
                split.local.push((idx, req));
            } else {
                split
                    .remote
                    .entry(owner.grpc_address.clone())
                    .or_default()
                    .push((idx, req));
            }
        }
        split
    }
}

/// Sub-batches keyed by owning peer address.
#[derive(Default)]
pub struct SplitBatch {
    pub local: Vec<(usize, RateLimitReq)>,
    pub remote: HashMap<String, Vec<(usize, RateLimitReq)>>,
}
