//! Peer set management: hash-ring snapshots and per-peer RPC clients.

pub mod client;
pub mod ring;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::watch;

use gubernator_core::types::{HealthCheckResp, PeerInfo};

pub use client::{PeerClient, PeerClientOptions, PeerState};
pub use ring::{PeerSnapshot, SplitBatch};

/// Owns the current peer snapshot and the outbound clients.
///
/// Snapshot swaps are read-copy-update: readers clone the `Arc` and keep
/// working against the set they captured; `set_peers` publishes a fresh
/// snapshot atomically.
pub struct PeerPool {
    snapshot: RwLock<Arc<PeerSnapshot>>,
    clients: DashMap<String, Arc<PeerClient>>,
    opts: PeerClientOptions,
    shutdown: watch::Receiver<bool>,
}

impl PeerPool {
    pub fn new(local: PeerInfo, opts: PeerClientOptions, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(PeerSnapshot::new(local, Vec::new()))),
            clients: DashMap::new(),
            opts,
            shutdown,
        }
    }

    pub fn snapshot(&self) -> Arc<PeerSnapshot> {
        self.snapshot.read().clone()
    }

    /// Replace the peer set. Clients for surviving peers are reused;
    /// clients for departed peers are dropped and their tasks wind down.
    pub fn set_peers(&self, peers: Vec<PeerInfo>) {
        let local = self.snapshot.read().local().clone();
        let next = Arc::new(PeerSnapshot::new(local, peers));
        for peer in next.peers() {
            if next.is_local(peer) {
                continue;
            }
            self.clients
                .entry(peer.grpc_address.clone())
                .or_insert_with(|| {
                    PeerClient::spawn(peer.clone(), self.opts.clone(), self.shutdown.clone())
                });
        }
        self.clients
            .retain(|addr, _| next.peers().iter().any(|p| &p.grpc_address == addr));
        *self.snapshot.write() = next;
        tracing::info!(peers = self.snapshot.read().peer_count(), "peer set updated");
    }

    pub fn client(&self, grpc_address: &str) -> Option<Arc<PeerClient>> {
        self.clients.get(grpc_address).map(|e| e.value().clone())
    }

    pub fn clients(&self) -> Vec<Arc<PeerClient>> {
        self.clients.iter().map(|e| e.value().clone()).collect()
    }

    /// Health status: unhealthy iff any peer client is UNHEALTHY.
    pub fn health(&self) -> HealthCheckResp {
        let snapshot = self.snapshot();
        let mut errors = Vec::new();
        for entry in self.clients.iter() {
            if entry.value().state() == PeerState::Unhealthy {
                errors.push(format!("{}: {}", entry.key(), entry.value().last_error()));
            }
        }
        HealthCheckResp {
            status: if errors.is_empty() {
                "healthy".into()
            } else {
                "unhealthy".into()
            },
            message: errors.join("; "),
            peer_count: snapshot.peer_count() as i64,
        }
    }
}
