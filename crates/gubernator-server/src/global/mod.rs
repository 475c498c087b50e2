//! GLOBAL behavior: eventually-consistent counters.
//!
//! Non-owners answer from their last broadcast snapshot and queue the hit
//! for async forwarding; owners fold forwarded hits into authoritative
//! state and broadcast dirty keys to every peer at a fixed cadence.
//! Broadcasts are last-writer-wins; over-consumption between broadcasts
//! is bounded by `remaining * peer_count` and is documented behavior.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use gubernator_core::algorithms::{self, CounterState};
use gubernator_core::clock::Clock;
use gubernator_core::error::Result;
use gubernator_core::types::{RateLimitReq, UpdatePeerGlobal, UpdatePeerGlobalsReq};

use crate::config::BehaviorSection;
use crate::obs::ServiceMetrics;
use crate::peers::PeerPool;
use crate::store::CounterCache;

/// Budget for one background RPC (hit forward or broadcast push).
const BACKGROUND_RPC_BUDGET: Duration = Duration::from_secs(2);

pub struct GlobalManager {
    store: Arc<CounterCache>,
    pool: Arc<PeerPool>,
    metrics: Arc<ServiceMetrics>,
    clock: Arc<dyn Clock>,
    hits_tx: mpsc::Sender<RateLimitReq>,
    hits_rx: Mutex<Option<mpsc::Receiver<RateLimitReq>>>,
    /// Keys touched under GLOBAL since the last broadcast, with the
    /// request that shaped them.
    dirty: DashMap<String, RateLimitReq>,
    interval: Duration,
    batch_limit: usize,
}

impl GlobalManager {
    pub fn new(
        store: Arc<CounterCache>,
        pool: Arc<PeerPool>,
        metrics: Arc<ServiceMetrics>,
        clock: Arc<dyn Clock>,
        behaviors: &BehaviorSection,
    ) -> Arc<Self> {
        let (hits_tx, hits_rx) = mpsc::channel(behaviors.global_queue_size);
        Arc::new(Self {
            store,
            pool,
            metrics,
            clock,
            hits_tx,
            hits_rx: Mutex::new(Some(hits_rx)),
            dirty: DashMap::new(),
            interval: Duration::from_millis(behaviors.global_broadcast_interval_ms),
            batch_limit: behaviors.batch_limit,
        })
    }

    /// Spawn the forward and broadcast loops. Call once.
    pub fn start(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let Some(rx) = self.hits_rx.lock().take() {
            tasks.push(tokio::spawn(forward_loop(
                self.clone(),
                rx,
                shutdown.clone(),
            )));
        }
        tasks.push(tokio::spawn(broadcast_loop(self, shutdown)));
        tasks
    }

    /// Queue a non-owner hit for async forwarding to the owner. A full
    /// queue drops the forward; the local answer already went out.
    pub fn queue_hit(&self, req: &RateLimitReq) {
        if self.hits_tx.try_send(req.clone()).is_ok() {
            self.metrics.queue_length.inc(&[("queue", "global_hits")]);
        } else {
            self.metrics
                .check_error_counter
                .inc(&[("error", "global_hits_queue_full")]);
            tracing::warn!(name = %req.name, "global hits queue full; dropping forward");
        }
    }

    /// Mark a key for the next owner broadcast.
    pub fn mark_dirty(&self, req: &RateLimitReq) {
        self.dirty.insert(req.hash_key(), req.clone());
    }

    /// Overwrite local snapshots with an owner broadcast. The broadcast
    /// always wins, whatever the local entry looked like.
    pub fn apply_broadcast(&self, update: UpdatePeerGlobalsReq) -> Result<()> {
        let now = self.clock.now_ms();
        for global in update.globals {
            let key = global.hash_key();
            let mut entry = self.store.entry(&key);
            entry.put(CounterState::from_global(&global, now), now)?;
        }
        Ok(())
    }

    /// Fold one forwarded or rerouted hit into authoritative state.
    fn apply_local(&self, req: &RateLimitReq) {
        let key = req.hash_key();
        let now = self.clock.now_ms();
        let mut entry = self.store.entry(&key);
        let prev = entry.get().cloned();
        match algorithms::apply(prev.as_ref(), req, now) {
            Ok((state, _)) => {
                if let Err(e) = entry.put(state, now) {
                    tracing::warn!(error = %e, "global hit not stored");
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, name = %req.name, "global hit rejected");
            }
        }
    }

    async fn send_hits(&self, pending: &mut Vec<RateLimitReq>) {
        let start = Instant::now();
        let snapshot = self.pool.snapshot();
        let deadline = start + BACKGROUND_RPC_BUDGET;

        let mut sends = Vec::new();
        for req in pending.drain(..) {
            let owner = snapshot.owner_of(&req.name, &req.unique_key);
            if snapshot.is_local(owner) {
                // Ownership moved to us since the hit was queued.
                self.apply_local(&req);
                self.mark_dirty(&req);
                continue;
            }
            let Some(client) = self.pool.client(&owner.grpc_address) else {
                continue;
            };
            sends.push(async move { client.forward(req, deadline).await });
        }
        for result in join_all(sends).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "global hit forward failed");
            }
        }
        self.metrics
            .global_send_duration
            .observe(&[], start.elapsed());
    }

    async fn broadcast_once(&self) {
        let drained: Vec<(String, RateLimitReq)> = self
            .dirty
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        if drained.is_empty() {
            return;
        }
        for (key, _) in &drained {
            self.dirty.remove(key);
        }

        let start = Instant::now();
        let mut globals: Vec<UpdatePeerGlobal> = Vec::with_capacity(drained.len());
        for (key, req) in &drained {
            let mut entry = self.store.entry(key);
            if let Some(state) = entry.get() {
                globals.push(state.to_global(&req.name, &req.unique_key));
            }
        }
        if globals.is_empty() {
            return;
        }

        let snapshot = self.pool.snapshot();
        let update = UpdatePeerGlobalsReq { globals };
        let deadline = start + BACKGROUND_RPC_BUDGET;
        let mut sends = Vec::new();
        for peer in snapshot.peers() {
            if snapshot.is_local(peer) {
                continue;
            }
            let Some(client) = self.pool.client(&peer.grpc_address) else {
                continue;
            };
            let update = update.clone();
            sends.push(async move { client.update_globals(update, deadline).await });
        }
        for result in join_all(sends).await {
            if let Err(e) = result {
                tracing::warn!(error = %e, "broadcast failed");
            }
        }
        self.metrics.broadcast_counter.inc(&[]);
        self.metrics
            .broadcast_duration
            .observe(&[], start.elapsed());
    }
}

async fn forward_loop(
    manager: Arc<GlobalManager>,
    mut rx: mpsc::Receiver<RateLimitReq>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut tick = tokio::time::interval(manager.interval);
    let mut pending: Vec<RateLimitReq> = Vec::new();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Drain what is already queued, then stop.
                while let Ok(req) = rx.try_recv() {
                    manager.metrics.queue_length.dec(&[("queue", "global_hits")]);
                    pending.push(req);
                }
                if !pending.is_empty() {
                    manager.send_hits(&mut pending).await;
                }
                break;
            }
            Some(req) = rx.recv() => {
                manager.metrics.queue_length.dec(&[("queue", "global_hits")]);
                pending.push(req);
                if pending.len() >= manager.batch_limit {
                    manager.send_hits(&mut pending).await;
                }
            }
            _ = tick.tick() => {
                if !pending.is_empty() {
                    manager.send_hits(&mut pending).await;
                }
            }
        }
    }
}

async fn broadcast_loop(manager: Arc<GlobalManager>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(manager.interval);
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Final flush so peers see the last authoritative state.
                manager.broadcast_once().await;
                break;
            }
            _ = tick.tick() => manager.broadcast_once().await,
        }
    }
}
