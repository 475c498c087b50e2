//! Rate-limit orchestration: validation, routing, local evaluation and
//! remote fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::join_all;
use tokio::time::Instant;

use gubernator_core::algorithms;
use gubernator_core::clock::Clock;
use gubernator_core::error::{GubernatorError, Result};
use gubernator_core::protocol::frame::Op;
use gubernator_core::types::{
    behavior, GetRateLimitsReq, GetRateLimitsResp, HealthCheckResp, RateLimitReq, RateLimitResp,
    Status, UpdatePeerGlobalsReq,
};

use crate::global::GlobalManager;
use crate::obs::ServiceMetrics;
use crate::peers::PeerPool;
use crate::store::CounterCache;
use crate::transport::RpcHandler;

/// Budget applied to calls arriving without an explicit deadline.
pub const DEFAULT_RPC_DEADLINE: Duration = Duration::from_secs(30);
/// Every forwarded RPC keeps at least this much of the caller's budget.
pub const MIN_FORWARD_BUDGET: Duration = Duration::from_millis(50);

pub struct RateLimitService {
    store: Arc<CounterCache>,
    pool: Arc<PeerPool>,
    global: Arc<GlobalManager>,
    metrics: Arc<ServiceMetrics>,
    clock: Arc<dyn Clock>,
}

impl RateLimitService {
    pub fn new(
        store: Arc<CounterCache>,
        pool: Arc<PeerPool>,
        global: Arc<GlobalManager>,
        metrics: Arc<ServiceMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            pool,
            global,
            metrics,
            clock,
        })
    }

    pub fn metrics(&self) -> &Arc<ServiceMetrics> {
        &self.metrics
    }

    pub fn store(&self) -> &Arc<CounterCache> {
        &self.store
    }

    pub fn pool(&self) -> &Arc<PeerPool> {
        &self.pool
    }

    /// Main entry: split the batch by owner, evaluate the local subset,
    /// fan the rest out, and join everything back in request order.
    pub async fn get_rate_limits(
        &self,
        reqs: Vec<RateLimitReq>,
        deadline: Instant,
    ) -> Result<Vec<RateLimitResp>> {
        let snapshot = self.pool.snapshot();
        let mut out: Vec<Option<RateLimitResp>> = Vec::new();
        out.resize(reqs.len(), None);

        let mut routed: Vec<(usize, RateLimitReq)> = Vec::new();
        for (idx, req) in reqs.into_iter().enumerate() {
            self.metrics.getratelimit_counter.inc(&[("entry", "api")]);
            if let Err(e) = req.validate() {
                self.metrics
                    .check_error_counter
                    .inc(&[("error", "validation")]);
                out[idx] = Some(validation_response(&req, &e));
                continue;
            }
            if req.has_behavior(behavior::GLOBAL) {
                // Serve from the local snapshot immediately; ownership only
                // decides whether the hit is folded here or forwarded.
                let resp = self.check_local(&req)?;
                let owner = snapshot.owner_of(&req.name, &req.unique_key);
                if snapshot.is_local(owner) {
                    self.global.mark_dirty(&req);
                } else {
                    self.global.queue_hit(&req);
                }
                out[idx] = Some(resp);
                continue;
            }
            routed.push((idx, req));
        }

        let split = snapshot.split_batch(routed);
        for (idx, req) in split.local {
            out[idx] = Some(self.check_local(&req)?);
        }

        // Remote fan-out: one future per sub-request; the peer client
        // coalesces them into per-peer RPCs inside its batching window.
        let forward_deadline = deadline.max(Instant::now() + MIN_FORWARD_BUDGET);
        let mut forwards = Vec::new();
        for (addr, items) in split.remote {
            match self.pool.client(&addr) {
                Some(client) => {
                    for (idx, req) in items {
                        let client = client.clone();
                        let keep = req.clone();
                        forwards.push(async move {
                            let result = client.forward(req, forward_deadline).await;
                            (idx, keep, result)
                        });
                    }
                }
                None => {
                    for (idx, req) in items {
                        out[idx] = Some(transport_response(
                            &req,
                            &format!("no peer client for {addr}"),
                        ));
                    }
                }
            }
        }
        for (idx, req, result) in join_all(forwards).await {
            out[idx] = Some(match result {
                Ok(resp) => resp,
                Err(e) => {
                    self.metrics
                        .check_error_counter
                        .inc(&[("error", "forward")]);
                    transport_response(&req, &e.to_string())
                }
            });
        }

        let mut responses = Vec::with_capacity(out.len());
        for slot in out {
            responses
                .push(slot.ok_or_else(|| GubernatorError::Internal("missing response slot".into()))?);
        }
        Ok(responses)
    }

    /// Peer-to-peer entry: evaluate here, never re-route. Forwarded
    /// GLOBAL hits land on their owner through this path.
    pub fn get_peer_rate_limits(&self, reqs: Vec<RateLimitReq>) -> Result<Vec<RateLimitResp>> {
        let mut responses = Vec::with_capacity(reqs.len());
        for req in reqs {
            self.metrics.getratelimit_counter.inc(&[("entry", "peer")]);
            if let Err(e) = req.validate() {
                responses.push(validation_response(&req, &e));
                continue;
            }
            let resp = self.check_local(&req)?;
            if req.has_behavior(behavior::GLOBAL) {
                self.global.mark_dirty(&req);
            }
            responses.push(resp);
        }
        Ok(responses)
    }

    pub fn update_peer_globals(&self, update: UpdatePeerGlobalsReq) -> Result<()> {
        self.global.apply_broadcast(update)
    }

    pub fn health_check(&self) -> HealthCheckResp {
        self.pool.health()
    }

    /// Evaluate one request against the local store. The entry lock is
    /// held for the pure algorithm body only, never across an await.
    fn check_local(&self, req: &RateLimitReq) -> Result<RateLimitResp> {
        let key = req.hash_key();
        let now = self.clock.now_ms();
        let mut entry = self.store.entry(&key);
        let prev = entry.get().cloned();
        if prev.is_some() {
            self.metrics.cache_hits.inc(&[]);
        } else {
            self.metrics.cache_misses.inc(&[]);
        }
        let (state, resp) = match algorithms::apply(prev.as_ref(), req, now) {
            Ok(v) => v,
            Err(e @ GubernatorError::Validation(_)) => return Ok(validation_response(req, &e)),
            Err(e) => return Err(e),
        };
        entry.put(state, now)?;
        if resp.status == Status::OverLimit {
            self.metrics.over_limit_counter.inc(&[]);
        }
        Ok(resp)
    }
}

/// Validation failures ride the `error` field with UNDER_LIMIT status so
/// clients always see the message.
fn validation_response(req: &RateLimitReq, e: &GubernatorError) -> RateLimitResp {
    RateLimitResp {
        status: Status::UnderLimit,
        limit: req.limit,
        remaining: 0,
        reset_time: 0,
        error: e.to_string(),
    }
}

/// Transport failures answer OVER_LIMIT with the error surfaced in-band;
/// the caller decides whether to retry.
fn transport_response(req: &RateLimitReq, message: &str) -> RateLimitResp {
    RateLimitResp {
        status: Status::OverLimit,
        limit: req.limit,
        remaining: 0,
        reset_time: 0,
        error: message.to_string(),
    }
}

#[async_trait]
impl RpcHandler for RateLimitService {
    async fn handle(&self, op: Op, body: Bytes) -> Result<Vec<u8>> {
        match op {
            Op::GetRateLimits => {
                let req: GetRateLimitsReq = decode_body(&body)?;
                let deadline = Instant::now() + DEFAULT_RPC_DEADLINE;
                let responses = self.get_rate_limits(req.requests, deadline).await?;
                encode_body(&GetRateLimitsResp { responses })
            }
            Op::GetPeerRateLimits => {
                let req: GetRateLimitsReq = decode_body(&body)?;
                let responses = self.get_peer_rate_limits(req.requests)?;
                encode_body(&GetRateLimitsResp { responses })
            }
            Op::UpdatePeerGlobals => {
                let update: UpdatePeerGlobalsReq = decode_body(&body)?;
                self.update_peer_globals(update)?;
                Ok(b"{}".to_vec())
            }
            Op::HealthCheck => encode_body(&self.health_check()),
        }
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| GubernatorError::Transport(format!("invalid request body: {e}")))
}

fn encode_body<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| GubernatorError::Internal(format!("encode: {e}")))
}
