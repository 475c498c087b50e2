//! Rate-limit state machines.
//!
//! Both algorithms are total functions from (previous state, request, now)
//! to (next state, response). All arithmetic is 64-bit signed integer with
//! floor division; time only enters through the `now_ms` argument.

pub mod leaky_bucket;
pub mod token_bucket;

use crate::error::{GubernatorError, Result};
use crate::gregorian::GregorianUnit;
use crate::types::{behavior, Algorithm, RateLimitReq, RateLimitResp, UpdatePeerGlobal};

#[derive(Debug, Clone, PartialEq)]
pub struct TokenBucketState {
    pub limit: i64,
    pub duration: i64,
    pub remaining: i64,
    pub reset_time: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeakyBucketState {
    pub limit: i64,
    pub duration: i64,
    pub burst: i64,
    pub remaining: i64,
    /// Leak origin. Advanced by whole leaked units so sub-rate fragments
    /// carry to the next call.
    pub updated_at: i64,
    pub reset_time: i64,
    pub created_at: i64,
}

/// In-memory counter value for one (namespace, unique_key).
#[derive(Debug, Clone, PartialEq)]
pub enum CounterState {
    TokenBucket(TokenBucketState),
    LeakyBucket(LeakyBucketState),
}

impl CounterState {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            CounterState::TokenBucket(_) => Algorithm::TokenBucket,
            CounterState::LeakyBucket(_) => Algorithm::LeakyBucket,
        }
    }

    /// Moment after which the entry may be evicted.
    pub fn reset_time(&self) -> i64 {
        match self {
            CounterState::TokenBucket(t) => t.reset_time,
            CounterState::LeakyBucket(b) => b.reset_time,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.reset_time() <= now_ms
    }

    /// Snapshot for an owner broadcast.
    pub fn to_global(&self, name: &str, unique_key: &str) -> UpdatePeerGlobal {
        match self {
            CounterState::TokenBucket(t) => UpdatePeerGlobal {
                name: name.into(),
                unique_key: unique_key.into(),
                algorithm: Algorithm::TokenBucket,
                limit: t.limit,
                duration: t.duration,
                burst: 0,
                remaining: t.remaining,
                reset_time: t.reset_time,
                updated_at: 0,
            },
            CounterState::LeakyBucket(b) => UpdatePeerGlobal {
                name: name.into(),
                unique_key: unique_key.into(),
                algorithm: Algorithm::LeakyBucket,
                limit: b.limit,
                duration: b.duration,
                burst: b.burst,
                remaining: b.remaining,
                reset_time: b.reset_time,
                updated_at: b.updated_at,
            },
        }
    }

    /// Rebuild local state from a broadcast snapshot. The broadcast wins.
    pub fn from_global(g: &UpdatePeerGlobal, now_ms: i64) -> Self {
        match g.algorithm {
            Algorithm::TokenBucket => CounterState::TokenBucket(TokenBucketState {
                limit: g.limit,
                duration: g.duration,
                remaining: g.remaining,
                reset_time: g.reset_time,
                created_at: now_ms,
            }),
            Algorithm::LeakyBucket => CounterState::LeakyBucket(LeakyBucketState {
                limit: g.limit,
                duration: g.duration,
                burst: g.burst,
                remaining: g.remaining,
                updated_at: g.updated_at,
                reset_time: g.reset_time,
                created_at: now_ms,
            }),
        }
    }
}

/// Evaluate one hit against the previous state.
pub fn apply(
    prev: Option<&CounterState>,
    req: &RateLimitReq,
    now_ms: i64,
) -> Result<(CounterState, RateLimitResp)> {
    match req.algorithm {
        Algorithm::TokenBucket => token_bucket::apply(prev, req, now_ms),
        Algorithm::LeakyBucket => leaky_bucket::apply(prev, req, now_ms),
    }
}

/// Calendar unit for this request, if any. With DURATION_IS_GREGORIAN set
/// the duration must be a valid sentinel; without it, sentinel durations
/// still select the unit.
pub(crate) fn gregorian_unit(req: &RateLimitReq) -> Result<Option<GregorianUnit>> {
    match GregorianUnit::from_duration(req.duration) {
        Some(unit) => Ok(Some(unit)),
        None if req.has_behavior(behavior::DURATION_IS_GREGORIAN) => {
            Err(GubernatorError::Validation(
                "behavior DURATION_IS_GREGORIAN is set with an invalid duration".into(),
            ))
        }
        None => Ok(None),
    }
}

/// End of a fresh window starting at `now_ms`.
pub(crate) fn next_reset(req: &RateLimitReq, now_ms: i64) -> Result<i64> {
    match gregorian_unit(req)? {
        Some(unit) => unit.next_boundary(now_ms),
        None => Ok(now_ms.saturating_add(req.duration)),
    }
}

/// Consume or refund `hits` against `remaining`, leaving the bucket intact
/// on over-request. `refund_cap` bounds negative-hit refunds.
pub(crate) fn consume(req: &RateLimitReq, remaining: &mut i64, refund_cap: i64) -> bool {
    let hits = req.hits;
    if hits == 0 {
        return *remaining > 0;
    }
    if hits < 0 {
        // A refund may climb to the cap but never lowers what is left.
        let refunded = remaining.saturating_add(hits.saturating_neg()).min(refund_cap);
        *remaining = refunded.max(*remaining);
        return true;
    }
    if hits <= *remaining {
        *remaining -= hits;
        return true;
    }
    // Requesting more than available leaves the bucket intact so the
    // caller can retry with fewer hits.
    if req.has_behavior(behavior::DRAIN_OVER_LIMIT) {
        *remaining = 0;
    }
    false
}
