//! Token bucket: a window's worth of tokens handed out up front, refilled
//! in full when the window resets.

use crate::error::Result;
use crate::types::{behavior, RateLimitReq, RateLimitResp, Status};

use super::{consume, next_reset, CounterState, TokenBucketState};

fn effective_capacity(req: &RateLimitReq) -> i64 {
    if req.burst == 0 {
        req.limit
    } else {
        req.burst
    }
}

pub fn apply(
    prev: Option<&CounterState>,
    req: &RateLimitReq,
    now_ms: i64,
) -> Result<(CounterState, RateLimitResp)> {
    // Reuse prior state only when it matches this request's shape and the
    // window has not rolled over; anything else re-seeds a fresh bucket.
    let prior = match prev {
        Some(CounterState::TokenBucket(t)) if t.duration == req.duration && t.reset_time > now_ms => {
            Some(t)
        }
        _ => None,
    };

    if req.has_behavior(behavior::RESET_REMAINING) {
        let reset_time = match prior {
            Some(t) => t.reset_time,
            None => next_reset(req, now_ms)?,
        };
        let state = TokenBucketState {
            limit: req.limit,
            duration: req.duration,
            remaining: req.limit,
            reset_time,
            created_at: prior.map_or(now_ms, |t| t.created_at),
        };
        let resp = RateLimitResp {
            status: Status::UnderLimit,
            limit: req.limit,
            remaining: req.limit,
            reset_time,
            error: String::new(),
        };
        return Ok((CounterState::TokenBucket(state), resp));
    }

    let (mut remaining, reset_time, created_at) = match prior {
        Some(t) => {
            let mut remaining = t.remaining;
            if t.limit != req.limit {
                // A changed limit shifts remaining by the delta, clamped to
                // the new limit and never below zero.
                remaining = remaining
                    .saturating_add(req.limit.saturating_sub(t.limit))
                    .min(req.limit)
                    .max(0);
            }
            (remaining, t.reset_time, t.created_at)
        }
        None => (effective_capacity(req), next_reset(req, now_ms)?, now_ms),
    };

    let under = consume(req, &mut remaining, req.limit);

    let state = TokenBucketState {
        limit: req.limit,
        duration: req.duration,
        remaining,
        reset_time,
        created_at,
    };
    let resp = RateLimitResp {
        status: if under { Status::UnderLimit } else { Status::OverLimit },
        limit: req.limit,
        remaining,
        reset_time,
        error: String::new(),
    };
    Ok((CounterState::TokenBucket(state), resp))
}
