//! Leaky bucket: capacity drains on hits and refills continuously at
//! `limit` units per `duration`.
//!
//! The leak is computed as `elapsed * limit / duration` and `updated_at`
//! advances by whole leaked units, so configurations where the per-unit
//! rate is below one millisecond ("limit 2000 over 1s") keep their
//! fractional leak instead of dividing by zero.

use crate::error::Result;
use crate::types::{behavior, RateLimitReq, RateLimitResp, Status};

use super::{consume, gregorian_unit, CounterState, LeakyBucketState};

fn effective_capacity(req: &RateLimitReq) -> i64 {
    if req.burst > req.limit {
        req.burst
    } else {
        req.limit
    }
}

pub fn apply(
    prev: Option<&CounterState>,
    req: &RateLimitReq,
    now_ms: i64,
) -> Result<(CounterState, RateLimitResp)> {
    let capacity = effective_capacity(req);
    let unit = gregorian_unit(req)?;
    // Leak rate uses the unit's nominal length for calendar windows.
    let leak_window = match unit {
        Some(u) => u.nominal_ms(),
        None => req.duration,
    };

    let prior = match prev {
        Some(CounterState::LeakyBucket(b)) if b.duration == req.duration => Some(b),
        _ => None,
    };

    let fresh = prior.is_none();
    let (mut remaining, mut updated_at, created_at) = match prior {
        Some(b) => {
            let mut remaining = b.remaining;
            if b.limit != req.limit {
                remaining = remaining
                    .saturating_add(req.limit.saturating_sub(b.limit))
                    .min(capacity)
                    .max(0);
            }
            (remaining, b.updated_at, b.created_at)
        }
        None => (capacity, now_ms, now_ms),
    };

    if !fresh {
        if leak_window == 0 {
            // Zero-length window: the bucket refills instantly.
            remaining = capacity;
            updated_at = now_ms;
        } else if req.limit > 0 {
            let elapsed = now_ms.saturating_sub(updated_at);
            if elapsed > 0 {
                let leaked = elapsed.saturating_mul(req.limit) / leak_window;
                if leaked > 0 {
                    remaining = remaining.saturating_add(leaked).min(capacity);
                    updated_at =
                        updated_at.saturating_add(leaked.saturating_mul(leak_window) / req.limit);
                }
            }
            if remaining >= capacity {
                // Full bucket: fragments carry nothing, re-anchor the leak.
                updated_at = now_ms;
            }
        }
    }

    let status = if req.has_behavior(behavior::RESET_REMAINING) {
        remaining = req.limit;
        Status::UnderLimit
    } else if consume(req, &mut remaining, capacity) {
        Status::UnderLimit
    } else {
        Status::OverLimit
    };

    // Time until the bucket is full again; calendar windows report the
    // boundary on first sight and cap at it afterwards.
    let drain_time = if req.limit > 0 && leak_window > 0 {
        now_ms.saturating_add(capacity.saturating_sub(remaining).saturating_mul(leak_window) / req.limit)
    } else {
        now_ms
    };
    let reset_time = match unit {
        Some(u) => {
            let boundary = u.next_boundary(now_ms)?;
            if fresh {
                boundary
            } else {
                drain_time.min(boundary)
            }
        }
        None => drain_time,
    };

    let state = LeakyBucketState {
        limit: req.limit,
        duration: req.duration,
        burst: req.burst,
        remaining,
        updated_at,
        reset_time,
        created_at,
    };
    let resp = RateLimitResp {
        status,
        limit: req.limit,
        remaining,
        reset_time,
        error: String::new(),
    };
    Ok((CounterState::LeakyBucket(state), resp))
}
