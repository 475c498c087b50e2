//! Leaky bucket scenarios.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use gubernator_core::algorithms::{self, CounterState};
use gubernator_core::clock::{Clock, FrozenClock};
use gubernator_core::types::{behavior, Algorithm, RateLimitReq, RateLimitResp, Status};

struct Bucket {
    state: Option<CounterState>,
    clock: FrozenClock,
}

impl Bucket {
    fn at(now_ms: i64) -> Self {
        Self {
            state: None,
            clock: FrozenClock::at(now_ms),
        }
    }

    fn check(&mut self, req: &RateLimitReq) -> RateLimitResp {
        let (state, resp) =
            algorithms::apply(self.state.as_ref(), req, self.clock.now_ms()).unwrap();
        self.state = Some(state);
        resp
    }
}

fn leaky_req(limit: i64, duration: i64, hits: i64) -> RateLimitReq {
    RateLimitReq {
        name: "test_ns".into(),
        unique_key: "client:42".into(),
        hits,
        limit,
        duration,
        algorithm: Algorithm::LeakyBucket,
        behavior: 0,
        burst: 0,
    }
}

#[test]
fn leak_timeline() {
    // limit 10 over 30s: one unit leaks back every 3s.
    let mut b = Bucket::at(0);

    let r = b.check(&leaky_req(10, 30_000, 1));
    assert_eq!(r.remaining, 9);
    assert_eq!(r.reset_time, 3_000);

    b.clock.set(1_000);
    let r = b.check(&leaky_req(10, 30_000, 1));
    assert_eq!(r.remaining, 8);

    b.clock.set(2_500);
    let r = b.check(&leaky_req(10, 30_000, 1));
    assert_eq!(r.remaining, 7);

    // 5.5s in: one whole unit has leaked; the 2.5s fragment carries.
    b.clock.set(5_500);
    let r = b.check(&leaky_req(10, 30_000, 0));
    assert_eq!(r.remaining, 8);

    // The fragment plus 3s more leaks the next unit.
    b.clock.set(8_500);
    let r = b.check(&leaky_req(10, 30_000, 0));
    assert_eq!(r.remaining, 9);

    let r = b.check(&leaky_req(10, 30_000, 9));
    assert_eq!((r.remaining, r.status), (0, Status::UnderLimit));

    let r = b.check(&leaky_req(10, 30_000, 1));
    assert_eq!((r.remaining, r.status), (0, Status::OverLimit));

    // A full window later the bucket is back to capacity, capped there.
    b.clock.set(68_500);
    let r = b.check(&leaky_req(10, 30_000, 0));
    assert_eq!((r.remaining, r.status), (10, Status::UnderLimit));
}

#[test]
fn sub_millisecond_rate_leaks_by_multiplication() {
    // 2000 units per second puts the per-unit rate below one
    // millisecond; integer rate math must not collapse to zero.
    let mut b = Bucket::at(0);

    let r = b.check(&leaky_req(2_000, 1_000, 1));
    assert_eq!(r.remaining, 1_999);

    let r = b.check(&leaky_req(2_000, 1_000, 100));
    assert_eq!(r.remaining, 1_899);

    b.clock.set(1);
    let r = b.check(&leaky_req(2_000, 1_000, 0));
    assert_eq!(r.remaining, 1_901);
}

#[test]
fn burst_raises_capacity() {
    let mut b = Bucket::at(0);
    let mut req = leaky_req(10, 30_000, 15);
    req.burst = 20;
    let r = b.check(&req);
    assert_eq!((r.remaining, r.status), (5, Status::UnderLimit));

    let mut refund = leaky_req(10, 30_000, -20);
    refund.burst = 20;
    let r = b.check(&refund);
    assert_eq!(r.remaining, 20);
}

#[test]
fn negative_hits_can_exceed_a_shrunken_limit() {
    let mut b = Bucket::at(0);
    b.check(&leaky_req(10, 30_000, 6));

    // Limit drops to 4 with burst 8; the delta clamp floors remaining at
    // zero, then the refund may climb past the new limit up to burst.
    let mut refund = leaky_req(4, 30_000, -6);
    refund.burst = 8;
    let r = b.check(&refund);
    assert_eq!((r.remaining, r.status), (6, Status::UnderLimit));
    assert!(r.remaining > r.limit);
}

#[test]
fn remaining_is_nondecreasing_while_idle() {
    let mut b = Bucket::at(0);
    b.check(&leaky_req(10, 30_000, 5));

    let mut last = 5;
    for step in 1..=40 {
        b.clock.set(step * 500);
        let r = b.check(&leaky_req(10, 30_000, 0));
        assert!(r.remaining >= last, "step={step}");
        last = r.remaining;
    }
    // Five units at 3s each: fully refilled by the 15s mark.
    assert_eq!(last, 10);
}

#[test]
fn over_request_leaves_bucket_intact() {
    let mut b = Bucket::at(0);
    b.check(&leaky_req(10, 30_000, 4));

    let r = b.check(&leaky_req(10, 30_000, 7));
    assert_eq!((r.remaining, r.status), (6, Status::OverLimit));

    let mut drain = leaky_req(10, 30_000, 7);
    drain.behavior = behavior::DRAIN_OVER_LIMIT;
    let r = b.check(&drain);
    assert_eq!((r.remaining, r.status), (0, Status::OverLimit));
}

#[test]
fn reset_remaining_refills() {
    let mut b = Bucket::at(0);
    b.check(&leaky_req(10, 30_000, 5));

    let mut reset = leaky_req(10, 30_000, 3);
    reset.behavior = behavior::RESET_REMAINING;
    let r = b.check(&reset);
    assert_eq!((r.remaining, r.status), (10, Status::UnderLimit));
}

#[test]
fn algorithm_switch_reseeds() {
    let mut b = Bucket::at(0);
    b.check(&RateLimitReq {
        algorithm: Algorithm::TokenBucket,
        ..leaky_req(10, 30_000, 4)
    });

    let r = b.check(&leaky_req(10, 30_000, 1));
    assert_eq!(r.remaining, 9);
}

#[test]
fn zero_duration_refills_instantly() {
    let mut b = Bucket::at(0);
    let r = b.check(&leaky_req(5, 0, 5));
    assert_eq!((r.remaining, r.status), (0, Status::UnderLimit));

    let r = b.check(&leaky_req(5, 0, 1));
    assert_eq!(r.remaining, 4);
}
