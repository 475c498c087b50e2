//! Token bucket scenarios.

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

fn token_req(limit: i64, duration: i64, hits: i64) -> RateLimitReq {
    RateLimitReq {
        name: "test_ns".into(),
        unique_key: "account:1234".into(),
        hits,
        limit,
        duration,
        algorithm: Algorithm::TokenBucket,
        behavior: 0,
        burst: 0,
    }
}

#[test]
fn exhaust_then_over() {
    let mut b = Bucket::at(1_000);

    let r = b.check(&token_req(2, 9_000, 1));
    assert_eq!((r.remaining, r.status), (1, Status::UnderLimit));

    let r = b.check(&token_req(2, 9_000, 1));
    assert_eq!((r.remaining, r.status), (0, Status::UnderLimit));

    let r = b.check(&token_req(2, 9_000, 1));
    assert_eq!((r.remaining, r.status), (0, Status::OverLimit));
}

#[test]
fn over_request_leaves_bucket_intact() {
    let mut b = Bucket::at(1_000);
    let steps: [(i64, i64, Status); 6] = [
        (1_000, 1_000, Status::UnderLimit),
        (1_500, 1_000, Status::OverLimit),
        (500, 500, Status::UnderLimit),
        (400, 100, Status::UnderLimit),
        (100, 0, Status::UnderLimit),
        (1, 0, Status::OverLimit),
    ];
    for (hits, want_remaining, want_status) in steps {
        let r = b.check(&token_req(2_000, 1_000, hits));
        assert_eq!((r.remaining, r.status), (want_remaining, want_status), "hits={hits}");
    }
}

#[test]
fn limit_change_adjusts_remaining() {
    let mut b = Bucket::at(1_000);
    b.check(&token_req(100, 60_000, 1));
    let r = b.check(&token_req(100, 60_000, 1));
    assert_eq!(r.remaining, 98);

    // Shrinking the limit preserves the consumed delta: 98 + (10 - 100)
    // clamps to 8, then the hit lands.
    let r = b.check(&token_req(10, 60_000, 1));
    assert_eq!((r.remaining, r.status), (7, Status::UnderLimit));
}

#[test]
fn limit_growth_credits_difference() {
    let mut b = Bucket::at(1_000);
    b.check(&token_req(10, 60_000, 8));
    let r = b.check(&token_req(20, 60_000, 0));
    assert_eq!(r.remaining, 12);
}

#[test]
fn reset_remaining_refills_without_counting() {
    let mut b = Bucket::at(1_000);
    b.check(&token_req(100, 60_000, 1));
    let r = b.check(&token_req(100, 60_000, 1));
    assert_eq!(r.remaining, 98);

    let mut reset = token_req(100, 60_000, 1);
    reset.behavior = behavior::RESET_REMAINING;
    let r = b.check(&reset);
    assert_eq!((r.remaining, r.status), (100, Status::UnderLimit));

    let r = b.check(&token_req(100, 60_000, 1));
    assert_eq!(r.remaining, 99);
}

#[test]
fn negative_hits_refund_capped_at_limit() {
    let mut b = Bucket::at(1_000);
    b.check(&token_req(10, 60_000, 3));

    let r = b.check(&token_req(10, 60_000, -5));
    assert_eq!((r.remaining, r.status), (10, Status::UnderLimit));
}

#[test]
fn drain_over_limit_empties_bucket() {
    let mut b = Bucket::at(1_000);
    b.check(&token_req(5, 60_000, 3));

    let mut drain = token_req(5, 60_000, 4);
    drain.behavior = behavior::DRAIN_OVER_LIMIT;
    let r = b.check(&drain);
    assert_eq!((r.remaining, r.status), (0, Status::OverLimit));
}

#[test]
fn zero_limit_is_always_over() {
    let mut b = Bucket::at(1_000);
    let r = b.check(&token_req(0, 60_000, 1));
    assert_eq!((r.remaining, r.status), (0, Status::OverLimit));
    assert!(r.error.is_empty());

    let r = b.check(&token_req(0, 60_000, 0));
    assert_eq!((r.remaining, r.status), (0, Status::OverLimit));
}

#[test]
fn zero_duration_resets_every_hit() {
    let mut b = Bucket::at(1_000);
    let r = b.check(&token_req(5, 0, 1));
    assert_eq!(r.remaining, 4);

    // Same instant, but the window already expired: full again.
    let r = b.check(&token_req(5, 0, 5));
    assert_eq!((r.remaining, r.status), (0, Status::UnderLimit));

    let r = b.check(&token_req(5, 0, 1));
    assert_eq!(r.remaining, 4);
}

#[test]
fn window_expiry_reseeds() {
    let mut b = Bucket::at(1_000);
    let r = b.check(&token_req(2, 1_000, 2));
    assert_eq!(r.remaining, 0);
    assert_eq!(r.reset_time, 2_000);

    b.clock.set(2_000);
    let r = b.check(&token_req(2, 1_000, 0));
    assert_eq!((r.remaining, r.status), (2, Status::UnderLimit));
    assert_eq!(r.reset_time, 3_000);
}

#[test]
fn burst_extends_capacity() {
    let mut b = Bucket::at(1_000);
    let r = b.check(&token_req(10, 60_000, 0));
    assert_eq!(r.remaining, 10);

    let mut with_burst = token_req(10, 60_000, 15);
    with_burst.burst = 20;
    let mut b = Bucket::at(1_000);
    let r = b.check(&with_burst);
    assert_eq!((r.remaining, r.status), (5, Status::UnderLimit));
}

#[test]
fn hits_zero_reports_current_state() {
    let mut b = Bucket::at(1_000);
    let r = b.check(&token_req(1, 60_000, 0));
    assert_eq!((r.remaining, r.status), (1, Status::UnderLimit));

    b.check(&token_req(1, 60_000, 1));
    let r = b.check(&token_req(1, 60_000, 0));
    assert_eq!((r.remaining, r.status), (0, Status::OverLimit));
}

#[test]
fn duration_change_reseeds() {
    let mut b = Bucket::at(1_000);
    b.check(&token_req(10, 60_000, 4));
    let r = b.check(&token_req(10, 30_000, 1));
    assert_eq!(r.remaining, 9);
    assert_eq!(r.reset_time, 31_000);
}
