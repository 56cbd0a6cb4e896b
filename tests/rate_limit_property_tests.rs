//! Property tests for the token-bucket admission contract. The bucket state
//! machine lives in an atomic store-side script; this reference model mirrors
//! its refill-clamp-consume step exactly (millisecond timestamps, fractional
//! tokens) so the admission properties can be checked without a live store.

use proptest::prelude::*;

use podium::models::PlanType;
use podium::rate_limit::BucketParams;

struct ReferenceBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill_ms: i64,
}

impl ReferenceBucket {
    fn full(params: BucketParams, now_ms: i64) -> Self {
        Self {
            capacity: f64::from(params.capacity),
            refill_per_sec: f64::from(params.refill_per_sec),
            tokens: f64::from(params.capacity),
            last_refill_ms: now_ms,
        }
    }

    /// One admission step: refill by elapsed time, clamp to capacity, consume
    /// one token if available.
    fn request(&mut self, now_ms: i64) -> bool {
        let elapsed = (now_ms - self.last_refill_ms).max(0);
        self.tokens += (elapsed as f64 / 1000.0) * self.refill_per_sec;
        if self.tokens > self.capacity {
            self.tokens = self.capacity;
        }
        self.last_refill_ms = now_ms;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

fn plan_strategy() -> impl Strategy<Value = PlanType> {
    prop_oneof![
        Just(PlanType::Free),
        Just(PlanType::Pro),
        Just(PlanType::Enterprise),
    ]
}

proptest! {
    /// An instantaneous burst from a full bucket admits exactly
    /// min(N, capacity) requests.
    #[test]
    fn burst_admits_up_to_capacity(plan in plan_strategy(), n in 1usize..700) {
        let params = BucketParams::for_plan(plan);
        let mut bucket = ReferenceBucket::full(params, 0);

        let allowed = (0..n).filter(|_| bucket.request(0)).count();
        prop_assert_eq!(allowed, n.min(params.capacity as usize));
    }

    /// After draining the bucket, an idle gap of D seconds restores
    /// floor(min(capacity, D * refill)) admissions.
    #[test]
    fn idle_gap_refills_at_the_plan_rate(plan in plan_strategy(), gap_secs in 1i64..30) {
        let params = BucketParams::for_plan(plan);
        let mut bucket = ReferenceBucket::full(params, 0);

        // Drain completely.
        while bucket.request(0) {}

        let refilled = (i64::from(params.refill_per_sec) * gap_secs)
            .min(i64::from(params.capacity)) as usize;

        let now_ms = gap_secs * 1000;
        let attempts = params.capacity as usize + 10;
        let allowed = (0..attempts).filter(|_| bucket.request(now_ms)).count();
        prop_assert_eq!(allowed, refilled);
    }

    /// Admissions never exceed the budget C + R * elapsed, regardless of
    /// request spacing.
    #[test]
    fn admissions_never_exceed_the_budget(
        plan in plan_strategy(),
        gaps_ms in prop::collection::vec(0i64..5_000, 1..80),
    ) {
        let params = BucketParams::for_plan(plan);
        let mut bucket = ReferenceBucket::full(params, 0);

        let mut now_ms = 0;
        let mut allowed = 0i64;
        for gap in &gaps_ms {
            now_ms += gap;
            if bucket.request(now_ms) {
                allowed += 1;
            }
        }

        let budget = f64::from(params.capacity)
            + (now_ms as f64 / 1000.0) * f64::from(params.refill_per_sec);
        prop_assert!((allowed as f64) <= budget.floor());
    }
}

#[test]
fn free_plan_burst_scenario() {
    // 11 back-to-back requests on the free plan: ten 200s then a 429.
    let params = BucketParams::for_plan(PlanType::Free);
    let mut bucket = ReferenceBucket::full(params, 0);

    let outcomes: Vec<bool> = (0..11).map(|_| bucket.request(0)).collect();
    assert_eq!(outcomes[..10], [true; 10]);
    assert!(!outcomes[10]);

    // After 5 seconds the refill admits five more.
    let outcomes: Vec<bool> = (0..5).map(|_| bucket.request(5_000)).collect();
    assert_eq!(outcomes, [true; 5]);
}

#[test]
fn denied_request_consumes_nothing() {
    let params = BucketParams::for_plan(PlanType::Free);
    let mut bucket = ReferenceBucket::full(params, 0);
    while bucket.request(0) {}

    // Repeated denials at the same instant leave the deficit unchanged, so
    // one second later exactly one token is available.
    for _ in 0..50 {
        assert!(!bucket.request(0));
    }
    assert!(bucket.request(1_000));
    assert!(!bucket.request(1_000));
}
