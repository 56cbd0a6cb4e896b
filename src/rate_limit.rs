use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::models::{PlanType, TenantContext};
use crate::store::{bucket_key, ScoreStore};

/// Token-bucket parameters selected by plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketParams {
    pub capacity: u32,
    pub refill_per_sec: u32,
}

impl BucketParams {
    pub fn for_plan(plan: PlanType) -> Self {
        match plan {
            PlanType::Free => Self {
                capacity: 10,
                refill_per_sec: 1,
            },
            PlanType::Pro => Self {
                capacity: 100,
                refill_per_sec: 50,
            },
            PlanType::Enterprise => Self {
                capacity: 500,
                refill_per_sec: 200,
            },
        }
    }
}

/// Outcome of one bucket check, carrying everything the response headers need.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds when the bucket is back at full capacity.
    pub reset_at: i64,
    /// Seconds to wait before the next request can be admitted.
    pub retry_after_secs: u64,
}

impl RateLimitDecision {
    fn open(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit,
            reset_at: Utc::now().timestamp(),
            retry_after_secs: 0,
        }
    }
}

/// Distributed token-bucket limiter. All bucket mutations go through one
/// atomic script in the shared cache; this type only selects parameters and
/// interprets the result.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: ScoreStore,
    enabled: bool,
    fail_closed: bool,
    key_ttl_secs: u64,
}

const COST: u32 = 1;

impl RateLimiter {
    pub fn new(store: ScoreStore, enabled: bool, fail_closed: bool, key_ttl_secs: u64) -> Self {
        Self {
            store,
            enabled,
            fail_closed,
            key_ttl_secs,
        }
    }

    pub async fn check(&self, tenant_id: &str, plan: PlanType) -> Result<RateLimitDecision, ApiError> {
        let params = BucketParams::for_plan(plan);
        if !self.enabled {
            return Ok(RateLimitDecision::open(params.capacity));
        }

        let now = Utc::now();
        let result = self
            .store
            .take_tokens(
                &bucket_key(tenant_id),
                params.capacity,
                params.refill_per_sec,
                now.timestamp_millis(),
                COST,
                self.key_ttl_secs,
            )
            .await;

        let (allowed, tokens) = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if self.fail_closed {
                    warn!("Rate-limit store unreachable, failing closed: {e}");
                    return Err(ApiError::Unavailable("rate limiter unreachable".to_string()));
                }
                warn!("Rate-limit store unreachable, failing open: {e}");
                return Ok(RateLimitDecision::open(params.capacity));
            }
        };

        let deficit = f64::from(params.capacity) - tokens;
        let reset_at = now.timestamp()
            + (deficit / f64::from(params.refill_per_sec)).ceil().max(0.0) as i64;

        let retry_after_secs = if allowed {
            0
        } else {
            ((f64::from(COST) - tokens) / f64::from(params.refill_per_sec)).ceil().max(1.0) as u64
        };

        debug!(
            tenant_id,
            allowed, tokens, "token bucket decision"
        );

        Ok(RateLimitDecision {
            allowed,
            limit: params.capacity,
            remaining: tokens.floor().max(0.0) as u32,
            reset_at,
            retry_after_secs,
        })
    }
}

/// Gateway middleware applying the per-tenant bucket and stamping the
/// rate-limit headers on every response.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let context = request
        .extensions()
        .get::<TenantContext>()
        .cloned()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("tenant context missing")))?;

    let decision = limiter.check(&context.tenant_id, context.plan_type).await?;

    if !decision.allowed {
        return Err(ApiError::RateLimited {
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at: decision.reset_at,
            retry_after_secs: decision.retry_after_secs,
        });
    }

    let mut response = next.run(request).await;
    apply_headers(&mut response, &decision);
    Ok(response)
}

fn apply_headers(response: &mut Response, decision: &RateLimitDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-limit"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-remaining"), v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_at.to_string()) {
        headers.insert(HeaderName::from_static("x-ratelimit-reset"), v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_table_matches_tiers() {
        let free = BucketParams::for_plan(PlanType::Free);
        assert_eq!((free.capacity, free.refill_per_sec), (10, 1));

        let pro = BucketParams::for_plan(PlanType::Pro);
        assert_eq!((pro.capacity, pro.refill_per_sec), (100, 50));

        let enterprise = BucketParams::for_plan(PlanType::Enterprise);
        assert_eq!((enterprise.capacity, enterprise.refill_per_sec), (500, 200));
    }

    #[test]
    fn open_decision_reports_full_bucket() {
        let decision = RateLimitDecision::open(10);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert_eq!(decision.retry_after_secs, 0);
    }
}
