use chrono::{Datelike, NaiveDate, Utc};
use serde::Serialize;
use tracing::warn;

use crate::database::Database;
use crate::error::ApiError;
use crate::models::{PlanType, Subscription, SubscriptionStatus};

/// Monthly plan limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub requests: i64,
    pub leaderboards: i64,
    pub api_keys: i64,
}

impl PlanLimits {
    pub fn for_plan(plan: PlanType) -> Self {
        match plan {
            PlanType::Free => Self {
                requests: 10_000,
                leaderboards: 5,
                api_keys: 2,
            },
            PlanType::Pro => Self {
                requests: 1_000_000,
                leaderboards: 50,
                api_keys: 10,
            },
            PlanType::Enterprise => Self {
                requests: 10_000_000,
                leaderboards: 9_999,
                api_keys: 9_999,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitStatus {
    pub current: i64,
    pub limit: i64,
    pub within_limit: bool,
}

impl LimitStatus {
    fn new(current: i64, limit: i64) -> Self {
        Self {
            current,
            limit,
            within_limit: current < limit,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCheck {
    pub requests: LimitStatus,
    pub leaderboards: LimitStatus,
    pub api_keys: LimitStatus,
    pub within_limits: bool,
}

/// Plan enforcement and subscription lifecycle. The rate limiter bounds
/// request *rate*; this service bounds monthly volume and entity counts.
#[derive(Debug, Clone)]
pub struct QuotaService {
    database: Database,
}

impl QuotaService {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub async fn create_subscription(&self, sub: &Subscription) -> Result<(), ApiError> {
        if sub.status == SubscriptionStatus::Active {
            if let Some(existing) = self.database.get_active_subscription(&sub.tenant_id).await? {
                return Err(ApiError::Conflict(format!(
                    "tenant already has an active subscription: {}",
                    existing.id
                )));
            }
        }
        Ok(self.database.create_subscription(sub).await?)
    }

    pub async fn get_active_subscription(
        &self,
        tenant_id: &str,
    ) -> Result<Option<Subscription>, ApiError> {
        Ok(self.database.get_active_subscription(tenant_id).await?)
    }

    pub async fn cancel_subscription(
        &self,
        subscription_id: &str,
        at_period_end: bool,
    ) -> Result<Subscription, ApiError> {
        self.database
            .cancel_subscription(subscription_id, at_period_end)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("subscription not found: {subscription_id}"))
            })
    }

    /// Month-to-date limit check for a subscription's tenant.
    pub async fn usage_check(&self, subscription_id: &str) -> Result<UsageCheck, ApiError> {
        let sub = self
            .database
            .get_subscription(subscription_id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("subscription not found: {subscription_id}"))
            })?;

        self.usage_check_for_tenant(&sub.tenant_id, sub.plan_type).await
    }

    pub async fn usage_check_for_tenant(
        &self,
        tenant_id: &str,
        plan: PlanType,
    ) -> Result<UsageCheck, ApiError> {
        let limits = PlanLimits::for_plan(plan);

        let requests = self
            .database
            .month_to_date_requests(tenant_id, month_start(Utc::now().date_naive()))
            .await?;
        let leaderboards = self.database.count_leaderboards(tenant_id).await?;
        let api_keys = self.database.count_active_api_keys(tenant_id).await?;

        let requests = LimitStatus::new(requests, limits.requests);
        let leaderboards = LimitStatus::new(leaderboards, limits.leaderboards);
        let api_keys = LimitStatus::new(api_keys, limits.api_keys);
        let within_limits =
            requests.within_limit && leaderboards.within_limit && api_keys.within_limit;

        Ok(UsageCheck {
            requests,
            leaderboards,
            api_keys,
            within_limits,
        })
    }

    /// Write-side admission gate: refuse score writes once the monthly
    /// request budget is spent. Reads are not gated here.
    pub async fn enforce_monthly_request_quota(
        &self,
        tenant_id: &str,
        plan: PlanType,
    ) -> Result<(), ApiError> {
        let limit = PlanLimits::for_plan(plan).requests;
        let current = self
            .database
            .month_to_date_requests(tenant_id, month_start(Utc::now().date_naive()))
            .await?;

        if current >= limit {
            warn!(tenant_id, current, limit, "monthly request quota exhausted");
            return Err(ApiError::QuotaExceeded {
                resource: "requests".to_string(),
                current,
                limit,
            });
        }
        Ok(())
    }
}

pub fn month_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1).unwrap_or(date)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_limit_table_matches_tiers() {
        let free = PlanLimits::for_plan(PlanType::Free);
        assert_eq!((free.requests, free.leaderboards, free.api_keys), (10_000, 5, 2));

        let pro = PlanLimits::for_plan(PlanType::Pro);
        assert_eq!((pro.requests, pro.leaderboards, pro.api_keys), (1_000_000, 50, 10));

        let enterprise = PlanLimits::for_plan(PlanType::Enterprise);
        assert_eq!(
            (enterprise.requests, enterprise.leaderboards, enterprise.api_keys),
            (10_000_000, 9_999, 9_999)
        );
    }

    #[test]
    fn limit_status_is_exclusive_at_the_boundary() {
        assert!(LimitStatus::new(9_999, 10_000).within_limit);
        assert!(!LimitStatus::new(10_000, 10_000).within_limit);
        assert!(!LimitStatus::new(10_001, 10_000).within_limit);
    }

    #[test]
    fn month_start_truncates_the_day() {
        let date = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        assert_eq!(month_start(date), NaiveDate::from_ymd_opt(2026, 8, 1).unwrap());
    }
}
