use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Tenant represents a customer account owning projects, keys, and billing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

/// Project scopes leaderboards and API keys within a tenant
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// API key record. The plaintext is shown once at creation and never stored;
/// `key_hash` is the bcrypt verification hash, `lookup_hash` the sha256 hex
/// used for indexed lookup and cache invalidation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiKey {
    pub id: String,
    pub project_id: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    #[serde(skip_serializing)]
    pub lookup_hash: String,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Billing plan tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanType {
    Free,
    Pro,
    Enterprise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    PastDue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub tenant_id: String,
    pub plan_type: PlanType,
    pub status: SubscriptionStatus,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub created_at: DateTime<Utc>,
}

/// Ranking direction: desc means higher scores rank first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// How an incoming score combines with the stored score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Replace,
    Increment,
    Best,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Leaderboard {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: SortOrder,
    pub update_mode: UpdateMode,
    pub reset_schedule: Option<String>,
    pub ttl_days: Option<i32>,
    pub is_active: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Season is a control-plane windowing concept; it has no sorted-set side
/// effects and exists for external aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    pub id: String,
    pub leaderboard_id: String,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

/// One score submission, appended to the durable log by the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEvent {
    pub id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub leaderboard_id: String,
    pub user_id: String,
    pub score: f64,
    pub increment: bool,
    pub created_at: DateTime<Utc>,
}

/// Daily usage roll-up, unique per (tenant, project, date)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub tenant_id: String,
    pub project_id: String,
    pub date: NaiveDate,
    pub score_updates: i64,
    pub leaderboard_reads: i64,
    pub total_requests: i64,
}

/// Request-scoped tenant identity resolved by the gateway and propagated to
/// downstream components.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_id: String,
    pub project_id: String,
    pub plan_type: PlanType,
    pub key_id: String,
}

impl PlanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanType::Free => "free",
            PlanType::Pro => "pro",
            PlanType::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "free" => Some(PlanType::Free),
            "pro" => Some(PlanType::Pro),
            "enterprise" => Some(PlanType::Enterprise),
            _ => None,
        }
    }
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::PastDue => "past_due",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "past_due" => Some(SubscriptionStatus::PastDue),
            _ => None,
        }
    }
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "asc" => Some(SortOrder::Asc),
            "desc" => Some(SortOrder::Desc),
            _ => None,
        }
    }
}

impl UpdateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateMode::Replace => "replace",
            UpdateMode::Increment => "increment",
            UpdateMode::Best => "best",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "replace" => Some(UpdateMode::Replace),
            "increment" => Some(UpdateMode::Increment),
            "best" => Some(UpdateMode::Best),
            _ => None,
        }
    }
}

impl Tenant {
    pub fn new(name: String, email: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name,
            email,
            created_at: Utc::now(),
        }
    }
}

impl Project {
    pub fn new(tenant_id: String, name: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            name,
            created_at: Utc::now(),
        }
    }
}

impl ApiKey {
    pub fn new(project_id: String, name: String, key_hash: String, lookup_hash: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            name,
            key_hash,
            lookup_hash,
            last_used_at: None,
            revoked_at: None,
            created_at: Utc::now(),
        }
    }

    /// A key is usable until it has been revoked
    pub fn is_usable(&self) -> bool {
        self.revoked_at.is_none()
    }
}

impl Subscription {
    pub fn new(
        tenant_id: String,
        plan_type: PlanType,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            plan_type,
            status: SubscriptionStatus::Active,
            period_start,
            period_end,
            cancel_at_period_end: false,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

impl Leaderboard {
    pub fn new(project_id: String, name: String, sort_order: SortOrder, update_mode: UpdateMode) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            name,
            description: None,
            sort_order,
            update_mode,
            reset_schedule: None,
            ttl_days: None,
            is_active: true,
            metadata: Value::Object(Default::default()),
            created_at: now,
            updated_at: now,
        }
    }
}

impl Season {
    pub fn new(
        leaderboard_id: String,
        name: String,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            leaderboard_id,
            name,
            start_date,
            end_date,
            is_active: false,
            metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }
}

impl ScoreEvent {
    pub fn new(
        tenant_id: String,
        project_id: String,
        leaderboard_id: String,
        user_id: String,
        score: f64,
        increment: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            project_id,
            leaderboard_id,
            user_id,
            score,
            increment,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_type_round_trips() {
        for plan in [PlanType::Free, PlanType::Pro, PlanType::Enterprise] {
            assert_eq!(PlanType::parse(plan.as_str()), Some(plan));
        }
        assert_eq!(PlanType::parse("platinum"), None);
    }

    #[test]
    fn update_mode_round_trips() {
        for mode in [UpdateMode::Replace, UpdateMode::Increment, UpdateMode::Best] {
            assert_eq!(UpdateMode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(UpdateMode::parse(""), None);
    }

    #[test]
    fn new_key_is_usable_until_revoked() {
        let mut key = ApiKey::new(
            "project".into(),
            "ci".into(),
            "$2b$12$hash".into(),
            "abcd".into(),
        );
        assert!(key.is_usable());
        key.revoked_at = Some(Utc::now());
        assert!(!key.is_usable());
    }

    #[test]
    fn subscription_defaults_to_active() {
        let sub = Subscription::new(
            "tenant".into(),
            PlanType::Pro,
            Utc::now(),
            Utc::now() + chrono::Duration::days(30),
        );
        assert!(sub.is_active());
        assert!(!sub.cancel_at_period_end);
    }

    #[test]
    fn leaderboard_serializes_camel_case() {
        let lb = Leaderboard::new(
            "project".into(),
            "weekly".into(),
            SortOrder::Desc,
            UpdateMode::Best,
        );
        let json = serde_json::to_value(&lb).unwrap();
        assert_eq!(json["projectId"], "project");
        assert_eq!(json["sortOrder"], "desc");
        assert_eq!(json["updateMode"], "best");
    }
}
