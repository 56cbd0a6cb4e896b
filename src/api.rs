use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Extension,
};
use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{AuthService, Validation};
use crate::database::Database;
use crate::error::ApiError;
use crate::events::EventPublisher;
use crate::leaderboards::{LeaderboardPatch, LeaderboardService};
use crate::models::*;
use crate::quotas::{QuotaService, UsageCheck};
use crate::rate_limit::RateLimiter;
use crate::scoring::{BatchEntry, BatchUpdateResult, RankResult, ScoreUpdateResult, ScoringEngine, TopResult};
use crate::usage::UsageTracker;

/// Application state shared across handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub auth: AuthService,
    pub limiter: RateLimiter,
    pub usage: UsageTracker,
    pub scoring: ScoringEngine,
    pub leaderboards: LeaderboardService,
    pub quotas: QuotaService,
    pub publisher: EventPublisher,
}

// Scoring plane

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateScoreRequest {
    pub leaderboard_id: String,
    pub user_id: String,
    pub score: f64,
    #[serde(default)]
    pub increment: bool,
}

/// POST /scores
pub async fn update_score(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Json(request): Json<UpdateScoreRequest>,
) -> Result<Json<ScoreUpdateResult>, ApiError> {
    if request.leaderboard_id.is_empty() || request.user_id.is_empty() {
        return Err(ApiError::BadRequest(
            "leaderboardId and userId are required".to_string(),
        ));
    }
    if !request.score.is_finite() {
        return Err(ApiError::BadRequest("score must be a finite number".to_string()));
    }

    // Monthly quota gates writes; reads are only rate-limited.
    state
        .quotas
        .enforce_monthly_request_quota(&context.tenant_id, context.plan_type)
        .await?;

    let result = state
        .scoring
        .update_score(
            &context,
            &request.leaderboard_id,
            &request.user_id,
            request.score,
            request.increment,
        )
        .await?;

    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateRequest {
    pub updates: Vec<BatchEntry>,
}

/// POST /scores/batch-update
pub async fn batch_update_scores(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Json(request): Json<BatchUpdateRequest>,
) -> Result<Json<BatchUpdateResult>, ApiError> {
    if request.updates.is_empty() {
        return Err(ApiError::BadRequest("updates must not be empty".to_string()));
    }
    for entry in &request.updates {
        if entry.leaderboard_id.is_empty() || entry.user_id.is_empty() {
            return Err(ApiError::BadRequest(
                "every update requires leaderboardId and userId".to_string(),
            ));
        }
        if !entry.score.is_finite() {
            return Err(ApiError::BadRequest("score must be a finite number".to_string()));
        }
    }

    state
        .quotas
        .enforce_monthly_request_quota(&context.tenant_id, context.plan_type)
        .await?;

    let result = state.scoring.batch_update(&context, &request.updates).await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct TopQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /leaderboards/:id/top
pub async fn get_top(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(leaderboard_id): Path<String>,
    Query(query): Query<TopQuery>,
) -> Result<Json<TopResult>, ApiError> {
    let result = state
        .scoring
        .top(
            &context,
            &leaderboard_id,
            query.limit.unwrap_or(10),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankQuery {
    pub with_neighbors: Option<bool>,
    pub neighbor_count: Option<i64>,
}

/// GET /leaderboards/:id/rank/:user_id
pub async fn get_rank(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path((leaderboard_id, user_id)): Path<(String, String)>,
    Query(query): Query<RankQuery>,
) -> Result<Json<RankResult>, ApiError> {
    let result = state
        .scoring
        .rank_of(
            &context,
            &leaderboard_id,
            &user_id,
            query.with_neighbors.unwrap_or(false),
            query.neighbor_count.unwrap_or(5),
        )
        .await?;
    Ok(Json(result))
}

// Leaderboard control plane

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLeaderboardRequest {
    pub name: String,
    pub description: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub update_mode: Option<UpdateMode>,
    pub reset_schedule: Option<String>,
    pub ttl_days: Option<i32>,
    pub metadata: Option<Value>,
}

/// POST /leaderboards
pub async fn create_leaderboard(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Json(request): Json<CreateLeaderboardRequest>,
) -> Result<(StatusCode, Json<Leaderboard>), ApiError> {
    if request.name.is_empty() || request.name.len() > 255 {
        return Err(ApiError::BadRequest(
            "name must be between 1 and 255 characters".to_string(),
        ));
    }
    if let Some(ttl_days) = request.ttl_days {
        if ttl_days < 0 {
            return Err(ApiError::BadRequest("ttlDays must be non-negative".to_string()));
        }
    }

    let mut leaderboard = Leaderboard::new(
        context.project_id.clone(),
        request.name,
        request.sort_order.unwrap_or(SortOrder::Desc),
        request.update_mode.unwrap_or(UpdateMode::Replace),
    );
    leaderboard.description = request.description;
    leaderboard.reset_schedule = request.reset_schedule;
    leaderboard.ttl_days = request.ttl_days;
    if let Some(metadata) = request.metadata {
        leaderboard.metadata = metadata;
    }

    let created = state.leaderboards.create(&context, leaderboard).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// GET /leaderboards
pub async fn list_leaderboards(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
) -> Result<Json<Vec<Leaderboard>>, ApiError> {
    Ok(Json(state.leaderboards.list(&context).await?))
}

/// GET /leaderboards/:id
pub async fn get_leaderboard(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(leaderboard_id): Path<String>,
) -> Result<Json<Leaderboard>, ApiError> {
    Ok(Json(state.leaderboards.get(&context, &leaderboard_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateLeaderboardRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub sort_order: Option<SortOrder>,
    pub update_mode: Option<UpdateMode>,
    pub reset_schedule: Option<String>,
    pub ttl_days: Option<i32>,
    pub is_active: Option<bool>,
    pub metadata: Option<Value>,
}

/// PUT /leaderboards/:id
pub async fn update_leaderboard(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(leaderboard_id): Path<String>,
    Json(request): Json<UpdateLeaderboardRequest>,
) -> Result<Json<Leaderboard>, ApiError> {
    if let Some(name) = &request.name {
        if name.is_empty() || name.len() > 255 {
            return Err(ApiError::BadRequest(
                "name must be between 1 and 255 characters".to_string(),
            ));
        }
    }

    let patch = LeaderboardPatch {
        name: request.name,
        description: request.description.map(Some),
        sort_order: request.sort_order,
        update_mode: request.update_mode,
        reset_schedule: request.reset_schedule.map(Some),
        ttl_days: request.ttl_days.map(Some),
        is_active: request.is_active,
        metadata: request.metadata,
    };

    let updated = state
        .leaderboards
        .update(&context, &leaderboard_id, patch)
        .await?;
    Ok(Json(updated))
}

/// DELETE /leaderboards/:id
pub async fn delete_leaderboard(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(leaderboard_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.leaderboards.delete(&context, &leaderboard_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Seasons

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSeasonRequest {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub metadata: Option<Value>,
}

/// POST /leaderboards/:id/seasons
pub async fn create_season(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(leaderboard_id): Path<String>,
    Json(request): Json<CreateSeasonRequest>,
) -> Result<(StatusCode, Json<Season>), ApiError> {
    if request.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }

    let season = state
        .leaderboards
        .create_season(
            &context,
            &leaderboard_id,
            request.name,
            request.start_date,
            request.end_date,
            request.metadata,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(season)))
}

/// GET /leaderboards/:id/seasons
pub async fn list_seasons(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(leaderboard_id): Path<String>,
) -> Result<Json<Vec<Season>>, ApiError> {
    Ok(Json(state.leaderboards.list_seasons(&context, &leaderboard_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSeasonRequest {
    pub is_active: bool,
}

/// PATCH /seasons/:id
pub async fn update_season(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(season_id): Path<String>,
    Json(request): Json<UpdateSeasonRequest>,
) -> Result<Json<Season>, ApiError> {
    let season = state
        .leaderboards
        .set_season_active(&context, &season_id, request.is_active)
        .await?;
    Ok(Json(season))
}

/// DELETE /seasons/:id
pub async fn delete_season(
    State(state): State<AppState>,
    Extension(context): Extension<TenantContext>,
    Path(season_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.leaderboards.delete_season(&context, &season_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// Internal plane: identity

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenantRequest {
    pub name: String,
    pub email: String,
}

/// POST /tenants
pub async fn create_tenant(
    State(state): State<AppState>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    if request.name.is_empty() || request.name.len() > 255 {
        return Err(ApiError::BadRequest(
            "name must be between 1 and 255 characters".to_string(),
        ));
    }
    if !request.email.contains('@') {
        return Err(ApiError::BadRequest("email is not valid".to_string()));
    }

    let tenant = Tenant::new(request.name, request.email);
    state.database.create_tenant(&tenant).await.map_err(|e| {
        match ApiError::from(e) {
            ApiError::Conflict(_) => {
                ApiError::Conflict(format!("email already registered: {}", tenant.email))
            }
            other => other,
        }
    })?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

/// DELETE /tenants/:id
pub async fn delete_tenant(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.database.delete_tenant(&tenant_id).await? {
        return Err(ApiError::NotFound(format!("tenant not found: {tenant_id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub tenant_id: String,
    pub name: String,
}

/// POST /projects
pub async fn create_project(
    State(state): State<AppState>,
    Json(request): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ApiError> {
    if request.name.is_empty() || request.name.len() > 255 {
        return Err(ApiError::BadRequest(
            "name must be between 1 and 255 characters".to_string(),
        ));
    }
    state
        .database
        .get_tenant(&request.tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("tenant not found: {}", request.tenant_id)))?;

    let project = Project::new(request.tenant_id, request.name);
    state.database.create_project(&project).await?;
    Ok((StatusCode::CREATED, Json(project)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyRequest {
    pub project_id: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateApiKeyResponse {
    pub id: String,
    /// Shown exactly once; only hashes are stored.
    pub key: String,
    pub project_id: String,
    pub name: String,
    pub created_at: String,
}

/// POST /api-keys
pub async fn create_api_key(
    State(state): State<AppState>,
    Json(request): Json<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<CreateApiKeyResponse>), ApiError> {
    if request.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    state
        .database
        .get_project(&request.project_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("project not found: {}", request.project_id)))?;

    let (plaintext, key) = state
        .auth
        .create_api_key(request.project_id, request.name)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateApiKeyResponse {
            id: key.id,
            key: plaintext,
            project_id: key.project_id,
            name: key.name,
            created_at: key.created_at.to_rfc3339(),
        }),
    ))
}

/// GET /api-keys/project/:id
pub async fn list_api_keys(
    State(state): State<AppState>,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ApiKey>>, ApiError> {
    Ok(Json(state.auth.list_api_keys(&project_id).await?))
}

/// POST /api-keys/:id/rotate
pub async fn rotate_api_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
) -> Result<Json<CreateApiKeyResponse>, ApiError> {
    let (plaintext, key) = state.auth.rotate_api_key(&key_id).await?;
    Ok(Json(CreateApiKeyResponse {
        id: key.id,
        key: plaintext,
        project_id: key.project_id,
        name: key.name,
        created_at: key.created_at.to_rfc3339(),
    }))
}

/// DELETE /api-keys/:id
pub async fn revoke_api_key(
    State(state): State<AppState>,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.auth.revoke_api_key(&key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub key: String,
}

/// POST /validate
pub async fn validate_api_key(
    State(state): State<AppState>,
    Json(request): Json<ValidateRequest>,
) -> Result<Json<Validation>, ApiError> {
    Ok(Json(state.auth.validate_api_key(&request.key).await?))
}

// Internal plane: subscriptions and usage

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriptionRequest {
    pub tenant_id: String,
    pub plan_type: PlanType,
    pub period_start: Option<DateTime<Utc>>,
    pub period_end: Option<DateTime<Utc>>,
}

/// POST /subscriptions
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<Subscription>), ApiError> {
    state
        .database
        .get_tenant(&request.tenant_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("tenant not found: {}", request.tenant_id)))?;

    let period_start = request.period_start.unwrap_or_else(Utc::now);
    let period_end = request
        .period_end
        .unwrap_or_else(|| period_start + Duration::days(30));
    if period_start >= period_end {
        return Err(ApiError::BadRequest(
            "periodStart must precede periodEnd".to_string(),
        ));
    }

    let subscription = Subscription::new(
        request.tenant_id,
        request.plan_type,
        period_start,
        period_end,
    );
    state.quotas.create_subscription(&subscription).await?;
    Ok((StatusCode::CREATED, Json(subscription)))
}

/// GET /subscriptions/tenant/:id
pub async fn get_tenant_subscription(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Subscription>, ApiError> {
    state
        .quotas
        .get_active_subscription(&tenant_id)
        .await?
        .map(Json)
        .ok_or_else(|| {
            ApiError::NotFound(format!("no active subscription for tenant: {tenant_id}"))
        })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelSubscriptionRequest {
    #[serde(default)]
    pub at_period_end: bool,
}

/// PATCH /subscriptions/:id/cancel
pub async fn cancel_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
    Json(request): Json<CancelSubscriptionRequest>,
) -> Result<Json<Subscription>, ApiError> {
    let subscription = state
        .quotas
        .cancel_subscription(&subscription_id, request.at_period_end)
        .await?;
    Ok(Json(subscription))
}

/// GET /subscriptions/:id/usage-check
pub async fn usage_check(
    State(state): State<AppState>,
    Path(subscription_id): Path<String>,
) -> Result<Json<UsageCheck>, ApiError> {
    Ok(Json(state.quotas.usage_check(&subscription_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageRequest {
    pub tenant_id: String,
    pub project_id: String,
    #[serde(default)]
    pub score_updates: i64,
    #[serde(default)]
    pub leaderboard_reads: i64,
}

/// POST /usage/record
pub async fn record_usage(
    State(state): State<AppState>,
    Json(request): Json<RecordUsageRequest>,
) -> Result<StatusCode, ApiError> {
    if request.score_updates < 0 || request.leaderboard_reads < 0 {
        return Err(ApiError::BadRequest("usage deltas must be non-negative".to_string()));
    }

    state
        .database
        .record_usage(
            &request.tenant_id,
            &request.project_id,
            Utc::now().date_naive(),
            request.score_updates,
            request.leaderboard_reads,
            request.score_updates,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /usage/tenant/:id — current month's roll-ups.
pub async fn get_tenant_usage(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> Result<Json<Vec<UsageRecord>>, ApiError> {
    let today = Utc::now().date_naive();
    let since = today.with_day(1).unwrap_or(today);
    Ok(Json(state.database.usage_for_tenant(&tenant_id, since).await?))
}

// Health

/// GET /health — liveness, no auth.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "services": {
            "stream": if state.publisher.is_connected() { "healthy" } else { "degraded" },
        }
    }))
}
