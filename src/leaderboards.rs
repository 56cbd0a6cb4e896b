use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::info;

use crate::database::Database;
use crate::error::ApiError;
use crate::events::{EventPublisher, LeaderboardCreated, LeaderboardDeleted, SUBJECT_LEADERBOARD_DELETED};
use crate::models::{Leaderboard, Season, SortOrder, TenantContext, UpdateMode};

#[derive(Debug, Clone, Default)]
pub struct LeaderboardPatch {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub sort_order: Option<SortOrder>,
    pub update_mode: Option<UpdateMode>,
    pub reset_schedule: Option<Option<String>>,
    pub ttl_days: Option<Option<i32>>,
    pub is_active: Option<bool>,
    pub metadata: Option<Value>,
}

/// Control-plane CRUD for leaderboards and seasons. Lifecycle events keep
/// the sorted-set metadata coherent: the worker projects `leaderboard.created`
/// into the metadata hash and interprets `leaderboard.deleted` as an
/// instruction to purge both keys.
#[derive(Debug, Clone)]
pub struct LeaderboardService {
    database: Database,
    publisher: EventPublisher,
}

impl LeaderboardService {
    pub fn new(database: Database, publisher: EventPublisher) -> Self {
        Self {
            database,
            publisher,
        }
    }

    pub async fn create(
        &self,
        context: &TenantContext,
        mut leaderboard: Leaderboard,
    ) -> Result<Leaderboard, ApiError> {
        leaderboard.project_id = context.project_id.clone();
        self.database.create_leaderboard(&leaderboard).await.map_err(|e| {
            match ApiError::from(e) {
                ApiError::Conflict(_) => ApiError::Conflict(format!(
                    "leaderboard name already exists in project: {}",
                    leaderboard.name
                )),
                other => other,
            }
        })?;

        self.publisher.publish_leaderboard_created(&LeaderboardCreated::from_leaderboard(
            &context.tenant_id,
            &leaderboard,
        ));

        Ok(leaderboard)
    }

    pub async fn get(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
    ) -> Result<Leaderboard, ApiError> {
        self.database
            .get_leaderboard(&context.project_id, leaderboard_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("leaderboard not found: {leaderboard_id}")))
    }

    pub async fn list(&self, context: &TenantContext) -> Result<Vec<Leaderboard>, ApiError> {
        Ok(self.database.list_leaderboards(&context.project_id).await?)
    }

    /// Apply a partial update. Configuration changes re-emit
    /// `leaderboard.created` so the worker re-syncs the metadata hash; the
    /// projection is an upsert, so replay is harmless.
    pub async fn update(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
        patch: LeaderboardPatch,
    ) -> Result<Leaderboard, ApiError> {
        let mut leaderboard = self.get(context, leaderboard_id).await?;

        if let Some(name) = patch.name {
            leaderboard.name = name;
        }
        if let Some(description) = patch.description {
            leaderboard.description = description;
        }
        if let Some(sort_order) = patch.sort_order {
            leaderboard.sort_order = sort_order;
        }
        if let Some(update_mode) = patch.update_mode {
            leaderboard.update_mode = update_mode;
        }
        if let Some(reset_schedule) = patch.reset_schedule {
            leaderboard.reset_schedule = reset_schedule;
        }
        if let Some(ttl_days) = patch.ttl_days {
            leaderboard.ttl_days = ttl_days;
        }
        if let Some(is_active) = patch.is_active {
            leaderboard.is_active = is_active;
        }
        if let Some(metadata) = patch.metadata {
            leaderboard.metadata = metadata;
        }
        leaderboard.updated_at = Utc::now();

        self.database.update_leaderboard(&leaderboard).await?;

        self.publisher.publish_leaderboard_created(&LeaderboardCreated::from_leaderboard(
            &context.tenant_id,
            &leaderboard,
        ));

        Ok(leaderboard)
    }

    pub async fn delete(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
    ) -> Result<(), ApiError> {
        let leaderboard = self.get(context, leaderboard_id).await?;

        let deleted = self
            .database
            .delete_leaderboard(&context.project_id, leaderboard_id)
            .await?;
        if !deleted {
            return Err(ApiError::NotFound(format!(
                "leaderboard not found: {leaderboard_id}"
            )));
        }

        self.publisher.publish_leaderboard_deleted(&LeaderboardDeleted {
            kind: SUBJECT_LEADERBOARD_DELETED.to_string(),
            leaderboard_id: leaderboard.id,
            project_id: leaderboard.project_id,
            tenant_id: context.tenant_id.clone(),
            name: leaderboard.name,
            timestamp: Utc::now(),
        });

        info!("Deleted leaderboard {} in project {}", leaderboard_id, context.project_id);
        Ok(())
    }

    // Seasons: control-plane windows with no sorted-set side effects.

    pub async fn create_season(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
        name: String,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        metadata: Option<Value>,
    ) -> Result<Season, ApiError> {
        if start_date >= end_date {
            return Err(ApiError::BadRequest(
                "season startDate must precede endDate".to_string(),
            ));
        }

        // Ensure the leaderboard is addressable within this tenant's project.
        self.get(context, leaderboard_id).await?;

        let mut season = Season::new(leaderboard_id.to_string(), name, start_date, end_date);
        if let Some(metadata) = metadata {
            season.metadata = metadata;
        }

        self.database.create_season(&season).await?;
        Ok(season)
    }

    pub async fn list_seasons(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
    ) -> Result<Vec<Season>, ApiError> {
        self.get(context, leaderboard_id).await?;
        Ok(self.database.list_seasons(leaderboard_id).await?)
    }

    pub async fn set_season_active(
        &self,
        context: &TenantContext,
        season_id: &str,
        is_active: bool,
    ) -> Result<Season, ApiError> {
        self.season_scoped(context, season_id).await?;
        self.database
            .set_season_active(season_id, is_active)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("season not found: {season_id}")))
    }

    pub async fn delete_season(
        &self,
        context: &TenantContext,
        season_id: &str,
    ) -> Result<(), ApiError> {
        self.season_scoped(context, season_id).await?;
        let deleted = self.database.delete_season(season_id).await?;
        if !deleted {
            return Err(ApiError::NotFound(format!("season not found: {season_id}")));
        }
        Ok(())
    }

    /// A season is addressable only through a leaderboard in the caller's
    /// project.
    async fn season_scoped(
        &self,
        context: &TenantContext,
        season_id: &str,
    ) -> Result<Season, ApiError> {
        let season = self
            .database
            .get_season(season_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("season not found: {season_id}")))?;
        self.get(context, &season.leaderboard_id).await?;
        Ok(season)
    }
}
