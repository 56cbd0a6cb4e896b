use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{info, warn};

use crate::models::*;

/// Postgres connection pool and control-plane persistence.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(2)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .max_lifetime(Duration::from_secs(1800))
            .connect(database_url)
            .await?;

        info!("Database connection pool established");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    // Tenant operations

    pub async fn create_tenant(&self, tenant: &Tenant) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO tenants (id, name, email, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&tenant.id)
        .bind(&tenant.name)
        .bind(&tenant.email)
        .bind(tenant.created_at)
        .execute(&self.pool)
        .await?;

        info!("Created tenant: {}", tenant.id);
        Ok(())
    }

    pub async fn get_tenant(&self, tenant_id: &str) -> Result<Option<Tenant>, sqlx::Error> {
        let row = sqlx::query("SELECT id, name, email, created_at FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| Tenant {
            id: row.get("id"),
            name: row.get("name"),
            email: row.get("email"),
            created_at: row.get("created_at"),
        }))
    }

    /// Deletion cascades to projects, keys, leaderboards, and seasons.
    pub async fn delete_tenant(&self, tenant_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // Project operations

    pub async fn create_project(&self, project: &Project) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO projects (id, tenant_id, name, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&project.id)
        .bind(&project.tenant_id)
        .bind(&project.name)
        .bind(project.created_at)
        .execute(&self.pool)
        .await?;

        info!("Created project {} for tenant {}", project.id, project.tenant_id);
        Ok(())
    }

    pub async fn get_project(&self, project_id: &str) -> Result<Option<Project>, sqlx::Error> {
        let row =
            sqlx::query("SELECT id, tenant_id, name, created_at FROM projects WHERE id = $1")
                .bind(project_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|row| Project {
            id: row.get("id"),
            tenant_id: row.get("tenant_id"),
            name: row.get("name"),
            created_at: row.get("created_at"),
        }))
    }

    // API key operations

    pub async fn create_api_key(&self, key: &ApiKey) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, project_id, name, key_hash, lookup_hash, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&key.id)
        .bind(&key.project_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.lookup_hash)
        .bind(key.created_at)
        .execute(&self.pool)
        .await?;

        info!("Created API key {} for project {}", key.id, key.project_id);
        Ok(())
    }

    pub async fn get_api_key(&self, key_id: &str) -> Result<Option<ApiKey>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, name, key_hash, lookup_hash, last_used_at, revoked_at, created_at
            FROM api_keys WHERE id = $1
            "#,
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_api_key))
    }

    /// Lookup for validation. Filters revoked keys first so the expensive
    /// hash comparison only ever runs against a usable key.
    pub async fn get_usable_key_by_lookup_hash(
        &self,
        lookup_hash: &str,
    ) -> Result<Option<(ApiKey, String)>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT k.id, k.project_id, k.name, k.key_hash, k.lookup_hash,
                   k.last_used_at, k.revoked_at, k.created_at, p.tenant_id
            FROM api_keys k
            JOIN projects p ON p.id = k.project_id
            WHERE k.lookup_hash = $1 AND k.revoked_at IS NULL
            "#,
        )
        .bind(lookup_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let tenant_id: String = row.get("tenant_id");
            (row_to_api_key(row), tenant_id)
        }))
    }

    pub async fn list_api_keys(&self, project_id: &str) -> Result<Vec<ApiKey>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, name, key_hash, lookup_hash, last_used_at, revoked_at, created_at
            FROM api_keys WHERE project_id = $1 ORDER BY created_at DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_api_key).collect())
    }

    /// Marks the key revoked and returns its lookup hash so the caller can
    /// invalidate the auth cache entry.
    pub async fn revoke_api_key(&self, key_id: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE api_keys SET revoked_at = NOW()
            WHERE id = $1 AND revoked_at IS NULL
            RETURNING lookup_hash
            "#,
        )
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;

        if row.is_none() {
            warn!("Revoke requested for missing or already revoked key: {}", key_id);
        }
        Ok(row.map(|r| r.get("lookup_hash")))
    }

    /// Best-effort freshness marker; validation does not depend on it.
    pub async fn touch_api_key(&self, key_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn count_active_api_keys(&self, tenant_id: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM api_keys k
            JOIN projects p ON p.id = k.project_id
            WHERE p.tenant_id = $1 AND k.revoked_at IS NULL
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    // Subscription operations

    pub async fn create_subscription(&self, sub: &Subscription) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (id, tenant_id, plan_type, status, period_start, period_end, cancel_at_period_end, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&sub.id)
        .bind(&sub.tenant_id)
        .bind(sub.plan_type.as_str())
        .bind(sub.status.as_str())
        .bind(sub.period_start)
        .bind(sub.period_end)
        .bind(sub.cancel_at_period_end)
        .bind(sub.created_at)
        .execute(&self.pool)
        .await?;

        info!("Created {} subscription for tenant {}", sub.plan_type.as_str(), sub.tenant_id);
        Ok(())
    }

    pub async fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, plan_type, status, period_start, period_end,
                   cancel_at_period_end, created_at
            FROM subscriptions WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_subscription))
    }

    pub async fn get_active_subscription(
        &self,
        tenant_id: &str,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, plan_type, status, period_start, period_end,
                   cancel_at_period_end, created_at
            FROM subscriptions
            WHERE tenant_id = $1 AND status = 'active'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_subscription))
    }

    pub async fn cancel_subscription(
        &self,
        id: &str,
        at_period_end: bool,
    ) -> Result<Option<Subscription>, sqlx::Error> {
        let row = if at_period_end {
            sqlx::query(
                r#"
                UPDATE subscriptions SET cancel_at_period_end = TRUE
                WHERE id = $1
                RETURNING id, tenant_id, plan_type, status, period_start, period_end,
                          cancel_at_period_end, created_at
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        } else {
            sqlx::query(
                r#"
                UPDATE subscriptions SET status = 'cancelled'
                WHERE id = $1
                RETURNING id, tenant_id, plan_type, status, period_start, period_end,
                          cancel_at_period_end, created_at
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
        };

        Ok(row.map(row_to_subscription))
    }

    // Leaderboard operations

    pub async fn create_leaderboard(&self, lb: &Leaderboard) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO leaderboards
                (id, project_id, name, description, sort_order, update_mode, reset_schedule,
                 ttl_days, is_active, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&lb.id)
        .bind(&lb.project_id)
        .bind(&lb.name)
        .bind(&lb.description)
        .bind(lb.sort_order.as_str())
        .bind(lb.update_mode.as_str())
        .bind(&lb.reset_schedule)
        .bind(lb.ttl_days)
        .bind(lb.is_active)
        .bind(&lb.metadata)
        .bind(lb.created_at)
        .bind(lb.updated_at)
        .execute(&self.pool)
        .await?;

        info!("Created leaderboard {} in project {}", lb.id, lb.project_id);
        Ok(())
    }

    /// Leaderboards are addressable only within their project.
    pub async fn get_leaderboard(
        &self,
        project_id: &str,
        leaderboard_id: &str,
    ) -> Result<Option<Leaderboard>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, project_id, name, description, sort_order, update_mode, reset_schedule,
                   ttl_days, is_active, metadata, created_at, updated_at
            FROM leaderboards WHERE id = $1 AND project_id = $2
            "#,
        )
        .bind(leaderboard_id)
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_leaderboard))
    }

    pub async fn list_leaderboards(
        &self,
        project_id: &str,
    ) -> Result<Vec<Leaderboard>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, name, description, sort_order, update_mode, reset_schedule,
                   ttl_days, is_active, metadata, created_at, updated_at
            FROM leaderboards WHERE project_id = $1 ORDER BY created_at DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_leaderboard).collect())
    }

    pub async fn update_leaderboard(&self, lb: &Leaderboard) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE leaderboards
            SET name = $3, description = $4, sort_order = $5, update_mode = $6,
                reset_schedule = $7, ttl_days = $8, is_active = $9, metadata = $10,
                updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            "#,
        )
        .bind(&lb.id)
        .bind(&lb.project_id)
        .bind(&lb.name)
        .bind(&lb.description)
        .bind(lb.sort_order.as_str())
        .bind(lb.update_mode.as_str())
        .bind(&lb.reset_schedule)
        .bind(lb.ttl_days)
        .bind(lb.is_active)
        .bind(&lb.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete_leaderboard(
        &self,
        project_id: &str,
        leaderboard_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM leaderboards WHERE id = $1 AND project_id = $2")
            .bind(leaderboard_id)
            .bind(project_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn count_leaderboards(&self, tenant_id: &str) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM leaderboards l
            JOIN projects p ON p.id = l.project_id
            WHERE p.tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    // Season operations

    pub async fn create_season(&self, season: &Season) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO seasons (id, leaderboard_id, name, start_date, end_date, is_active, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&season.id)
        .bind(&season.leaderboard_id)
        .bind(&season.name)
        .bind(season.start_date)
        .bind(season.end_date)
        .bind(season.is_active)
        .bind(&season.metadata)
        .bind(season.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_season(&self, season_id: &str) -> Result<Option<Season>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, leaderboard_id, name, start_date, end_date, is_active, metadata, created_at
            FROM seasons WHERE id = $1
            "#,
        )
        .bind(season_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_season))
    }

    pub async fn list_seasons(&self, leaderboard_id: &str) -> Result<Vec<Season>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, leaderboard_id, name, start_date, end_date, is_active, metadata, created_at
            FROM seasons WHERE leaderboard_id = $1 ORDER BY start_date DESC
            "#,
        )
        .bind(leaderboard_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(row_to_season).collect())
    }

    pub async fn set_season_active(
        &self,
        season_id: &str,
        is_active: bool,
    ) -> Result<Option<Season>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            UPDATE seasons SET is_active = $2
            WHERE id = $1
            RETURNING id, leaderboard_id, name, start_date, end_date, is_active, metadata, created_at
            "#,
        )
        .bind(season_id)
        .bind(is_active)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(row_to_season))
    }

    pub async fn delete_season(&self, season_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM seasons WHERE id = $1")
            .bind(season_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // Score event log

    /// Append-only insert. Replayed events with the same id are dropped so
    /// at-least-once delivery never double-counts.
    pub async fn insert_score_event(&self, event: &ScoreEvent) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO score_events
                (id, tenant_id, project_id, leaderboard_id, user_id, score, increment, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&event.id)
        .bind(&event.tenant_id)
        .bind(&event.project_id)
        .bind(&event.leaderboard_id)
        .bind(&event.user_id)
        .bind(event.score)
        .bind(event.increment)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // Usage aggregation

    /// Upsert today's roll-up, adding the deltas. Conflict target is the
    /// (tenant, project, date) primary key. `total_requests` accumulates only
    /// quota-billable requests (score writes), not reads.
    pub async fn record_usage(
        &self,
        tenant_id: &str,
        project_id: &str,
        date: NaiveDate,
        score_updates: i64,
        leaderboard_reads: i64,
        total_requests: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO usage_records
                (tenant_id, project_id, date, score_updates, leaderboard_reads, total_requests)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, project_id, date) DO UPDATE SET
                score_updates = usage_records.score_updates + EXCLUDED.score_updates,
                leaderboard_reads = usage_records.leaderboard_reads + EXCLUDED.leaderboard_reads,
                total_requests = usage_records.total_requests + EXCLUDED.total_requests
            "#,
        )
        .bind(tenant_id)
        .bind(project_id)
        .bind(date)
        .bind(score_updates)
        .bind(leaderboard_reads)
        .bind(total_requests)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Month-to-date sum of quota-billable requests.
    pub async fn month_to_date_requests(
        &self,
        tenant_id: &str,
        month_start: NaiveDate,
    ) -> Result<i64, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(total_requests), 0)::BIGINT AS total
            FROM usage_records
            WHERE tenant_id = $1 AND date >= $2
            "#,
        )
        .bind(tenant_id)
        .bind(month_start)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.get("total"))
    }

    pub async fn usage_for_tenant(
        &self,
        tenant_id: &str,
        since: NaiveDate,
    ) -> Result<Vec<UsageRecord>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, project_id, date, score_updates, leaderboard_reads, total_requests
            FROM usage_records
            WHERE tenant_id = $1 AND date >= $2
            ORDER BY date DESC
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UsageRecord {
                tenant_id: row.get("tenant_id"),
                project_id: row.get("project_id"),
                date: row.get("date"),
                score_updates: row.get("score_updates"),
                leaderboard_reads: row.get("leaderboard_reads"),
                total_requests: row.get("total_requests"),
            })
            .collect())
    }
}

fn row_to_api_key(row: PgRow) -> ApiKey {
    ApiKey {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        key_hash: row.get("key_hash"),
        lookup_hash: row.get("lookup_hash"),
        last_used_at: row.get("last_used_at"),
        revoked_at: row.get("revoked_at"),
        created_at: row.get("created_at"),
    }
}

fn row_to_subscription(row: PgRow) -> Subscription {
    let plan_str: String = row.get("plan_type");
    let status_str: String = row.get("status");
    Subscription {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        plan_type: PlanType::parse(&plan_str).unwrap_or(PlanType::Free),
        status: SubscriptionStatus::parse(&status_str).unwrap_or(SubscriptionStatus::Cancelled),
        period_start: row.get("period_start"),
        period_end: row.get("period_end"),
        cancel_at_period_end: row.get("cancel_at_period_end"),
        created_at: row.get("created_at"),
    }
}

fn row_to_leaderboard(row: PgRow) -> Leaderboard {
    let sort_str: String = row.get("sort_order");
    let mode_str: String = row.get("update_mode");
    Leaderboard {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        description: row.get("description"),
        sort_order: SortOrder::parse(&sort_str).unwrap_or(SortOrder::Desc),
        update_mode: UpdateMode::parse(&mode_str).unwrap_or(UpdateMode::Replace),
        reset_schedule: row.get("reset_schedule"),
        ttl_days: row.get("ttl_days"),
        is_active: row.get("is_active"),
        metadata: row.get::<Value, _>("metadata"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn row_to_season(row: PgRow) -> Season {
    Season {
        id: row.get("id"),
        leaderboard_id: row.get("leaderboard_id"),
        name: row.get("name"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        is_active: row.get("is_active"),
        metadata: row.get::<Value, _>("metadata"),
        created_at: row.get("created_at"),
    }
}
