use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use chrono::{Timelike, Utc};
use std::time::Duration;
use tracing::warn;

use crate::database::Database;
use crate::models::TenantContext;
use crate::store::{usage_key, usage_project_key, ScoreStore};

/// What a tenanted request counts as in the daily roll-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    ScoreUpdate,
    LeaderboardRead,
    Other,
}

impl RequestKind {
    pub fn classify(method: &Method, path: &str) -> Self {
        if method == Method::POST && path.starts_with("/scores") {
            RequestKind::ScoreUpdate
        } else if method == Method::GET && path.starts_with("/leaderboards") {
            RequestKind::LeaderboardRead
        } else {
            RequestKind::Other
        }
    }
}

/// Usage accounting: fast counters in the shared cache plus the durable daily
/// roll-up in Postgres. Recording runs on a detached task with its own
/// deadline so a disconnecting client never loses the increment and the hot
/// path never waits on it.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    database: Database,
    store: ScoreStore,
    retention_secs: i64,
    op_timeout: Duration,
}

impl UsageTracker {
    pub fn new(
        database: Database,
        store: ScoreStore,
        retention_days: u32,
        op_timeout_secs: u64,
    ) -> Self {
        Self {
            database,
            store,
            retention_secs: i64::from(retention_days) * 86_400,
            op_timeout: Duration::from_secs(op_timeout_secs),
        }
    }

    pub fn record(&self, context: &TenantContext, kind: RequestKind) {
        let tracker = self.clone();
        let tenant_id = context.tenant_id.clone();
        let project_id = context.project_id.clone();

        tokio::spawn(async move {
            let fut = tracker.record_inner(&tenant_id, &project_id, kind);
            if let Err(e) = tokio::time::timeout(tracker.op_timeout, fut).await {
                warn!("Usage accounting timed out for tenant {tenant_id}: {e}");
            }
        });
    }

    async fn record_inner(&self, tenant_id: &str, project_id: &str, kind: RequestKind) {
        let now = Utc::now();
        let date = now.format("%Y-%m-%d").to_string();

        let counters = self
            .store
            .incr_usage_counters(
                &usage_key(tenant_id, &date),
                &usage_project_key(tenant_id, project_id, &date),
                now.hour(),
                self.retention_secs,
            )
            .await;
        if let Err(e) = counters {
            warn!("Usage counter increment failed for tenant {tenant_id}: {e}");
        }

        let (score_updates, leaderboard_reads) = match kind {
            RequestKind::ScoreUpdate => (1, 0),
            RequestKind::LeaderboardRead => (0, 1),
            RequestKind::Other => (0, 0),
        };

        // Only score writes consume the monthly request budget. Reads and
        // control-plane calls are tracked in their own columns and in the
        // cache counters, but must never erode the write quota.
        let upsert = self
            .database
            .record_usage(
                tenant_id,
                project_id,
                now.date_naive(),
                score_updates,
                leaderboard_reads,
                score_updates,
            )
            .await;
        if let Err(e) = upsert {
            warn!("Usage roll-up upsert failed for tenant {tenant_id}: {e}");
        }
    }
}

/// Gateway middleware: after the response is produced, account the request
/// for every tenanted, non-error outcome.
pub async fn usage_middleware(
    State(tracker): State<UsageTracker>,
    request: Request,
    next: Next,
) -> Response {
    let context = request.extensions().get::<TenantContext>().cloned();
    let kind = RequestKind::classify(request.method(), request.uri().path());

    let response = next.run(request).await;

    if let Some(context) = context {
        if !response.status().is_client_error() && !response.status().is_server_error() {
            tracker.record(&context, kind);
        }
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_score_writes() {
        assert_eq!(
            RequestKind::classify(&Method::POST, "/scores"),
            RequestKind::ScoreUpdate
        );
        assert_eq!(
            RequestKind::classify(&Method::POST, "/scores/batch-update"),
            RequestKind::ScoreUpdate
        );
    }

    #[test]
    fn classifies_leaderboard_reads() {
        assert_eq!(
            RequestKind::classify(&Method::GET, "/leaderboards/abc/top"),
            RequestKind::LeaderboardRead
        );
        assert_eq!(
            RequestKind::classify(&Method::GET, "/leaderboards/abc/rank/u1"),
            RequestKind::LeaderboardRead
        );
    }

    #[test]
    fn control_plane_writes_are_other() {
        assert_eq!(
            RequestKind::classify(&Method::POST, "/leaderboards"),
            RequestKind::Other
        );
        assert_eq!(
            RequestKind::classify(&Method::DELETE, "/leaderboards/abc"),
            RequestKind::Other
        );
    }
}
