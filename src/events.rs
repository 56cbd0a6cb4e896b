use anyhow::{anyhow, Result};
use async_nats::jetstream::{
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    Context as JetStreamContext,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info};

use crate::models::{Leaderboard, SortOrder, UpdateMode};

pub const SUBJECT_SCORE_UPDATED: &str = "score.updated";
pub const SUBJECT_LEADERBOARD_CREATED: &str = "leaderboard.created";
pub const SUBJECT_LEADERBOARD_DELETED: &str = "leaderboard.deleted";

/// Score submission event. Carries the submitted score and increment flag,
/// not the post-update absolute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdated {
    pub event_id: String,
    pub tenant_id: String,
    pub project_id: String,
    pub leaderboard_id: String,
    pub user_id: String,
    pub score: f64,
    pub increment: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardCreated {
    #[serde(rename = "type")]
    pub kind: String,
    pub leaderboard_id: String,
    pub project_id: String,
    pub tenant_id: String,
    pub name: String,
    pub sort_order: SortOrder,
    pub update_mode: UpdateMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_days: Option<i32>,
    pub timestamp: DateTime<Utc>,
}

impl LeaderboardCreated {
    pub fn from_leaderboard(tenant_id: &str, lb: &Leaderboard) -> Self {
        Self {
            kind: SUBJECT_LEADERBOARD_CREATED.to_string(),
            leaderboard_id: lb.id.clone(),
            project_id: lb.project_id.clone(),
            tenant_id: tenant_id.to_string(),
            name: lb.name.clone(),
            sort_order: lb.sort_order,
            update_mode: lb.update_mode,
            ttl_days: lb.ttl_days,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardDeleted {
    #[serde(rename = "type")]
    pub kind: String,
    pub leaderboard_id: String,
    pub project_id: String,
    pub tenant_id: String,
    pub name: String,
    pub timestamp: DateTime<Utc>,
}

/// JetStream publisher. Lifecycle and score events go through here with
/// at-least-once semantics; the sorted set remains the source of truth for
/// real-time ranking, so publish failures are logged and never fail the
/// originating request.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    client: async_nats::Client,
    jetstream: JetStreamContext,
    stream_name: String,
    publish_timeout: Duration,
}

impl EventPublisher {
    pub async fn connect(
        url: &str,
        stream_name: String,
        publish_timeout_secs: u64,
    ) -> Result<Self> {
        let client = async_nats::connect(url).await?;
        let jetstream = async_nats::jetstream::new(client.clone());

        let publisher = Self {
            client,
            jetstream,
            stream_name: stream_name.clone(),
            publish_timeout: Duration::from_secs(publish_timeout_secs),
        };
        publisher.initialize_stream().await?;

        info!("Event stream '{}' initialized", stream_name);
        Ok(publisher)
    }

    async fn initialize_stream(&self) -> Result<()> {
        let stream_config = StreamConfig {
            name: self.stream_name.clone(),
            subjects: vec!["score.>".to_string(), "leaderboard.>".to_string()],
            retention: RetentionPolicy::Limits,
            storage: StorageType::File,
            max_age: Duration::from_secs(30 * 24 * 60 * 60),
            ..Default::default()
        };

        self.jetstream
            .get_or_create_stream(stream_config)
            .await
            .map_err(|e| anyhow!("failed to initialize event stream: {e}"))?;
        Ok(())
    }

    pub fn jetstream(&self) -> &JetStreamContext {
        &self.jetstream
    }

    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Publish on a detached task with its own deadline, independent of the
    /// client context: an early client disconnect must not lose the event.
    fn publish_detached(&self, subject: &'static str, payload: Vec<u8>) {
        let jetstream = self.jetstream.clone();
        let timeout = self.publish_timeout;
        tokio::spawn(async move {
            let publish = async {
                let ack = jetstream.publish(subject, payload.into()).await?;
                ack.await?;
                Ok::<_, anyhow::Error>(())
            };
            match tokio::time::timeout(timeout, publish).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Event publish to '{subject}' failed: {e}"),
                Err(_) => error!("Event publish to '{subject}' timed out"),
            }
        });
    }

    pub fn publish_score_updated(&self, event: &ScoreUpdated) {
        match serde_json::to_vec(event) {
            Ok(payload) => self.publish_detached(SUBJECT_SCORE_UPDATED, payload),
            Err(e) => error!("Failed to serialize score.updated event: {e}"),
        }
    }

    pub fn publish_leaderboard_created(&self, event: &LeaderboardCreated) {
        match serde_json::to_vec(event) {
            Ok(payload) => self.publish_detached(SUBJECT_LEADERBOARD_CREATED, payload),
            Err(e) => error!("Failed to serialize leaderboard.created event: {e}"),
        }
    }

    pub fn publish_leaderboard_deleted(&self, event: &LeaderboardDeleted) {
        match serde_json::to_vec(event) {
            Ok(payload) => self.publish_detached(SUBJECT_LEADERBOARD_DELETED, payload),
            Err(e) => error!("Failed to serialize leaderboard.deleted event: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_updated_serializes_camel_case() {
        let event = ScoreUpdated {
            event_id: "e1".into(),
            tenant_id: "t1".into(),
            project_id: "p1".into(),
            leaderboard_id: "lb1".into(),
            user_id: "alice".into(),
            score: 42.0,
            increment: false,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["tenantId"], "t1");
        assert_eq!(json["leaderboardId"], "lb1");
        assert_eq!(json["userId"], "alice");
        assert_eq!(json["increment"], false);
    }

    #[test]
    fn lifecycle_events_carry_a_type_tag() {
        let deleted = LeaderboardDeleted {
            kind: SUBJECT_LEADERBOARD_DELETED.to_string(),
            leaderboard_id: "lb1".into(),
            project_id: "p1".into(),
            tenant_id: "t1".into(),
            name: "weekly".into(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&deleted).unwrap();
        assert_eq!(json["type"], "leaderboard.deleted");
        assert_eq!(json["name"], "weekly");
    }
}
