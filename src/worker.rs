use anyhow::{anyhow, Result};
use async_nats::jetstream::{
    consumer::pull::Config as ConsumerConfig, AckKind, Context as JetStreamContext,
};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::database::Database;
use crate::events::{
    LeaderboardCreated, LeaderboardDeleted, ScoreUpdated, SUBJECT_LEADERBOARD_CREATED,
    SUBJECT_LEADERBOARD_DELETED, SUBJECT_SCORE_UPDATED,
};
use crate::models::ScoreEvent;
use crate::store::{meta_key, score_key, ScoreStore};

/// Projection worker: one durable pull consumer per subject, subjects
/// processed concurrently. Handlers are idempotent, so at-least-once
/// redelivery after a NAK is safe.
#[derive(Debug, Clone)]
pub struct Worker {
    jetstream: JetStreamContext,
    stream_name: String,
    database: Database,
    store: ScoreStore,
}

pub struct WorkerHandle {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn shutdown(self) {
        for handle in self.handles {
            handle.abort();
        }
        info!("Worker consumers stopped");
    }
}

impl Worker {
    pub fn new(
        jetstream: JetStreamContext,
        stream_name: String,
        database: Database,
        store: ScoreStore,
    ) -> Self {
        Self {
            jetstream,
            stream_name,
            database,
            store,
        }
    }

    /// Spawn the consumer loops. Each loop re-establishes its consumer after
    /// transient broker failures.
    pub fn start(self) -> WorkerHandle {
        let subjects = [
            SUBJECT_SCORE_UPDATED,
            SUBJECT_LEADERBOARD_CREATED,
            SUBJECT_LEADERBOARD_DELETED,
        ];

        let handles = subjects
            .into_iter()
            .map(|subject| {
                let worker = self.clone();
                tokio::spawn(async move {
                    loop {
                        if let Err(e) = worker.consume_subject(subject).await {
                            error!("Consumer for '{subject}' failed, restarting: {e}");
                        }
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                })
            })
            .collect();

        info!("Worker started with durable consumers for {} subjects", subjects.len());
        WorkerHandle { handles }
    }

    async fn consume_subject(&self, subject: &str) -> Result<()> {
        let durable_name = format!("podium-worker-{}", subject.replace('.', "-"));

        let stream = self.jetstream.get_stream(&self.stream_name).await?;
        let consumer = stream
            .create_consumer(ConsumerConfig {
                durable_name: Some(durable_name.clone()),
                filter_subject: subject.to_string(),
                ..Default::default()
            })
            .await?;

        let mut messages = consumer.messages().await?;
        info!("Consumer '{durable_name}' attached");

        while let Some(message) = messages.next().await {
            let message = match message {
                Ok(message) => message,
                Err(e) => {
                    warn!("Message receive error on '{subject}': {e}");
                    continue;
                }
            };

            match self.dispatch(subject, &message.payload).await {
                Ok(()) => {
                    if let Err(e) = message.ack().await {
                        warn!("Failed to ack message on '{subject}': {e}");
                    }
                }
                Err(e) => {
                    // NAK so the broker redelivers; the handler tolerates
                    // the replay.
                    error!("Handler error on '{subject}', requesting redelivery: {e}");
                    if let Err(e) = message.ack_with(AckKind::Nak(None)).await {
                        warn!("Failed to NAK message on '{subject}': {e}");
                    }
                }
            }
        }

        Err(anyhow!("message stream for '{subject}' ended"))
    }

    async fn dispatch(&self, subject: &str, payload: &[u8]) -> Result<()> {
        match subject {
            SUBJECT_SCORE_UPDATED => self.on_score_updated(payload).await,
            SUBJECT_LEADERBOARD_CREATED => self.on_leaderboard_created(payload).await,
            SUBJECT_LEADERBOARD_DELETED => self.on_leaderboard_deleted(payload).await,
            other => Err(anyhow!("unexpected subject: {other}")),
        }
    }

    /// Project a score submission into the append-only log. The insert
    /// ignores duplicate event ids, so redelivery never double-counts.
    async fn on_score_updated(&self, payload: &[u8]) -> Result<()> {
        let event: ScoreUpdated = serde_json::from_slice(payload)?;

        let row = ScoreEvent {
            id: event.event_id,
            tenant_id: event.tenant_id,
            project_id: event.project_id,
            leaderboard_id: event.leaderboard_id,
            user_id: event.user_id,
            score: event.score,
            increment: event.increment,
            created_at: event.timestamp,
        };

        self.database.insert_score_event(&row).await?;
        Ok(())
    }

    /// Upsert the metadata hash. The hash must persist without TTL; only the
    /// score set expires.
    async fn on_leaderboard_created(&self, payload: &[u8]) -> Result<()> {
        let event: LeaderboardCreated = serde_json::from_slice(payload)?;

        let key = meta_key(&event.tenant_id, &event.project_id, &event.leaderboard_id);
        let ttl_days = event.ttl_days.unwrap_or(0).to_string();
        let fields = [
            ("name", event.name.clone()),
            ("projectId", event.project_id.clone()),
            ("tenantId", event.tenant_id.clone()),
            ("createdAt", event.timestamp.to_rfc3339()),
            ("ttlDays", ttl_days),
            ("updateMode", event.update_mode.as_str().to_string()),
            ("sortOrder", event.sort_order.as_str().to_string()),
        ];

        self.store.write_leaderboard_meta(&key, &fields).await?;
        info!("Projected metadata for leaderboard {}", event.leaderboard_id);
        Ok(())
    }

    /// Purge the sorted set and its metadata hash.
    async fn on_leaderboard_deleted(&self, payload: &[u8]) -> Result<()> {
        let event: LeaderboardDeleted = serde_json::from_slice(payload)?;

        let skey = score_key(&event.tenant_id, &event.project_id, &event.leaderboard_id);
        let mkey = meta_key(&event.tenant_id, &event.project_id, &event.leaderboard_id);
        self.store.delete_leaderboard_keys(&skey, &mkey).await?;

        info!("Purged keys for deleted leaderboard {}", event.leaderboard_id);
        Ok(())
    }
}
