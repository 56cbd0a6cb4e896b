use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::ApiError;
use crate::events::{EventPublisher, ScoreUpdated};
use crate::models::{SortOrder, TenantContext, UpdateMode};
use crate::store::{meta_key, score_key, ScoreStore, ScoreWrite, WriteOp};

pub const MAX_TOP_LIMIT: i64 = 100;
pub const MAX_NEIGHBOR_COUNT: i64 = 10;
pub const MAX_BATCH_SIZE: usize = 100;

/// What an incoming score does to the stored member score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WriteDecision {
    Set(f64),
    Incr(f64),
    Skip,
}

/// Pure decision function for the three update modes. Best-mode ties keep
/// the stored score (no write).
pub fn apply(
    mode: UpdateMode,
    sort_order: SortOrder,
    current: Option<f64>,
    incoming: f64,
) -> WriteDecision {
    match mode {
        UpdateMode::Replace => WriteDecision::Set(incoming),
        UpdateMode::Increment => WriteDecision::Incr(incoming),
        UpdateMode::Best => match current {
            None => WriteDecision::Set(incoming),
            Some(current) => {
                let better = match sort_order {
                    SortOrder::Desc => incoming > current,
                    SortOrder::Asc => incoming < current,
                };
                if better {
                    WriteDecision::Set(incoming)
                } else {
                    WriteDecision::Skip
                }
            }
        },
    }
}

/// Fold one decision into the running view of a member's score so later
/// entries in the same batch see earlier intra-batch writes instead of the
/// pre-batch snapshot.
fn fold_decision(current: Option<f64>, decision: WriteDecision) -> Option<f64> {
    match decision {
        WriteDecision::Set(value) => Some(value),
        WriteDecision::Incr(delta) => Some(current.unwrap_or(0.0) + delta),
        WriteDecision::Skip => current,
    }
}

/// Leaderboard configuration read from the metadata hash, with defaults for
/// leaderboards whose hash has not been projected yet.
#[derive(Debug, Clone, Copy)]
pub struct LeaderboardMeta {
    pub update_mode: UpdateMode,
    pub sort_order: SortOrder,
    pub ttl_days: i64,
}

impl Default for LeaderboardMeta {
    fn default() -> Self {
        Self {
            update_mode: UpdateMode::Replace,
            sort_order: SortOrder::Desc,
            ttl_days: 0,
        }
    }
}

impl LeaderboardMeta {
    pub fn from_hash(fields: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            update_mode: fields
                .get("updateMode")
                .and_then(|s| UpdateMode::parse(s))
                .unwrap_or(defaults.update_mode),
            sort_order: fields
                .get("sortOrder")
                .and_then(|s| SortOrder::parse(s))
                .unwrap_or(defaults.sort_order),
            ttl_days: fields
                .get("ttlDays")
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchEntry {
    pub leaderboard_id: String,
    pub user_id: String,
    pub score: f64,
    #[serde(default)]
    pub increment: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdateResult {
    pub leaderboard_id: String,
    pub user_id: String,
    pub score: f64,
    pub rank: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchUpdateResult {
    pub processed: usize,
    pub written: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedEntry {
    pub rank: i64,
    pub user_id: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopResult {
    pub entries: Vec<RankedEntry>,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbors {
    pub above: Vec<RankedEntry>,
    pub below: Vec<RankedEntry>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankResult {
    pub rank: Option<i64>,
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub neighbors: Option<Neighbors>,
}

/// Sorted-set scoring engine: atomic score updates, ranking queries, TTL
/// management, and event emission.
#[derive(Debug, Clone)]
pub struct ScoringEngine {
    store: ScoreStore,
    publisher: EventPublisher,
}

impl ScoringEngine {
    pub fn new(store: ScoreStore, publisher: EventPublisher) -> Self {
        Self { store, publisher }
    }

    async fn leaderboard_meta(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
    ) -> Result<LeaderboardMeta, ApiError> {
        let key = meta_key(&context.tenant_id, &context.project_id, leaderboard_id);
        let fields = self.store.read_leaderboard_meta(&key).await?;
        if fields.is_empty() {
            return Ok(LeaderboardMeta::default());
        }
        Ok(LeaderboardMeta::from_hash(&fields))
    }

    /// Apply one score submission and read back the committed score and
    /// 1-based rank. Best-mode read-then-write is not atomic across clients;
    /// near-concurrent bests converge once both writes commit.
    pub async fn update_score(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
        user_id: &str,
        score: f64,
        increment: bool,
    ) -> Result<ScoreUpdateResult, ApiError> {
        let meta = self.leaderboard_meta(context, leaderboard_id).await?;
        let mode = if increment {
            UpdateMode::Increment
        } else {
            meta.update_mode
        };

        let key = score_key(&context.tenant_id, &context.project_id, leaderboard_id);

        let current = if mode == UpdateMode::Best {
            self.store.member_score(&key, user_id).await?
        } else {
            None
        };

        match apply(mode, meta.sort_order, current, score) {
            WriteDecision::Set(value) => self.store.set_member_score(&key, user_id, value).await?,
            WriteDecision::Incr(delta) => {
                self.store.incr_member_score(&key, user_id, delta).await?;
            }
            WriteDecision::Skip => {
                debug!(leaderboard_id, user_id, "best-mode submission kept stored score");
            }
        }

        if meta.ttl_days > 0 {
            self.store.arm_expiry(&key, meta.ttl_days * 86_400).await?;
        }

        let final_score = self.store.member_score(&key, user_id).await?.unwrap_or(score);
        let rank = self
            .store
            .member_rank(&key, user_id, meta.sort_order)
            .await?
            .map(|r| r + 1);

        self.publisher.publish_score_updated(&ScoreUpdated {
            event_id: Uuid::new_v4().to_string(),
            tenant_id: context.tenant_id.clone(),
            project_id: context.project_id.clone(),
            leaderboard_id: leaderboard_id.to_string(),
            user_id: user_id.to_string(),
            score,
            increment,
            timestamp: chrono::Utc::now(),
        });

        Ok(ScoreUpdateResult {
            leaderboard_id: leaderboard_id.to_string(),
            user_id: user_id.to_string(),
            score: final_score,
            rank,
        })
    }

    /// Batch submission: metadata fetched once per distinct leaderboard,
    /// best-mode scores pre-read in bulk, then one pipelined transaction for
    /// all writes plus one TTL re-arm per distinct leaderboard. A member
    /// repeated within the batch is judged against the batch's running score,
    /// so the outcome matches the same submissions applied sequentially.
    /// Events are emitted individually.
    pub async fn batch_update(
        &self,
        context: &TenantContext,
        entries: &[BatchEntry],
    ) -> Result<BatchUpdateResult, ApiError> {
        if entries.is_empty() {
            return Ok(BatchUpdateResult {
                processed: 0,
                written: 0,
            });
        }
        if entries.len() > MAX_BATCH_SIZE {
            return Err(ApiError::BadRequest(format!(
                "batch size {} exceeds limit {MAX_BATCH_SIZE}",
                entries.len()
            )));
        }

        // Group by leaderboard so metadata is fetched once per distinct board.
        let mut by_leaderboard: HashMap<&str, Vec<&BatchEntry>> = HashMap::new();
        for entry in entries {
            by_leaderboard
                .entry(entry.leaderboard_id.as_str())
                .or_default()
                .push(entry);
        }

        let mut writes: Vec<ScoreWrite> = Vec::with_capacity(entries.len());
        let mut expiries: Vec<(String, i64)> = Vec::new();

        for (leaderboard_id, group) in &by_leaderboard {
            let meta = self.leaderboard_meta(context, leaderboard_id).await?;
            let key = score_key(&context.tenant_id, &context.project_id, leaderboard_id);

            // Pre-read current scores only for entries resolving to best mode.
            let best_members: Vec<String> = group
                .iter()
                .filter(|e| !e.increment && meta.update_mode == UpdateMode::Best)
                .map(|e| e.user_id.clone())
                .collect();
            let best_scores = self.store.member_scores(&key, &best_members).await?;
            let mut current_by_member: HashMap<&str, Option<f64>> = best_members
                .iter()
                .map(String::as_str)
                .zip(best_scores)
                .collect();

            for entry in group {
                let mode = if entry.increment {
                    UpdateMode::Increment
                } else {
                    meta.update_mode
                };
                let current = current_by_member
                    .get(entry.user_id.as_str())
                    .copied()
                    .flatten();
                let decision = apply(mode, meta.sort_order, current, entry.score);
                match decision {
                    WriteDecision::Set(value) => writes.push(ScoreWrite {
                        key: key.clone(),
                        member: entry.user_id.clone(),
                        op: WriteOp::Set(value),
                    }),
                    WriteDecision::Incr(delta) => writes.push(ScoreWrite {
                        key: key.clone(),
                        member: entry.user_id.clone(),
                        op: WriteOp::Incr(delta),
                    }),
                    WriteDecision::Skip => {}
                }
                // Keep the running score current: a repeated member in the
                // same batch must be judged against the batch's own writes.
                current_by_member.insert(entry.user_id.as_str(), fold_decision(current, decision));
            }

            if meta.ttl_days > 0 {
                expiries.push((key, meta.ttl_days * 86_400));
            }
        }

        let written = writes.len();
        self.store.apply_batch(&writes, &expiries).await?;

        for entry in entries {
            self.publisher.publish_score_updated(&ScoreUpdated {
                event_id: Uuid::new_v4().to_string(),
                tenant_id: context.tenant_id.clone(),
                project_id: context.project_id.clone(),
                leaderboard_id: entry.leaderboard_id.clone(),
                user_id: entry.user_id.clone(),
                score: entry.score,
                increment: entry.increment,
                timestamp: chrono::Utc::now(),
            });
        }

        Ok(BatchUpdateResult {
            processed: entries.len(),
            written,
        })
    }

    /// Top-N page in ranking order. Ranks are 1-based and continuous from
    /// `offset + 1`.
    pub async fn top(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<TopResult, ApiError> {
        if !(1..=MAX_TOP_LIMIT).contains(&limit) {
            return Err(ApiError::BadRequest(format!(
                "limit must be between 1 and {MAX_TOP_LIMIT}"
            )));
        }
        if offset < 0 {
            return Err(ApiError::BadRequest("offset must be non-negative".to_string()));
        }

        let meta = self.leaderboard_meta(context, leaderboard_id).await?;
        let key = score_key(&context.tenant_id, &context.project_id, leaderboard_id);

        let members = self
            .store
            .range_with_scores(&key, meta.sort_order, offset, offset + limit - 1)
            .await?;
        let total = self.store.card(&key).await?;

        let entries = members
            .into_iter()
            .enumerate()
            .map(|(i, (user_id, score))| RankedEntry {
                rank: offset + i as i64 + 1,
                user_id,
                score,
            })
            .collect();

        Ok(TopResult { entries, total })
    }

    /// Rank lookup with optional neighbors. A missing member yields null
    /// rank and score, never an error.
    pub async fn rank_of(
        &self,
        context: &TenantContext,
        leaderboard_id: &str,
        user_id: &str,
        with_neighbors: bool,
        neighbor_count: i64,
    ) -> Result<RankResult, ApiError> {
        if !(1..=MAX_NEIGHBOR_COUNT).contains(&neighbor_count) {
            return Err(ApiError::BadRequest(format!(
                "neighborCount must be between 1 and {MAX_NEIGHBOR_COUNT}"
            )));
        }

        let meta = self.leaderboard_meta(context, leaderboard_id).await?;
        let key = score_key(&context.tenant_id, &context.project_id, leaderboard_id);

        let Some(rank0) = self.store.member_rank(&key, user_id, meta.sort_order).await? else {
            return Ok(RankResult {
                rank: None,
                score: None,
                neighbors: None,
            });
        };
        let score = self.store.member_score(&key, user_id).await?;

        let neighbors = if with_neighbors {
            let above = if rank0 > 0 {
                let start = (rank0 - neighbor_count).max(0);
                self.store
                    .range_with_scores(&key, meta.sort_order, start, rank0 - 1)
                    .await?
                    .into_iter()
                    .enumerate()
                    .map(|(i, (user_id, score))| RankedEntry {
                        rank: start + i as i64 + 1,
                        user_id,
                        score,
                    })
                    .collect()
            } else {
                Vec::new()
            };

            let below = self
                .store
                .range_with_scores(&key, meta.sort_order, rank0 + 1, rank0 + neighbor_count)
                .await?
                .into_iter()
                .enumerate()
                .map(|(i, (user_id, score))| RankedEntry {
                    rank: rank0 + i as i64 + 2,
                    user_id,
                    score,
                })
                .collect();

            Some(Neighbors { above, below })
        } else {
            None
        };

        Ok(RankResult {
            rank: Some(rank0 + 1),
            score,
            neighbors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replace_always_sets() {
        assert_eq!(
            apply(UpdateMode::Replace, SortOrder::Desc, Some(90.0), 10.0),
            WriteDecision::Set(10.0)
        );
        assert_eq!(
            apply(UpdateMode::Replace, SortOrder::Asc, None, 10.0),
            WriteDecision::Set(10.0)
        );
    }

    #[test]
    fn increment_always_adds() {
        assert_eq!(
            apply(UpdateMode::Increment, SortOrder::Desc, Some(5.0), 10.0),
            WriteDecision::Incr(10.0)
        );
        assert_eq!(
            apply(UpdateMode::Increment, SortOrder::Desc, None, -3.0),
            WriteDecision::Incr(-3.0)
        );
    }

    #[test]
    fn best_desc_keeps_the_maximum() {
        assert_eq!(
            apply(UpdateMode::Best, SortOrder::Desc, None, 50.0),
            WriteDecision::Set(50.0)
        );
        assert_eq!(
            apply(UpdateMode::Best, SortOrder::Desc, Some(50.0), 30.0),
            WriteDecision::Skip
        );
        assert_eq!(
            apply(UpdateMode::Best, SortOrder::Desc, Some(50.0), 80.0),
            WriteDecision::Set(80.0)
        );
    }

    #[test]
    fn best_asc_keeps_the_minimum() {
        assert_eq!(
            apply(UpdateMode::Best, SortOrder::Asc, Some(50.0), 30.0),
            WriteDecision::Set(30.0)
        );
        assert_eq!(
            apply(UpdateMode::Best, SortOrder::Asc, Some(50.0), 80.0),
            WriteDecision::Skip
        );
    }

    #[test]
    fn best_tie_is_not_a_write() {
        assert_eq!(
            apply(UpdateMode::Best, SortOrder::Desc, Some(50.0), 50.0),
            WriteDecision::Skip
        );
        assert_eq!(
            apply(UpdateMode::Best, SortOrder::Asc, Some(50.0), 50.0),
            WriteDecision::Skip
        );
    }

    #[test]
    fn fold_decision_tracks_each_operation() {
        assert_eq!(fold_decision(None, WriteDecision::Set(5.0)), Some(5.0));
        assert_eq!(fold_decision(Some(2.0), WriteDecision::Incr(3.0)), Some(5.0));
        assert_eq!(fold_decision(None, WriteDecision::Incr(3.0)), Some(3.0));
        assert_eq!(fold_decision(Some(7.0), WriteDecision::Skip), Some(7.0));
    }

    #[test]
    fn repeated_best_member_folds_through_the_batch() {
        // Stored score 50 on a best/desc board; one batch submits 80 then 60.
        // The second entry must lose to the batch's own 80, not to the stale
        // pre-batch 50.
        let mut current = Some(50.0);
        let mut writes = Vec::new();
        for incoming in [80.0, 60.0] {
            let decision = apply(UpdateMode::Best, SortOrder::Desc, current, incoming);
            if decision != WriteDecision::Skip {
                writes.push(decision);
            }
            current = fold_decision(current, decision);
        }
        assert_eq!(writes, vec![WriteDecision::Set(80.0)]);
        assert_eq!(current, Some(80.0));
    }

    #[test]
    fn repeated_increment_member_accumulates_through_the_batch() {
        let mut current: Option<f64> = None;
        for incoming in [10.0, 5.0] {
            let decision = apply(UpdateMode::Increment, SortOrder::Desc, current, incoming);
            current = fold_decision(current, decision);
        }
        assert_eq!(current, Some(15.0));
    }

    #[test]
    fn meta_defaults_apply_when_hash_is_missing_fields() {
        let meta = LeaderboardMeta::from_hash(&HashMap::new());
        assert_eq!(meta.update_mode, UpdateMode::Replace);
        assert_eq!(meta.sort_order, SortOrder::Desc);
        assert_eq!(meta.ttl_days, 0);
    }

    #[test]
    fn meta_parses_projected_fields() {
        let mut fields = HashMap::new();
        fields.insert("updateMode".to_string(), "best".to_string());
        fields.insert("sortOrder".to_string(), "asc".to_string());
        fields.insert("ttlDays".to_string(), "7".to_string());
        let meta = LeaderboardMeta::from_hash(&fields);
        assert_eq!(meta.update_mode, UpdateMode::Best);
        assert_eq!(meta.sort_order, SortOrder::Asc);
        assert_eq!(meta.ttl_days, 7);
    }
}
