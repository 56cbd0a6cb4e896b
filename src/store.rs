use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;
use tracing::info;

use crate::models::SortOrder;

/// Sorted-set namespace for a leaderboard. Derived deterministically from the
/// tenant/project/leaderboard triple so two tenants can never share a key.
pub fn score_key(tenant_id: &str, project_id: &str, leaderboard_id: &str) -> String {
    format!("l:{tenant_id}:{project_id}:{leaderboard_id}")
}

/// Metadata hash colocated with the score set. Never expires.
pub fn meta_key(tenant_id: &str, project_id: &str, leaderboard_id: &str) -> String {
    format!("l:meta:{tenant_id}:{project_id}:{leaderboard_id}")
}

pub fn bucket_key(tenant_id: &str) -> String {
    format!("rl:{tenant_id}")
}

pub fn usage_key(tenant_id: &str, date: &str) -> String {
    format!("usage:{tenant_id}:{date}")
}

pub fn usage_project_key(tenant_id: &str, project_id: &str, date: &str) -> String {
    format!("usage:{tenant_id}:{project_id}:{date}")
}

pub fn auth_cache_key(hash_prefix: &str) -> String {
    format!("auth:{hash_prefix}")
}

/// One write inside a pipelined batch transaction.
#[derive(Debug, Clone)]
pub struct ScoreWrite {
    pub key: String,
    pub member: String,
    pub op: WriteOp,
}

#[derive(Debug, Clone, Copy)]
pub enum WriteOp {
    Set(f64),
    Incr(f64),
}

/// Atomic token-bucket step: refill by elapsed wall time, clamp to capacity,
/// consume if possible, write back with TTL. Runs server-side so concurrent
/// requests against the same bucket serialize on the store.
const TOKEN_BUCKET_SCRIPT: &str = r#"
local key = KEYS[1]
local capacity = tonumber(ARGV[1])
local refill_rate = tonumber(ARGV[2])
local now_ms = tonumber(ARGV[3])
local cost = tonumber(ARGV[4])
local ttl = tonumber(ARGV[5])

local state = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(state[1])
local last_refill = tonumber(state[2])
if tokens == nil or last_refill == nil then
  tokens = capacity
  last_refill = now_ms
end

local elapsed = now_ms - last_refill
if elapsed < 0 then elapsed = 0 end
tokens = tokens + (elapsed / 1000.0) * refill_rate
if tokens > capacity then tokens = capacity end

local allowed = 0
if tokens >= cost then
  tokens = tokens - cost
  allowed = 1
end

redis.call('HSET', key, 'tokens', tostring(tokens), 'last_refill', tostring(now_ms))
redis.call('EXPIRE', key, ttl)
return {allowed, tostring(tokens)}
"#;

/// Redis client shared by the scoring engine, the gateway cache, the rate
/// limiter, and the usage counters.
#[derive(Clone)]
pub struct ScoreStore {
    conn: MultiplexedConnection,
    token_bucket: Script,
}

impl std::fmt::Debug for ScoreStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoreStore").finish_non_exhaustive()
    }
}

impl ScoreStore {
    pub async fn connect(url: &str) -> Result<Self, redis::RedisError> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_tokio_connection().await?;
        info!("Score store connection established");
        Ok(Self {
            conn,
            token_bucket: Script::new(TOKEN_BUCKET_SCRIPT),
        })
    }

    fn conn(&self) -> MultiplexedConnection {
        self.conn.clone()
    }

    // Sorted-set operations

    pub async fn set_member_score(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(key, member, score).await
    }

    pub async fn incr_member_score(
        &self,
        key: &str,
        member: &str,
        delta: f64,
    ) -> Result<f64, redis::RedisError> {
        let mut conn = self.conn();
        conn.zincr(key, member, delta).await
    }

    pub async fn member_score(
        &self,
        key: &str,
        member: &str,
    ) -> Result<Option<f64>, redis::RedisError> {
        let mut conn = self.conn();
        conn.zscore(key, member).await
    }

    /// Pipelined score pre-read for batch best-mode resolution.
    pub async fn member_scores(
        &self,
        key: &str,
        members: &[String],
    ) -> Result<Vec<Option<f64>>, redis::RedisError> {
        if members.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        for member in members {
            pipe.zscore(key, member);
        }
        pipe.query_async(&mut conn).await
    }

    /// 0-based rank of a member in the given direction, None if absent.
    pub async fn member_rank(
        &self,
        key: &str,
        member: &str,
        order: SortOrder,
    ) -> Result<Option<i64>, redis::RedisError> {
        let mut conn = self.conn();
        match order {
            SortOrder::Desc => conn.zrevrank(key, member).await,
            SortOrder::Asc => conn.zrank(key, member).await,
        }
    }

    /// Members with scores between 0-based positions, in ranking order.
    pub async fn range_with_scores(
        &self,
        key: &str,
        order: SortOrder,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(String, f64)>, redis::RedisError> {
        let mut conn = self.conn();
        match order {
            SortOrder::Desc => conn.zrevrange_withscores(key, start as isize, stop as isize).await,
            SortOrder::Asc => conn.zrange_withscores(key, start as isize, stop as isize).await,
        }
    }

    pub async fn card(&self, key: &str) -> Result<i64, redis::RedisError> {
        let mut conn = self.conn();
        conn.zcard(key).await
    }

    /// Idempotent TTL re-arm on a score set.
    pub async fn arm_expiry(&self, key: &str, ttl_secs: i64) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.expire::<_, ()>(key, ttl_secs).await
    }

    /// One MULTI/EXEC transaction applying every write, plus one TTL re-arm
    /// per distinct leaderboard key.
    pub async fn apply_batch(
        &self,
        writes: &[ScoreWrite],
        expiries: &[(String, i64)],
    ) -> Result<(), redis::RedisError> {
        if writes.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for write in writes {
            match write.op {
                WriteOp::Set(score) => {
                    pipe.zadd(&write.key, &write.member, score).ignore();
                }
                WriteOp::Incr(delta) => {
                    pipe.zincr(&write.key, &write.member, delta).ignore();
                }
            }
        }
        for (key, ttl_secs) in expiries {
            pipe.expire(key, *ttl_secs).ignore();
        }
        pipe.query_async::<()>(&mut conn).await
    }

    // Leaderboard metadata hash

    pub async fn write_leaderboard_meta(
        &self,
        key: &str,
        fields: &[(&str, String)],
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset_multiple(key, fields).ignore();
        // The metadata hash must outlive the score set; only the set expires.
        pipe.persist(key).ignore();
        pipe.query_async::<()>(&mut conn).await
    }

    pub async fn read_leaderboard_meta(
        &self,
        key: &str,
    ) -> Result<HashMap<String, String>, redis::RedisError> {
        let mut conn = self.conn();
        conn.hgetall(key).await
    }

    /// Purge a leaderboard: score set and metadata hash together.
    pub async fn delete_leaderboard_keys(
        &self,
        score_key: &str,
        meta_key: &str,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(&[score_key, meta_key]).await
    }

    // Auth cache

    pub async fn get_cached_auth(
        &self,
        cache_key: &str,
    ) -> Result<Option<String>, redis::RedisError> {
        let mut conn = self.conn();
        conn.get(cache_key).await
    }

    pub async fn cache_auth(
        &self,
        cache_key: &str,
        payload: &str,
        ttl_secs: u64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(cache_key, payload, ttl_secs).await
    }

    pub async fn invalidate_auth(&self, cache_key: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        conn.del::<_, ()>(cache_key).await
    }

    // Rate limiting

    /// Runs the atomic token-bucket script. Returns whether the request was
    /// admitted and the tokens remaining after the decision.
    pub async fn take_tokens(
        &self,
        key: &str,
        capacity: u32,
        refill_rate: u32,
        now_ms: i64,
        cost: u32,
        ttl_secs: u64,
    ) -> Result<(bool, f64), redis::RedisError> {
        let mut conn = self.conn();
        let (allowed, tokens): (i64, String) = self
            .token_bucket
            .key(key)
            .arg(capacity)
            .arg(refill_rate)
            .arg(now_ms)
            .arg(cost)
            .arg(ttl_secs)
            .invoke_async(&mut conn)
            .await?;
        let tokens = tokens.parse::<f64>().unwrap_or(0.0);
        Ok((allowed == 1, tokens))
    }

    // Usage counters

    /// Atomic batch of usage increments: tenant-day hash (`requests` plus the
    /// hour field) and the per-project variant, each with retention expiry.
    /// Batched in one transaction so partial writes cannot double-count.
    pub async fn incr_usage_counters(
        &self,
        tenant_key: &str,
        project_key: &str,
        hour: u32,
        retention_secs: i64,
    ) -> Result<(), redis::RedisError> {
        let mut conn = self.conn();
        let hour_field = format!("hour:{hour:02}");
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hincr(tenant_key, "requests", 1).ignore();
        pipe.hincr(tenant_key, &hour_field, 1).ignore();
        pipe.hincr(project_key, "requests", 1).ignore();
        pipe.expire(tenant_key, retention_secs).ignore();
        pipe.expire(project_key, retention_secs).ignore();
        pipe.query_async::<()>(&mut conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_embed_the_full_fingerprint() {
        assert_eq!(score_key("t1", "p1", "lb1"), "l:t1:p1:lb1");
        assert_eq!(meta_key("t1", "p1", "lb1"), "l:meta:t1:p1:lb1");
        assert_eq!(bucket_key("t1"), "rl:t1");
        assert_eq!(usage_key("t1", "2026-08-02"), "usage:t1:2026-08-02");
        assert_eq!(
            usage_project_key("t1", "p1", "2026-08-02"),
            "usage:t1:p1:2026-08-02"
        );
    }

    #[test]
    fn distinct_tenants_never_share_keys() {
        let a = score_key("tenant-a", "p", "lb");
        let b = score_key("tenant-b", "p", "lb");
        assert_ne!(a, b);
        assert!(a.starts_with("l:tenant-a:"));
        assert!(b.starts_with("l:tenant-b:"));
    }

    #[test]
    fn token_bucket_script_is_well_formed() {
        // Catches accidental edits that truncate the embedded script.
        assert!(TOKEN_BUCKET_SCRIPT.contains("HMGET"));
        assert!(TOKEN_BUCKET_SCRIPT.contains("EXPIRE"));
        assert!(TOKEN_BUCKET_SCRIPT.contains("return {allowed, tostring(tokens)}"));
    }
}
