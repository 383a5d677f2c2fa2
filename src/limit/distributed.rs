//! Redis-backed counter store.
//!
//! Shares counters across processes. Each operation is a single Lua script,
//! so the expire/count/record sequence executes atomically on the server and
//! no caller ever holds state between a read and a write. Connection loss
//! surfaces as [`StoreError::Unavailable`]; the evaluators above this layer
//! turn that into a fail-open admission.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::backend::{BucketCheck, CounterStore, StoreError, WindowCheck};
use super::key::CounterKey;
use crate::clock::Clock;

/// Sliding-window transaction.
///
/// The attempt is added as a probe first and rolled back when it would exceed
/// the limit, so a rejected request never leaks a slot out of the window.
const WINDOW_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
redis.call('ZREMRANGEBYSCORE', KEYS[1], '-inf', now - window)
redis.call('ZADD', KEYS[1], now, ARGV[4])
local count = redis.call('ZCARD', KEYS[1])
if count > limit then
  redis.call('ZREM', KEYS[1], ARGV[4])
  local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
  return {0, count - 1, oldest[2] or '-1'}
end
redis.call('PEXPIRE', KEYS[1], window + 1000)
local oldest = redis.call('ZRANGE', KEYS[1], 0, 0, 'WITHSCORES')
return {1, count, oldest[2] or '-1'}
"#;

/// Token-bucket transaction: refill from elapsed time, cap at capacity, then
/// consume one token if available.
const BUCKET_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local capacity = tonumber(ARGV[2])
local rate = tonumber(ARGV[3])
local state = redis.call('HMGET', KEYS[1], 'tokens', 'refreshed_ms')
local tokens = tonumber(state[1])
local refreshed = tonumber(state[2])
if tokens == nil or refreshed == nil then
  tokens = capacity
  refreshed = now
end
tokens = math.min(capacity, tokens + (now - refreshed) / 1000.0 * rate)
local accepted = 0
if tokens >= 1 then
  tokens = tokens - 1
  accepted = 1
end
redis.call('HSET', KEYS[1], 'tokens', tostring(tokens), 'refreshed_ms', tostring(now))
redis.call('PEXPIRE', KEYS[1], tonumber(ARGV[4]))
return {accepted, tostring(tokens)}
"#;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Prefix applied to every key, so one Redis can serve several deployments.
    pub key_prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "gatekeeper:".to_string(),
        }
    }
}

/// Counter store shared across processes through Redis.
pub struct RedisStore {
    connection: ConnectionManager,
    config: RedisStoreConfig,
    clock: Arc<dyn Clock>,
    window_script: Script,
    bucket_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect with default configuration.
    pub async fn connect(url: &str, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::connect_with_config(url, RedisStoreConfig::default(), clock).await
    }

    /// Connect to Redis and prepare the counter scripts.
    pub async fn connect_with_config(
        url: &str,
        config: RedisStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let client = Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        info!(key_prefix = %config.key_prefix, "Connected to Redis counter store");

        Ok(Self {
            connection,
            config,
            clock,
            window_script: Script::new(WINDOW_SCRIPT),
            bucket_script: Script::new(BUCKET_SCRIPT),
        })
    }

    fn redis_key(&self, key: &CounterKey) -> String {
        format!("{}{}", self.config.key_prefix, key.storage_key())
    }

    fn now_ms(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}

fn parse_oldest(raw: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
    let ms = raw
        .parse::<f64>()
        .map_err(|_| StoreError::Malformed(format!("oldest entry score '{}'", raw)))?;
    if ms < 0.0 {
        return Ok(None);
    }
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .map(Some)
        .ok_or_else(|| StoreError::Malformed(format!("oldest entry score '{}'", raw)))
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn sliding_window_check(
        &self,
        key: &CounterKey,
        limit: u32,
        window_secs: u64,
    ) -> Result<WindowCheck, StoreError> {
        let now_ms = self.now_ms();
        // Unique member per attempt; two probes in the same millisecond must
        // not collapse into one sorted-set entry.
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let mut conn = self.connection.clone();
        let (accepted, count, oldest): (i64, i64, String) = self
            .window_script
            .key(self.redis_key(key))
            .arg(now_ms)
            .arg((window_secs * 1000) as i64)
            .arg(limit as i64)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(WindowCheck {
            accepted: accepted == 1,
            count: count.max(0) as u32,
            oldest: parse_oldest(&oldest)?,
        })
    }

    async fn token_bucket_consume(
        &self,
        key: &CounterKey,
        capacity: u32,
        refill_per_sec: f64,
    ) -> Result<BucketCheck, StoreError> {
        let now_ms = self.now_ms();
        // Keep idle buckets around long enough to refill fully, then drop them.
        let drain_secs = (capacity as f64 / refill_per_sec.max(f64::MIN_POSITIVE)).ceil() as i64;
        let ttl_ms = (drain_secs.max(60) * 2).saturating_mul(1000);

        let mut conn = self.connection.clone();
        let (accepted, tokens): (i64, String) = self
            .bucket_script
            .key(self.redis_key(key))
            .arg(now_ms)
            .arg(capacity as i64)
            .arg(refill_per_sec)
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let tokens = tokens
            .parse::<f64>()
            .map_err(|_| StoreError::Malformed(format!("token count '{}'", tokens)))?;

        Ok(BucketCheck {
            accepted: accepted == 1,
            tokens,
        })
    }
}
