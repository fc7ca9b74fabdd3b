use crate::error::{AppError, Result};
use crate::observability::{get_metrics, LatencyTimer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Status of an idempotency record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdempotencyStatus {
    /// Claimed, handler still running
    Pending,
    /// Handler finished, response is final and replayable
    Done,
}

/// Stored idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub state: IdempotencyStatus,
    pub status: u16,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub body: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl IdempotencyRecord {
    /// A freshly claimed record.
    pub fn pending() -> Self {
        Self {
            state: IdempotencyStatus::Pending,
            status: 0,
            headers: BTreeMap::new(),
            body: String::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A finished record holding the captured response.
    pub fn done(status: u16, headers: BTreeMap<String, Vec<String>>, body: String) -> Self {
        let now = Utc::now();
        Self {
            state: IdempotencyStatus::Done,
            status,
            headers,
            body,
            created_at: now,
            completed_at: Some(now),
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == IdempotencyStatus::Done
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(AppError::Serialization)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(AppError::Serialization)
    }
}

/// Contract the coordinator needs from a shared key-value store with expiry.
///
/// `claim` is the only operation that must be atomic across every process sharing
/// the store. Everything else is issued by the single owner of a key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Sets `record` under `key` only if the key is absent. Returns true if it was set.
    async fn claim(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<bool>;

    /// Fetches the record under `key`.
    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>>;

    /// Overwrites the record under `key` and resets its expiry.
    async fn put(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<()>;

    /// Removes `key`. Returns true if something was deleted.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Drops expired records. Backends with native expiry return 0.
    async fn cleanup_expired(&self) -> Result<u64> {
        Ok(0)
    }

    /// Short backend name used in logs and health output.
    fn name(&self) -> &'static str;
}

fn ttl_out_of_range(ttl: Duration) -> AppError {
    AppError::Validation(format!("ttl of {}s is out of range", ttl.as_secs()))
}

fn ttl_millis(ttl: Duration) -> Result<u64> {
    let millis = u64::try_from(ttl.as_millis()).map_err(|_| ttl_out_of_range(ttl))?;
    Ok(millis.max(1))
}

fn expires_at(now: Instant, ttl: Duration) -> Result<Instant> {
    now.checked_add(ttl).ok_or_else(|| ttl_out_of_range(ttl))
}

/// Redis-backed idempotency store.
#[derive(Clone)]
pub struct RedisIdempotencyStore {
    client: redis::Client,
}

impl RedisIdempotencyStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    pub fn open(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(AppError::Redis)?;
        Ok(Self::new(client))
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn claim(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<bool> {
        let timer = LatencyTimer::new();
        let json = record.to_json()?;
        let px = usize::try_from(ttl_millis(ttl)?).map_err(|_| ttl_out_of_range(ttl))?;
        let result: Result<Option<String>> = async {
            let mut conn = self.connection().await?;
            conn.set_options(
                key,
                json,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::PX(px)),
            )
            .await
            .map_err(AppError::Redis)
        }
        .await;

        get_metrics().record_store_operation("claim", timer.elapsed_ms(), result.is_ok());
        Ok(result?.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let timer = LatencyTimer::new();
        let result: Result<Option<String>> = async {
            let mut conn = self.connection().await?;
            conn.get(key).await.map_err(AppError::Redis)
        }
        .await;

        get_metrics().record_store_operation("get", timer.elapsed_ms(), result.is_ok());
        match result? {
            Some(json) => Ok(Some(IdempotencyRecord::from_json(&json)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<()> {
        let timer = LatencyTimer::new();
        let json = record.to_json()?;
        let millis = ttl_millis(ttl)?;
        let result: Result<()> = async {
            let mut conn = self.connection().await?;
            conn.pset_ex(key, json, millis)
                .await
                .map_err(AppError::Redis)
        }
        .await;

        get_metrics().record_store_operation("put", timer.elapsed_ms(), result.is_ok());
        result
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let timer = LatencyTimer::new();
        let result: Result<i64> = async {
            let mut conn = self.connection().await?;
            conn.del(key).await.map_err(AppError::Redis)
        }
        .await;

        get_metrics().record_store_operation("delete", timer.elapsed_ms(), result.is_ok());
        Ok(result? > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(AppError::Redis)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local idempotency store.
///
/// Records are kept in their serialized form so reads go through the same
/// decoding path as the Redis store. Expired entries are invisible to reads and
/// are dropped by `cleanup_expired`.
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not yet expired.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stores a raw value, bypassing serialization.
    pub async fn insert_raw(&self, key: &str, value: impl Into<String>, ttl: Duration) -> Result<()> {
        let expires_at = expires_at(Instant::now(), ttl)?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.into(),
                expires_at,
            },
        );
        Ok(())
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn claim(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<bool> {
        let value = record.to_json()?;
        let now = Instant::now();
        let expires_at = expires_at(now, ttl)?;
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get(key) {
            if !existing.is_expired(now) {
                return Ok(false);
            }
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at,
            },
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<IdempotencyRecord>> {
        let value = {
            let entries = self.entries.lock().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(Instant::now()) => entry.value.clone(),
                _ => return Ok(None),
            }
        };
        IdempotencyRecord::from_json(&value).map(Some)
    }

    async fn put(&self, key: &str, record: &IdempotencyRecord, ttl: Duration) -> Result<()> {
        let value = record.to_json()?;
        self.insert_raw(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        let removed = entries.remove(key);
        Ok(matches!(removed, Some(entry) if !entry.is_expired(Instant::now())))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - entries.len()) as u64)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
