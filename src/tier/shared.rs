//! Shared tier - network cache visible to all processes
//!
//! The production implementation is Redis behind a `deadpool-redis` pool:
//! plain keys for cached values, one sorted set per score-ordered ranking
//! namespace. All mutations are atomic single-key operations (SET,
//! SETEX, DEL, ZADD); there are no multi-key transactions.
//!
//! An in-memory implementation of the same port ships for single-process
//! deployments and tests.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use deadpool_redis::{Pool, PoolConfig, Runtime};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use super::entry::TierEntry;
use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::key::CacheKey;

/// One member of a score-ordered ranking.
///
/// Ordering is descending by score. The tie-break between equal scores is
/// implementation-defined: callers must not rely on any particular order
/// among ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    /// Member identity (an item id rendered as a string)
    pub member: String,
    /// Ranking score (e.g. visit count)
    pub score: f64,
}

impl RankEntry {
    pub fn new(member: impl Into<String>, score: f64) -> Self {
        Self {
            member: member.into(),
            score,
        }
    }
}

/// Port for the shared cache tier.
#[async_trait]
pub trait SharedTier: Send + Sync {
    /// Look up a cached value.
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;

    /// Store a value with an optional TTL.
    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Option<Duration>) -> Result<()>;

    /// Drop a single entry.
    async fn evict(&self, key: &CacheKey) -> Result<()>;

    /// Drop every entry belonging to a namespace, including its sorted
    /// structure.
    async fn evict_namespace(&self, namespace: &str) -> Result<()>;

    /// Read `count` members of a namespace's sorted structure starting at
    /// `offset`, highest score first. An absent structure reads as empty.
    async fn range_desc(&self, namespace: &str, offset: usize, count: usize)
        -> Result<Vec<RankEntry>>;

    /// Replace a namespace's sorted structure wholesale.
    async fn bulk_replace(
        &self,
        namespace: &str,
        entries: &[RankEntry],
        ttl: Option<Duration>,
    ) -> Result<()>;
}

// =============================================================================
// Redis Tier
// =============================================================================

/// Build the shared Redis pool from configuration.
pub fn build_redis_pool(config: &RedisConfig) -> Result<Pool> {
    let mut cfg = deadpool_redis::Config::from_url(config.url.clone());
    let mut pool_cfg = PoolConfig::new(config.pool_size);
    pool_cfg.timeouts.wait = Some(Duration::from_millis(config.timeout_ms));
    pool_cfg.timeouts.create = Some(Duration::from_millis(config.timeout_ms));
    cfg.pool = Some(pool_cfg);
    cfg.create_pool(Some(Runtime::Tokio1))
        .map_err(|e| Error::Internal(format!("redis pool creation failed: {e}")))
}

/// Redis-backed shared tier.
pub struct RedisTier {
    pool: Pool,
    /// Prefix applied to every key so several applications can share one Redis
    prefix: String,
}

impl RedisTier {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl SharedTier for RedisTier {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let mut conn = self.pool.get().await?;
        let data: Option<Vec<u8>> = conn.get(self.full_key(key.as_str())).await?;
        Ok(data.map(Bytes::from))
    }

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let full = self.full_key(key.as_str());
        match ttl {
            Some(ttl) => {
                conn.set_ex::<_, _, ()>(&full, &value[..], ttl.as_secs().max(1))
                    .await?
            }
            None => conn.set::<_, _, ()>(&full, &value[..]).await?,
        }
        tracing::debug!(key = %key, "shared tier set");
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(self.full_key(key.as_str())).await?;
        Ok(())
    }

    async fn evict_namespace(&self, namespace: &str) -> Result<()> {
        let mut conn = self.pool.get().await?;

        // The singleton key (also the sorted-set key) plus every derived key.
        let mut keys = vec![self.full_key(namespace)];
        {
            let pattern = format!("{}::*", self.full_key(namespace));
            let mut iter = conn.scan_match::<_, String>(pattern).await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        conn.del::<_, ()>(keys).await?;
        tracing::debug!(namespace = %namespace, "shared tier namespace evicted");
        Ok(())
    }

    async fn range_desc(
        &self,
        namespace: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<RankEntry>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.pool.get().await?;
        let start = offset as isize;
        let stop = (offset + count - 1) as isize;
        let rows: Vec<(String, f64)> = conn
            .zrevrange_withscores(self.full_key(namespace), start, stop)
            .await?;
        Ok(rows
            .into_iter()
            .map(|(member, score)| RankEntry { member, score })
            .collect())
    }

    async fn bulk_replace(
        &self,
        namespace: &str,
        entries: &[RankEntry],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let full = self.full_key(namespace);

        conn.del::<_, ()>(&full).await?;
        if entries.is_empty() {
            return Ok(());
        }
        let items: Vec<(f64, &str)> = entries
            .iter()
            .map(|entry| (entry.score, entry.member.as_str()))
            .collect();
        conn.zadd_multiple::<_, _, _, ()>(&full, &items).await?;
        if let Some(ttl) = ttl {
            conn.expire::<_, ()>(&full, ttl.as_secs().max(1) as i64)
                .await?;
        }
        tracing::debug!(namespace = %namespace, members = entries.len(), "sorted structure rebuilt");
        Ok(())
    }
}

// =============================================================================
// In-Memory Shared Tier
// =============================================================================

struct ZsetState {
    /// Kept sorted descending by score
    entries: Vec<RankEntry>,
    expires_at: Option<Instant>,
}

impl ZsetState {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// In-memory shared tier for single-process deployments and testing.
pub struct InMemorySharedTier {
    values: DashMap<String, TierEntry>,
    zsets: DashMap<String, ZsetState>,
}

impl InMemorySharedTier {
    pub fn new() -> Self {
        Self {
            values: DashMap::new(),
            zsets: DashMap::new(),
        }
    }

    /// Entries currently held (values only, for tests).
    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl Default for InMemorySharedTier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedTier for InMemorySharedTier {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        if let Some(entry) = self.values.get(key.as_str()) {
            if entry.is_expired() {
                drop(entry);
                self.values.remove(key.as_str());
                return Ok(None);
            }
            return Ok(Some(entry.data()));
        }
        Ok(None)
    }

    async fn put(&self, key: &CacheKey, value: Bytes, ttl: Option<Duration>) -> Result<()> {
        self.values
            .insert(key.as_str().to_string(), TierEntry::new(value, ttl));
        Ok(())
    }

    async fn evict(&self, key: &CacheKey) -> Result<()> {
        self.values.remove(key.as_str());
        Ok(())
    }

    async fn evict_namespace(&self, namespace: &str) -> Result<()> {
        let derived_prefix = format!("{namespace}::");
        self.values
            .retain(|key, _| key != namespace && !key.starts_with(&derived_prefix));
        self.zsets.remove(namespace);
        Ok(())
    }

    async fn range_desc(
        &self,
        namespace: &str,
        offset: usize,
        count: usize,
    ) -> Result<Vec<RankEntry>> {
        let expired = match self.zsets.get(namespace) {
            Some(state) if !state.is_expired() => {
                return Ok(state
                    .entries
                    .iter()
                    .skip(offset)
                    .take(count)
                    .cloned()
                    .collect());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.zsets.remove(namespace);
        }
        Ok(Vec::new())
    }

    async fn bulk_replace(
        &self,
        namespace: &str,
        entries: &[RankEntry],
        ttl: Option<Duration>,
    ) -> Result<()> {
        let mut sorted = entries.to_vec();
        sorted.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        self.zsets.insert(
            namespace.to_string(),
            ZsetState {
                entries: sorted,
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
