//! Single-flight population lock
//!
//! One process populates a missing key; everyone else waits and re-reads.
//! The lock is a leased mutex: `SET NX PX` against the shared store, so a
//! crashed holder's lock self-expires after the lease TTL and waiters
//! recover without intervention.
//!
//! Release is token-guarded: a holder only deletes the lock if it still
//! carries its own token, so a slow holder whose lease already expired
//! never releases a successor's lock. Note that the guarded release is a
//! read-then-delete pair, not one atomic step; the window between them is
//! bounded by the lease TTL and tolerated.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::config::SingleFlightConfig;
use crate::error::{Error, Result};
use crate::key::CacheKey;

/// Opaque fencing token identifying one acquisition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    /// Mint a fresh token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Port for the leased-lock store.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Attempt to take the lock. Returns true when this token now holds it.
    async fn try_acquire(&self, key: &str, token: &LockToken, lease: Duration) -> Result<bool>;

    /// Release the lock if `token` still holds it. Returns true when a
    /// lock was actually deleted; false means the lease already expired or
    /// another holder took over.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool>;
}

// =============================================================================
// Redis Lock Store
// =============================================================================

/// Redis-backed lock store (`SET NX PX`).
pub struct RedisLockStore {
    pool: Pool,
    prefix: String,
}

impl RedisLockStore {
    pub fn new(pool: Pool, prefix: impl Into<String>) -> Self {
        Self {
            pool,
            prefix: prefix.into(),
        }
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}lock::{}", self.prefix, key)
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn try_acquire(&self, key: &str, token: &LockToken, lease: Duration) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.lock_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis().max(1) as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let lock_key = self.lock_key(key);
        let holder: Option<String> = conn.get(&lock_key).await?;
        match holder {
            Some(current) if current == token.as_str() => {
                conn.del::<_, ()>(&lock_key).await?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// =============================================================================
// In-Memory Lock Store
// =============================================================================

struct Lease {
    token: String,
    expires_at: Instant,
}

/// In-memory lock store for single-process deployments and tests.
pub struct InMemoryLockStore {
    locks: DashMap<String, Lease>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl Default for InMemoryLockStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, key: &str, token: &LockToken, lease: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut acquired = false;
        let mut entry = self.locks.entry(key.to_string()).or_insert_with(|| {
            acquired = true;
            Lease {
                token: token.as_str().to_string(),
                expires_at: now + lease,
            }
        });
        if !acquired && entry.expires_at <= now {
            // Previous holder's lease lapsed; take over.
            entry.token = token.as_str().to_string();
            entry.expires_at = now + lease;
            acquired = true;
        }
        Ok(acquired)
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool> {
        Ok(self
            .locks
            .remove_if(key, |_, lease| lease.token == token.as_str())
            .is_some())
    }
}

// =============================================================================
// Single Flight
// =============================================================================

/// Handle on an acquired population lock.
///
/// There is no implicit release on drop; the orchestrator releases
/// explicitly, and the lease TTL covers the crash path.
pub struct LockGuard {
    store: Arc<dyn LockStore>,
    key: String,
    token: LockToken,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

impl LockGuard {
    /// The token this acquisition holds the lock under.
    pub fn token(&self) -> &LockToken {
        &self.token
    }

    /// Release the lock. Idempotent against lease expiry and takeover;
    /// release failures are logged and swallowed, the lease TTL cleans up.
    pub async fn release(self) {
        match self.store.release(&self.key, &self.token).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(key = %self.key, "lock already lapsed at release")
            }
            Err(error) => {
                tracing::warn!(key = %self.key, %error, "lock release failed; lease will expire")
            }
        }
    }
}

/// Acquires population locks with capped-exponential retry.
pub struct SingleFlight {
    store: Arc<dyn LockStore>,
    config: SingleFlightConfig,
}

impl SingleFlight {
    pub fn new(store: Arc<dyn LockStore>, config: SingleFlightConfig) -> Self {
        Self { store, config }
    }

    /// Take the lock for `key`, retrying with capped exponential backoff
    /// until `max_wait` elapses.
    pub async fn acquire(&self, key: &CacheKey) -> Result<LockGuard> {
        let token = LockToken::generate();
        let started = Instant::now();
        let max_wait = self.config.max_wait();
        let mut interval = Duration::from_millis(self.config.retry_initial_ms.max(1));
        let cap = Duration::from_millis(self.config.retry_max_ms.max(1));

        loop {
            if self
                .store
                .try_acquire(key.as_str(), &token, self.config.lease_ttl())
                .await?
            {
                return Ok(LockGuard {
                    store: Arc::clone(&self.store),
                    key: key.as_str().to_string(),
                    token,
                });
            }

            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(Error::LockTimeout {
                    key: key.as_str().to_string(),
                    waited,
                });
            }

            let remaining = max_wait - waited;
            tokio::time::sleep(interval.min(remaining)).await;
            interval = (interval * 2).min(cap);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn key(segment: &str) -> CacheKey {
        CacheKey::derive("item:detail", &[segment])
    }

    fn fast_config() -> SingleFlightConfig {
        SingleFlightConfig {
            max_wait_ms: 200,
            lease_ttl_ms: 10_000,
            retry_initial_ms: 5,
            retry_max_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = Arc::new(InMemoryLockStore::new());
        let flight = SingleFlight::new(store.clone(), fast_config());

        let guard = flight.acquire(&key("1")).await.unwrap();
        let other = LockToken::generate();
        assert!(!store
            .try_acquire("item:detail::1", &other, Duration::from_secs(10))
            .await
            .unwrap());

        guard.release().await;
        assert!(store
            .try_acquire("item:detail::1", &other, Duration::from_secs(10))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let store = Arc::new(InMemoryLockStore::new());
        let flight = SingleFlight::new(store.clone(), fast_config());

        let _held = flight.acquire(&key("1")).await.unwrap();
        let err = flight.acquire(&key("1")).await.unwrap_err();
        assert_matches!(err, Error::LockTimeout { ref key, .. } if key == "item:detail::1");
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let store = Arc::new(InMemoryLockStore::new());
        let flight = Arc::new(SingleFlight::new(store, fast_config()));

        let guard = flight.acquire(&key("1")).await.unwrap();
        let waiter = {
            let flight = Arc::clone(&flight);
            tokio::spawn(async move { flight.acquire(&key("1")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        guard.release().await;

        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_lapsed_lease_is_taken_over() {
        let store = Arc::new(InMemoryLockStore::new());
        let flight = SingleFlight::new(
            store.clone(),
            SingleFlightConfig {
                lease_ttl_ms: 30,
                ..fast_config()
            },
        );

        let stale = flight.acquire(&key("1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Lease expired, so a second caller wins without a release.
        let fresh = flight.acquire(&key("1")).await.unwrap();

        // The stale holder's release must not free the successor's lock.
        stale.release().await;
        let probe = LockToken::generate();
        assert!(!store
            .try_acquire("item:detail::1", &probe, Duration::from_secs(10))
            .await
            .unwrap());
        fresh.release().await;
    }

    #[tokio::test]
    async fn test_release_with_wrong_token_is_noop() {
        let store = InMemoryLockStore::new();
        let holder = LockToken::generate();
        let intruder = LockToken::generate();
        assert!(store
            .try_acquire("k", &holder, Duration::from_secs(10))
            .await
            .unwrap());

        assert!(!store.release("k", &intruder).await.unwrap());
        assert!(store.release("k", &holder).await.unwrap());
        assert!(!store.release("k", &holder).await.unwrap());
    }

    #[tokio::test]
    async fn test_locks_are_per_key() {
        let store = Arc::new(InMemoryLockStore::new());
        let flight = SingleFlight::new(store, fast_config());

        let _a = flight.acquire(&key("1")).await.unwrap();
        assert!(flight.acquire(&key("2")).await.is_ok());
    }
}
