//! Cache-aside orchestrator
//!
//! The single read path for cached values. Tier precedence is fixed:
//! local first, then shared, then a lock-guarded populate from the source
//! of truth with write-through to every tier the namespace is placed in.
//!
//! Values cross tier boundaries as JSON payloads; a payload that no longer
//! decodes (schema drift after a deploy, a corrupt entry) is treated as a
//! miss, evicted, and repopulated rather than surfaced as an error.
//!
//! Shared-tier and lock-store outages degrade instead of failing reads:
//! the orchestrator logs, skips the unavailable component, and keeps
//! serving from whatever is left.

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::{LockTimeoutPolicy, NamespaceRegistry, TierPolicy};
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::lock::SingleFlight;
use crate::tier::{LocalTier, SharedTier};

/// Ties the tiers, the registry, and the single-flight lock together.
pub struct CacheAside {
    registry: Arc<NamespaceRegistry>,
    local: Arc<LocalTier>,
    shared: Arc<dyn SharedTier>,
    flight: SingleFlight,
}

impl CacheAside {
    pub fn new(
        registry: Arc<NamespaceRegistry>,
        local: Arc<LocalTier>,
        shared: Arc<dyn SharedTier>,
        flight: SingleFlight,
    ) -> Self {
        Self {
            registry,
            local,
            shared,
            flight,
        }
    }

    /// Read through the tiers, populating on a full miss.
    ///
    /// `populate` runs at most once per process per miss, and under the
    /// cross-process lock at most one process runs it at a time. An
    /// `Ok(None)` from `populate` means the value does not exist; absent
    /// values are never cached, so every read of a missing key goes to the
    /// source.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, populate: F) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Option<T>>> + Send,
    {
        let policy = self.registry.policy(key.namespace())?.clone();

        if let Some(value) = self.read_tiers::<T>(key, &policy).await? {
            return Ok(Some(value));
        }

        // Full miss: serialize population behind the per-key lock.
        let guard = match self.flight.acquire(key).await {
            Ok(guard) => Some(guard),
            Err(error) if error.is_tier_unavailable() => {
                tracing::warn!(key = %key, %error, "lock store unavailable; populating unguarded");
                None
            }
            Err(Error::LockTimeout { key, waited }) => {
                return match policy.on_lock_timeout {
                    LockTimeoutPolicy::Propagate => Err(Error::LockTimeout { key, waited }),
                    LockTimeoutPolicy::Degrade => {
                        tracing::warn!(key = %key, ?waited, "lock wait timed out; degrading to absent");
                        Ok(None)
                    }
                };
            }
            Err(error) => return Err(error),
        };

        // Whatever happens past this point, the guard must be released.
        let result = async {
            // Double-check: the previous holder usually populated while we
            // waited on the lock.
            if guard.is_some() {
                if let Some(value) = self.read_tiers::<T>(key, &policy).await? {
                    return Ok(Some(value));
                }
            }

            match populate().await {
                Ok(Some(value)) => {
                    self.write_through(key, &policy, &value).await?;
                    Ok(Some(value))
                }
                Ok(None) => {
                    tracing::debug!(key = %key, "source has no value; nothing cached");
                    Ok(None)
                }
                Err(source) => Err(Error::PopulateFailed {
                    key: key.as_str().to_string(),
                    source: Box::new(source),
                }),
            }
        }
        .await;

        if let Some(guard) = guard {
            guard.release().await;
        }
        result
    }

    /// Store a freshly computed value in every tier the policy places it in,
    /// shared tier first so other processes see it before our local copy
    /// starts serving.
    pub async fn write_through<T: Serialize>(
        &self,
        key: &CacheKey,
        policy: &TierPolicy,
        value: &T,
    ) -> Result<()> {
        let payload = Bytes::from(serde_json::to_vec(value)?);
        if policy.uses_shared() {
            if let Err(error) = self.shared.put(key, payload.clone(), policy.ttl()).await {
                if error.is_tier_unavailable() {
                    tracing::warn!(key = %key, %error, "shared tier write skipped");
                } else {
                    return Err(error);
                }
            }
        }
        if policy.uses_local() {
            self.local.put(key, payload, policy.ttl());
        }
        Ok(())
    }

    /// Evict a key from every tier.
    pub async fn evict(&self, key: &CacheKey) -> Result<()> {
        self.local.evict(key);
        if let Err(error) = self.shared.evict(key).await {
            if error.is_tier_unavailable() {
                tracing::warn!(key = %key, %error, "shared tier evict skipped");
            } else {
                return Err(error);
            }
        }
        Ok(())
    }

    /// Evict a whole namespace from every tier.
    pub async fn evict_namespace(&self, namespace: &str) -> Result<()> {
        self.local.evict_namespace(namespace);
        if let Err(error) = self.shared.evict_namespace(namespace).await {
            if error.is_tier_unavailable() {
                tracing::warn!(namespace, %error, "shared tier namespace evict skipped");
            } else {
                return Err(error);
            }
        }
        Ok(())
    }

    /// Local-first, shared-second tier read with promotion.
    async fn read_tiers<T: DeserializeOwned>(
        &self,
        key: &CacheKey,
        policy: &TierPolicy,
    ) -> Result<Option<T>> {
        if policy.uses_local() {
            if let Some(payload) = self.local.get(key) {
                match serde_json::from_slice(&payload) {
                    Ok(value) => {
                        tracing::debug!(key = %key, "local tier hit");
                        return Ok(Some(value));
                    }
                    Err(error) => {
                        tracing::warn!(key = %key, %error, "undecodable local entry dropped");
                        self.local.evict(key);
                    }
                }
            }
        }

        if policy.uses_shared() {
            let payload = match self.shared.get(key).await {
                Ok(payload) => payload,
                Err(error) if error.is_tier_unavailable() => {
                    tracing::warn!(key = %key, %error, "shared tier unavailable; treating as miss");
                    None
                }
                Err(error) => return Err(error),
            };
            if let Some(payload) = payload {
                match serde_json::from_slice(&payload) {
                    Ok(value) => {
                        tracing::debug!(key = %key, "shared tier hit");
                        if policy.uses_local() {
                            self.local.put(key, payload, policy.ttl());
                        }
                        return Ok(Some(value));
                    }
                    Err(error) => {
                        tracing::warn!(key = %key, %error, "undecodable shared entry dropped");
                        let _ = self.shared.evict(key).await;
                    }
                }
            }
        }

        Ok(None)
    }
}

// =============================================================================
// Tests
// =============================================================================
