//! Delayed invalidation
//!
//! After a durable-store write the affected cache entries are evicted on
//! a grace delay rather than immediately: the delay rides out replication
//! lag in the source of truth so the next populate reads settled data.
//! Eviction is fire-and-forget and best-effort; a lost eviction only
//! means the entry lives until its TTL.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::key::CacheKey;
use crate::orchestrator::CacheAside;

/// What one write invalidates: individual keys, whole namespaces, or both.
#[derive(Debug, Clone, Default)]
pub struct InvalidationTask {
    pub keys: Vec<CacheKey>,
    pub namespaces: Vec<String>,
}

impl InvalidationTask {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: CacheKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.namespaces.is_empty()
    }
}

pub struct DelayedInvalidator {
    cache: Arc<CacheAside>,
    grace_delay: Duration,
}

impl DelayedInvalidator {
    pub fn new(cache: Arc<CacheAside>, grace_delay: Duration) -> Self {
        Self { cache, grace_delay }
    }

    /// Queue a task for eviction after the grace delay.
    ///
    /// Returns the spawned handle so callers that need to observe
    /// completion (tests, shutdown paths) can await it; production write
    /// paths just drop it.
    pub fn schedule(&self, task: InvalidationTask) -> JoinHandle<()> {
        let cache = Arc::clone(&self.cache);
        let delay = self.grace_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            for key in &task.keys {
                if let Err(error) = cache.evict(key).await {
                    tracing::warn!(key = %key, %error, "delayed key eviction failed");
                }
            }
            for namespace in &task.namespaces {
                if let Err(error) = cache.evict_namespace(namespace).await {
                    tracing::warn!(namespace, %error, "delayed namespace eviction failed");
                }
            }
            tracing::debug!(
                keys = task.keys.len(),
                namespaces = task.namespaces.len(),
                "delayed invalidation ran"
            );
        })
    }

    /// Evict a task's targets immediately, without the grace delay.
    pub async fn run_now(&self, task: &InvalidationTask) {
        for key in &task.keys {
            if let Err(error) = self.cache.evict(key).await {
                tracing::warn!(key = %key, %error, "immediate key eviction failed");
            }
        }
        for namespace in &task.namespaces {
            if let Err(error) = self.cache.evict_namespace(namespace).await {
                tracing::warn!(namespace, %error, "immediate namespace eviction failed");
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    use crate::config::{namespaces, NamespaceRegistry, SingleFlightConfig};
    use crate::lock::{InMemoryLockStore, SingleFlight};
    use crate::tier::{InMemorySharedTier, LocalTier, SharedTier};

    fn cache() -> (Arc<CacheAside>, Arc<InMemorySharedTier>) {
        let registry = Arc::new(NamespaceRegistry::default());
        let local = Arc::new(LocalTier::from_registry(&registry));
        let shared = Arc::new(InMemorySharedTier::new());
        let flight = SingleFlight::new(
            Arc::new(InMemoryLockStore::new()),
            SingleFlightConfig::default(),
        );
        (
            Arc::new(CacheAside::new(registry, local, shared.clone(), flight)),
            shared,
        )
    }

    fn detail_key(id: u64) -> CacheKey {
        CacheKey::derive(namespaces::ITEM_DETAIL, &[&id.to_string()])
    }

    #[tokio::test]
    async fn test_eviction_waits_for_grace_delay() {
        let (cache, shared) = cache();
        shared
            .put(&detail_key(1), Bytes::from_static(b"1"), None)
            .await
            .unwrap();

        let invalidator = DelayedInvalidator::new(cache, Duration::from_millis(80));
        let handle = invalidator.schedule(InvalidationTask::new().key(detail_key(1)));

        // Still present inside the grace window.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(shared.get(&detail_key(1)).await.unwrap().is_some());

        handle.await.unwrap();
        assert!(shared.get(&detail_key(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_namespace_task_clears_all_keys() {
        let (cache, shared) = cache();
        for id in 1..=3u64 {
            shared
                .put(&detail_key(id), Bytes::from_static(b"v"), None)
                .await
                .unwrap();
        }

        let invalidator = DelayedInvalidator::new(cache, Duration::from_millis(10));
        invalidator
            .schedule(InvalidationTask::new().namespace(namespaces::ITEM_DETAIL))
            .await
            .unwrap();

        for id in 1..=3u64 {
            assert!(shared.get(&detail_key(id)).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_run_now_skips_delay() {
        let (cache, shared) = cache();
        shared
            .put(&detail_key(1), Bytes::from_static(b"v"), None)
            .await
            .unwrap();

        let invalidator = DelayedInvalidator::new(cache, Duration::from_secs(3600));
        invalidator
            .run_now(&InvalidationTask::new().key(detail_key(1)))
            .await;
        assert!(shared.get(&detail_key(1)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mixed_task_evicts_keys_and_namespaces() {
        let (cache, shared) = cache();
        shared
            .put(&detail_key(1), Bytes::from_static(b"v"), None)
            .await
            .unwrap();
        let listing = CacheKey::derive(namespaces::CATEGORY_LIST, &["0"]);
        shared.put(&listing, Bytes::from_static(b"v"), None).await.unwrap();

        let invalidator = DelayedInvalidator::new(cache, Duration::from_millis(10));
        invalidator
            .schedule(
                InvalidationTask::new()
                    .key(detail_key(1))
                    .namespace(namespaces::CATEGORY_LIST),
            )
            .await
            .unwrap();

        assert!(shared.get(&detail_key(1)).await.unwrap().is_none());
        assert!(shared.get(&listing).await.unwrap().is_none());
    }
}
