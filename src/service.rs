//! Service facade
//!
//! Wires the tiers, the lock, the orchestrator, the ranking engine, and
//! the invalidator into one handle the host application talks to. With
//! Redis enabled the shared tier and lock store ride the same connection
//! pool; disabled, both fall back to in-process implementations and the
//! service behaves as a plain two-level local cache.

use std::sync::Arc;

use crate::config::{namespaces, CacheSettings};
use crate::detail::DetailCache;
use crate::error::Result;
use crate::invalidate::{DelayedInvalidator, InvalidationTask};
use crate::key::CacheKey;
use crate::lock::{InMemoryLockStore, LockStore, RedisLockStore, SingleFlight};
use crate::orchestrator::CacheAside;
use crate::ranking::{RankedItem, RankingEngine};
use crate::store::{CatalogRecord, CategoryRecord, ItemId, StoreGateway};
use crate::tier::{build_redis_pool, InMemorySharedTier, LocalTier, LocalTierStats, RedisTier, SharedTier};

pub struct ShelfCache {
    local: Arc<LocalTier>,
    cache: Arc<CacheAside>,
    details: Arc<DetailCache>,
    ranking: RankingEngine,
    invalidator: DelayedInvalidator,
    store: Arc<dyn StoreGateway>,
}

impl ShelfCache {
    /// Build the service from settings, choosing backends by configuration.
    pub fn new(settings: CacheSettings, store: Arc<dyn StoreGateway>) -> Result<Self> {
        let (shared, lock_store): (Arc<dyn SharedTier>, Arc<dyn LockStore>) =
            if settings.redis.enabled {
                let pool = build_redis_pool(&settings.redis)?;
                let prefix = settings.namespaces.shared_key_prefix.clone();
                tracing::info!(url = %settings.redis.url, "shared tier on redis");
                (
                    Arc::new(RedisTier::new(pool.clone(), prefix.clone())),
                    Arc::new(RedisLockStore::new(pool, prefix)),
                )
            } else {
                tracing::info!("shared tier in process memory");
                (
                    Arc::new(InMemorySharedTier::new()),
                    Arc::new(InMemoryLockStore::new()),
                )
            };
        Ok(Self::with_backends(settings, store, shared, lock_store))
    }

    /// Build the service on explicit backends. Used by `new` and directly
    /// by hosts that bring their own tier implementations.
    pub fn with_backends(
        settings: CacheSettings,
        store: Arc<dyn StoreGateway>,
        shared: Arc<dyn SharedTier>,
        lock_store: Arc<dyn LockStore>,
    ) -> Self {
        let registry = Arc::new(settings.namespaces);
        let local = Arc::new(LocalTier::from_registry(&registry));
        let cache = Arc::new(CacheAside::new(
            Arc::clone(&registry),
            Arc::clone(&local),
            Arc::clone(&shared),
            SingleFlight::new(Arc::clone(&lock_store), settings.single_flight.clone()),
        ));
        let details = Arc::new(DetailCache::new(Arc::clone(&cache), Arc::clone(&store)));
        let ranking = RankingEngine::new(
            Arc::clone(&cache),
            shared,
            Arc::clone(&store),
            Arc::clone(&details),
            registry,
            SingleFlight::new(lock_store, settings.single_flight),
        );
        let invalidator =
            DelayedInvalidator::new(Arc::clone(&cache), settings.invalidator.grace_delay());
        Self {
            local,
            cache,
            details,
            ranking,
            invalidator,
            store,
        }
    }

    /// Generic cache-aside read for host-defined entries. The key's
    /// namespace must be registered.
    pub async fn get_or_compute<T, F, Fut>(&self, key: &CacheKey, populate: F) -> Result<Option<T>>
    where
        T: serde::Serialize + serde::de::DeserializeOwned + Send,
        F: FnOnce() -> Fut + Send,
        Fut: std::future::Future<Output = Result<Option<T>>> + Send,
    {
        self.cache.get_or_compute(key, populate).await
    }

    /// One item's detail record, cache-aside.
    pub async fn item_detail(&self, id: ItemId) -> Result<Option<CatalogRecord>> {
        self.details.get(id).await
    }

    /// Most-visited listing, highest visit count first.
    pub async fn top_visited(&self) -> Result<Vec<RankedItem>> {
        self.ranking.top_visited().await
    }

    /// Newest-items listing.
    pub async fn top_newest(&self) -> Result<Vec<RankedItem>> {
        self.ranking.top_newest().await
    }

    /// Most-recently-updated listing.
    pub async fn top_updated(&self) -> Result<Vec<RankedItem>> {
        self.ranking.top_updated().await
    }

    /// Category listing for one reading direction, cached locally.
    pub async fn list_categories(&self, work_direction: u8) -> Result<Vec<CategoryRecord>> {
        let key = CacheKey::derive(namespaces::CATEGORY_LIST, &[&work_direction.to_string()]);
        let store = Arc::clone(&self.store);
        let rows: Option<Vec<CategoryRecord>> = self
            .cache
            .get_or_compute(&key, move || async move {
                Ok(Some(store.list_categories(work_direction).await?))
            })
            .await?;
        Ok(rows.unwrap_or_default())
    }

    /// Queue cache eviction after the configured grace delay.
    pub fn schedule_eviction(&self, task: InvalidationTask) -> tokio::task::JoinHandle<()> {
        self.invalidator.schedule(task)
    }

    /// Nudge after a durable write to item `id`: its detail entry and the
    /// attribute-ordered listings go stale-bounded instead of waiting out
    /// their full TTLs.
    pub fn record_write(&self, id: ItemId) -> tokio::task::JoinHandle<()> {
        self.schedule_eviction(
            InvalidationTask::new()
                .key(DetailCache::key(id))
                .namespace(namespaces::RANK_UPDATED)
                .namespace(namespaces::RANK_NEWEST),
        )
    }

    /// Local-tier counters for one namespace.
    pub fn local_stats(&self, namespace: &str) -> Option<LocalTierStats> {
        self.local.stats(namespace)
    }
}

// =============================================================================
// Tests
// =============================================================================
