//! shelfcache - multi-tier cache coherency for read-heavy catalog workloads
//!
//! A process-local fast tier in front of a shared Redis tier, with fixed
//! precedence (local, then shared, then the durable store), write-through
//! population, cross-process single-flight so a hot miss is computed once,
//! and delayed invalidation after writes.
//!
//! On top of the generic cache-aside core sit the catalog services: a
//! per-item detail cache, three capped ranked listings (most visited via
//! a shared sorted structure, newest and most recently updated as local
//! snapshots), and category listings.
//!
//! Consistency is deliberately eventual: absent values are never cached,
//! evictions are best-effort, and tier TTLs bound staleness everywhere.
//!
//! ```no_run
//! use std::sync::Arc;
//! use shelfcache::{CacheSettings, InMemoryStore, ItemId, ShelfCache};
//!
//! # async fn run() -> shelfcache::Result<()> {
//! let store = Arc::new(InMemoryStore::new());
//! let cache = ShelfCache::new(CacheSettings::default(), store)?;
//!
//! let detail = cache.item_detail(ItemId::new(42)).await?;
//! let most_visited = cache.top_visited().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod detail;
pub mod error;
pub mod invalidate;
pub mod key;
pub mod lock;
pub mod orchestrator;
pub mod ranking;
pub mod service;
pub mod store;
pub mod tier;

pub use config::{
    namespaces, CacheSettings, InvalidatorConfig, LockTimeoutPolicy, NamespaceRegistry,
    RedisConfig, SingleFlightConfig, TierPlacement, TierPolicy,
};
pub use detail::DetailCache;
pub use error::{Error, Result};
pub use invalidate::{DelayedInvalidator, InvalidationTask};
pub use key::CacheKey;
pub use lock::{InMemoryLockStore, LockStore, LockToken, RedisLockStore, SingleFlight};
pub use orchestrator::CacheAside;
pub use ranking::{RankedItem, RankingEngine, RANK_SIZE};
pub use service::ShelfCache;
pub use store::{
    CatalogRecord, CategoryRecord, InMemoryStore, ItemId, OrderColumn, RecordFilter,
    SortDirection, StoreGateway,
};
pub use tier::{
    build_redis_pool, InMemorySharedTier, LocalTier, LocalTierStats, RankEntry, RedisTier,
    SharedTier, TierEntry,
};
