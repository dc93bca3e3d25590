//! Per-item detail cache
//!
//! Point lookups by item id through the cache-aside path. A missing row
//! is `Ok(None)` and is never cached, so deleted items disappear from
//! readers as soon as their cached copies expire or are evicted.

use std::sync::Arc;

use crate::config::namespaces;
use crate::error::Result;
use crate::key::CacheKey;
use crate::orchestrator::CacheAside;
use crate::store::{CatalogRecord, ItemId, StoreGateway};

pub struct DetailCache {
    cache: Arc<CacheAside>,
    store: Arc<dyn StoreGateway>,
}

impl DetailCache {
    pub fn new(cache: Arc<CacheAside>, store: Arc<dyn StoreGateway>) -> Self {
        Self { cache, store }
    }

    /// Cache key for one item's detail record.
    pub fn key(id: ItemId) -> CacheKey {
        CacheKey::derive(namespaces::ITEM_DETAIL, &[&id.to_string()])
    }

    /// Fetch an item, populating the cache on a miss.
    pub async fn get(&self, id: ItemId) -> Result<Option<CatalogRecord>> {
        let store = Arc::clone(&self.store);
        self.cache
            .get_or_compute(&Self::key(id), move || async move {
                store.get_by_id(id).await
            })
            .await
    }

    /// Drop an item's cached detail from every tier.
    pub async fn evict(&self, id: ItemId) -> Result<()> {
        self.cache.evict(&Self::key(id)).await
    }
}

// =============================================================================
// Tests
// =============================================================================
