//! Ranking engine
//!
//! Three ordered views over the catalog, each capped at [`RANK_SIZE`]:
//!
//! - most visited, backed by a shared sorted structure so every process
//!   observes the same ordering and a rebuild happens once cluster-wide;
//! - newest, and most recently updated, both recomputed top-N snapshots
//!   held in the local tier only.
//!
//! The visit ranking stores only `(id, score)` pairs; item details are
//! hydrated per id through the detail cache, and ids whose detail no
//! longer exists are silently dropped from the view rather than failing
//! the whole listing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future;
use serde::{Deserialize, Serialize};

use crate::config::{namespaces, LockTimeoutPolicy, NamespaceRegistry};
use crate::detail::DetailCache;
use crate::error::{Error, Result};
use crate::key::CacheKey;
use crate::lock::SingleFlight;
use crate::orchestrator::CacheAside;
use crate::store::{CatalogRecord, ItemId, OrderColumn, RecordFilter, SortDirection, StoreGateway};
use crate::tier::{RankEntry, SharedTier};

/// Maximum members in any ranked view.
pub const RANK_SIZE: usize = 30;

/// One row of a ranked listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: ItemId,
    pub category_id: u64,
    pub category_name: String,
    pub title: String,
    pub author: String,
    pub cover_url: String,
    pub latest_section: Option<String>,
    pub word_count: u64,
    pub visit_count: u64,
    pub updated_at: DateTime<Utc>,
}

impl From<&CatalogRecord> for RankedItem {
    fn from(record: &CatalogRecord) -> Self {
        Self {
            id: record.id,
            category_id: record.category_id,
            category_name: record.category_name.clone(),
            title: record.title.clone(),
            author: record.author.clone(),
            cover_url: record.cover_url.clone(),
            latest_section: record.latest_section.clone(),
            word_count: record.word_count,
            visit_count: record.visit_count,
            updated_at: record.updated_at,
        }
    }
}

pub struct RankingEngine {
    cache: Arc<CacheAside>,
    shared: Arc<dyn SharedTier>,
    store: Arc<dyn StoreGateway>,
    details: Arc<DetailCache>,
    registry: Arc<NamespaceRegistry>,
    flight: SingleFlight,
}

impl RankingEngine {
    pub fn new(
        cache: Arc<CacheAside>,
        shared: Arc<dyn SharedTier>,
        store: Arc<dyn StoreGateway>,
        details: Arc<DetailCache>,
        registry: Arc<NamespaceRegistry>,
        flight: SingleFlight,
    ) -> Self {
        Self {
            cache,
            shared,
            store,
            details,
            registry,
            flight,
        }
    }

    /// Most-visited items, highest score first.
    ///
    /// Reads the shared sorted structure; an empty read triggers a
    /// lock-guarded rebuild from the source of truth. Scores come from
    /// the structure, not from the hydrated detail, so the ordering and
    /// the displayed counts always agree.
    pub async fn top_visited(&self) -> Result<Vec<RankedItem>> {
        let mut entries = self.read_visit_rank().await?;
        if entries.is_empty() {
            entries = match self.rebuild_visit_rank().await {
                Ok(entries) => entries,
                Err(Error::LockTimeout { key, waited }) => {
                    let policy = self.registry.policy(namespaces::RANK_VISIT)?;
                    match policy.on_lock_timeout {
                        LockTimeoutPolicy::Propagate => {
                            return Err(Error::LockTimeout { key, waited })
                        }
                        LockTimeoutPolicy::Degrade => {
                            tracing::warn!(%key, "rank rebuild lock timed out; scanning directly");
                            return self.fallback_scan(OrderColumn::VisitCount).await;
                        }
                    }
                }
                Err(error) => return Err(error),
            };
        }
        self.hydrate(&entries).await
    }

    /// Newest items, most recent first. Recomputed snapshot in the local tier.
    pub async fn top_newest(&self) -> Result<Vec<RankedItem>> {
        self.recomputed_view(namespaces::RANK_NEWEST, OrderColumn::CreatedAt)
            .await
    }

    /// Most recently updated items. Recomputed snapshot in the local tier.
    pub async fn top_updated(&self) -> Result<Vec<RankedItem>> {
        self.recomputed_view(namespaces::RANK_UPDATED, OrderColumn::UpdatedAt)
            .await
    }

    async fn read_visit_rank(&self) -> Result<Vec<RankEntry>> {
        match self
            .shared
            .range_desc(namespaces::RANK_VISIT, 0, RANK_SIZE)
            .await
        {
            Ok(entries) => Ok(entries),
            Err(error) if error.is_tier_unavailable() => {
                tracing::warn!(%error, "shared tier unavailable for visit rank");
                Ok(Vec::new())
            }
            Err(error) => Err(error),
        }
    }

    /// Rebuild the visit structure wholesale under the namespace lock,
    /// then serve from the rebuilt structure. Re-running against unchanged
    /// source data yields the same member set and ordering.
    async fn rebuild_visit_rank(&self) -> Result<Vec<RankEntry>> {
        let lock_key = CacheKey::singleton(namespaces::RANK_VISIT);
        let guard = match self.flight.acquire(&lock_key).await {
            Ok(guard) => Some(guard),
            Err(error) if error.is_tier_unavailable() => {
                tracing::warn!(%error, "lock store unavailable; rebuilding unguarded");
                None
            }
            Err(error) => return Err(error),
        };

        let result = async {
            // Another process may have rebuilt while we waited for the lock.
            if guard.is_some() {
                let existing = self.read_visit_rank().await?;
                if !existing.is_empty() {
                    return Ok(existing);
                }
            }
            self.rebuild_visit_rank_locked().await
        }
        .await;

        if let Some(guard) = guard {
            guard.release().await;
        }
        result
    }

    async fn rebuild_visit_rank_locked(&self) -> Result<Vec<RankEntry>> {
        let rows = self
            .store
            .query_top_n(
                OrderColumn::VisitCount,
                SortDirection::Descending,
                RANK_SIZE,
                &RecordFilter::published(),
            )
            .await?;
        let entries: Vec<RankEntry> = rows
            .iter()
            .map(|record| RankEntry::new(record.id.to_string(), record.visit_count as f64))
            .collect();

        let policy = self.registry.policy(namespaces::RANK_VISIT)?;
        match self
            .shared
            .bulk_replace(namespaces::RANK_VISIT, &entries, policy.ttl())
            .await
        {
            // Serve what the structure now holds, not our local vector.
            Ok(()) => self.read_visit_rank().await,
            Err(error) if error.is_tier_unavailable() => {
                tracing::warn!(%error, "visit rank rebuild not stored; serving transient copy");
                Ok(entries)
            }
            Err(error) => Err(error),
        }
    }

    async fn hydrate(&self, entries: &[RankEntry]) -> Result<Vec<RankedItem>> {
        let members: Vec<(ItemId, f64)> = entries
            .iter()
            .filter_map(|entry| match entry.member.parse::<u64>() {
                Ok(id) => Some((ItemId::new(id), entry.score)),
                Err(_) => {
                    tracing::warn!(member = %entry.member, "non-numeric rank member skipped");
                    None
                }
            })
            .collect();

        let fetches = members
            .iter()
            .map(|&(id, _)| self.details.get(id));
        let records = future::join_all(fetches).await;

        let mut items = Vec::with_capacity(members.len());
        for ((_, score), record) in members.iter().zip(records) {
            // Deleted since the last rebuild: drop from the view.
            if let Some(record) = record? {
                let mut item = RankedItem::from(&record);
                item.visit_count = *score as u64;
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn recomputed_view(&self, namespace: &str, order: OrderColumn) -> Result<Vec<RankedItem>> {
        let store = Arc::clone(&self.store);
        let items: Option<Vec<RankedItem>> = self
            .cache
            .get_or_compute(&CacheKey::singleton(namespace), move || async move {
                let rows = store
                    .query_top_n(
                        order,
                        SortDirection::Descending,
                        RANK_SIZE,
                        &RecordFilter::published(),
                    )
                    .await?;
                Ok(Some(rows.iter().map(RankedItem::from).collect()))
            })
            .await?;
        match items {
            Some(items) => Ok(items),
            // The populate closure always yields a listing, so an absent
            // result can only be the lock-timeout degrade path. An empty
            // listing would be user-visible; scan directly instead.
            None => {
                tracing::warn!(namespace, "snapshot read degraded; scanning directly");
                self.fallback_scan(order).await
            }
        }
    }

    /// Unguarded, uncached scan used when the rebuild lock cannot be had.
    async fn fallback_scan(&self, order: OrderColumn) -> Result<Vec<RankedItem>> {
        let rows = self
            .store
            .query_top_n(
                order,
                SortDirection::Descending,
                RANK_SIZE,
                &RecordFilter::published(),
            )
            .await?;
        Ok(rows.iter().map(RankedItem::from).collect())
    }
}

// =============================================================================
// Tests
// =============================================================================
