//! Durable store gateway port
//!
//! The cache core never talks to a database directly. It consumes this
//! narrow read interface; the surrounding application implements it on
//! top of whatever query layer it uses. An in-memory implementation ships
//! here for single-process use and tests.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// Catalog item identifier (value object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub u64);

impl ItemId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ItemId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// A catalog item row as the durable store returns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecord {
    pub id: ItemId,
    pub category_id: u64,
    pub category_name: String,
    pub title: String,
    pub author: String,
    pub cover_url: String,
    pub summary: String,
    /// Title of the most recent section, if any has been published
    pub latest_section: Option<String>,
    pub word_count: u64,
    pub visit_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A catalog category row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: u64,
    pub name: String,
    /// Reading direction the category belongs to (e.g. 0 = male-oriented
    /// shelf, 1 = female-oriented shelf)
    pub work_direction: u8,
}

/// Column an ordered range query sorts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderColumn {
    VisitCount,
    CreatedAt,
    UpdatedAt,
}

/// Sort direction for ordered range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Row filter for range queries and counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    /// Only rows with strictly more words than this
    pub min_word_count: Option<u64>,
    /// Only rows in this category
    pub category_id: Option<u64>,
}

impl RecordFilter {
    /// The listing filter the catalog uses everywhere: published items only.
    pub fn published() -> Self {
        Self {
            min_word_count: Some(0),
            ..Self::default()
        }
    }

    /// Whether a record passes this filter.
    pub fn matches(&self, record: &CatalogRecord) -> bool {
        if let Some(min) = self.min_word_count {
            if record.word_count <= min {
                return false;
            }
        }
        if let Some(category) = self.category_id {
            if record.category_id != category {
                return false;
            }
        }
        true
    }
}

// =============================================================================
// Store Gateway Port
// =============================================================================

/// Port for reading the catalog's source of truth.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    /// Fetch a single record by id. `Ok(None)` means the row does not exist.
    async fn get_by_id(&self, id: ItemId) -> Result<Option<CatalogRecord>>;

    /// Fetch the top `n` records ordered by `order` in `direction`,
    /// restricted to rows matching `filter`.
    async fn query_top_n(
        &self,
        order: OrderColumn,
        direction: SortDirection,
        n: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<CatalogRecord>>;

    /// Count rows matching `filter`.
    async fn count_where(&self, filter: &RecordFilter) -> Result<u64>;

    /// List the categories for one reading direction, id-ascending.
    async fn list_categories(&self, work_direction: u8) -> Result<Vec<CategoryRecord>>;
}

// =============================================================================
// In-Memory Store
// =============================================================================

/// In-memory store gateway for single-process use and testing.
///
/// Tracks how many point lookups and range scans it has served so tests
/// can assert that caching actually suppressed store traffic.
pub struct InMemoryStore {
    records: DashMap<u64, CatalogRecord>,
    categories: DashMap<u64, CategoryRecord>,
    detail_queries: AtomicU64,
    scan_queries: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            categories: DashMap::new(),
            detail_queries: AtomicU64::new(0),
            scan_queries: AtomicU64::new(0),
        }
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: CatalogRecord) {
        self.records.insert(record.id.0, record);
    }

    /// Insert or replace a category.
    pub fn insert_category(&self, category: CategoryRecord) {
        self.categories.insert(category.id, category);
    }

    /// Remove a record, returning it if present.
    pub fn remove(&self, id: ItemId) -> Option<CatalogRecord> {
        self.records.remove(&id.0).map(|(_, record)| record)
    }

    /// Number of range scans served so far.
    pub fn scan_count(&self) -> u64 {
        self.scan_queries.load(Ordering::Relaxed)
    }

    /// Number of point lookups served so far.
    pub fn detail_count(&self) -> u64 {
        self.detail_queries.load(Ordering::Relaxed)
    }

    fn sort_key(record: &CatalogRecord, order: OrderColumn) -> i64 {
        match order {
            OrderColumn::VisitCount => record.visit_count as i64,
            OrderColumn::CreatedAt => record.created_at.timestamp(),
            OrderColumn::UpdatedAt => record.updated_at.timestamp(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StoreGateway for InMemoryStore {
    async fn get_by_id(&self, id: ItemId) -> Result<Option<CatalogRecord>> {
        self.detail_queries.fetch_add(1, Ordering::Relaxed);
        Ok(self.records.get(&id.0).map(|entry| entry.clone()))
    }

    async fn query_top_n(
        &self,
        order: OrderColumn,
        direction: SortDirection,
        n: usize,
        filter: &RecordFilter,
    ) -> Result<Vec<CatalogRecord>> {
        self.scan_queries.fetch_add(1, Ordering::Relaxed);

        let mut rows: Vec<CatalogRecord> = self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.clone())
            .collect();

        // Ties break by id so test fixtures stay deterministic.
        rows.sort_by(|a, b| {
            let ka = Self::sort_key(a, order);
            let kb = Self::sort_key(b, order);
            match direction {
                SortDirection::Ascending => ka.cmp(&kb).then(a.id.0.cmp(&b.id.0)),
                SortDirection::Descending => kb.cmp(&ka).then(a.id.0.cmp(&b.id.0)),
            }
        });
        rows.truncate(n);
        Ok(rows)
    }

    async fn count_where(&self, filter: &RecordFilter) -> Result<u64> {
        Ok(self
            .records
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .count() as u64)
    }

    async fn list_categories(&self, work_direction: u8) -> Result<Vec<CategoryRecord>> {
        let mut rows: Vec<CategoryRecord> = self
            .categories
            .iter()
            .filter(|entry| entry.work_direction == work_direction)
            .map(|entry| entry.clone())
            .collect();
        rows.sort_by_key(|category| category.id);
        Ok(rows)
    }
}

// =============================================================================
// Tests
// =============================================================================
