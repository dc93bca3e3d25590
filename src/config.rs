//! Cache configuration
//!
//! All tier policies are fixed at startup: the [`NamespaceRegistry`] is
//! built once (from defaults or deserialized host configuration) and is
//! read-only afterwards. There is no runtime mutation of placement, TTL,
//! or capacity.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Well-known cache namespaces for the catalog workload.
pub mod namespaces {
    /// Per-item detail records, keyed by item id
    pub const ITEM_DETAIL: &str = "item:detail";
    /// Score-ordered visit ranking (shared sorted structure)
    pub const RANK_VISIT: &str = "rank:visit";
    /// Newest-items ranking (recomputed top-N)
    pub const RANK_NEWEST: &str = "rank:newest";
    /// Most-recently-updated ranking (recomputed top-N)
    pub const RANK_UPDATED: &str = "rank:updated";
    /// Category listings, keyed by work direction
    pub const CATEGORY_LIST: &str = "category:list";
}

/// Which tiers a namespace's entries live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TierPlacement {
    /// Process-local tier only
    LocalOnly,
    /// Shared tier only
    SharedOnly,
    /// Local tier first, shared tier as fallback
    LocalThenShared,
}

/// What a read does when the single-flight lock wait times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockTimeoutPolicy {
    /// Propagate `Error::LockTimeout` to the caller
    Propagate,
    /// Serve a best-effort absent result instead of failing
    Degrade,
}

/// Per-namespace cache policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TierPolicy {
    /// Maximum entries held in the local tier for this namespace
    pub max_entries: usize,
    /// Entry TTL in seconds; 0 means no expiry
    pub ttl_seconds: u64,
    /// Tier placement for this namespace
    pub placement: TierPlacement,
    /// Behavior on single-flight lock wait timeout
    pub on_lock_timeout: LockTimeoutPolicy,
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            ttl_seconds: 1800,
            placement: TierPlacement::LocalThenShared,
            on_lock_timeout: LockTimeoutPolicy::Propagate,
        }
    }
}

impl TierPolicy {
    /// Entry TTL, `None` when entries never expire.
    pub fn ttl(&self) -> Option<Duration> {
        if self.ttl_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.ttl_seconds))
        }
    }

    /// True when entries for this namespace are held in the local tier.
    pub fn uses_local(&self) -> bool {
        matches!(
            self.placement,
            TierPlacement::LocalOnly | TierPlacement::LocalThenShared
        )
    }

    /// True when entries for this namespace are held in the shared tier.
    pub fn uses_shared(&self) -> bool {
        matches!(
            self.placement,
            TierPlacement::SharedOnly | TierPlacement::LocalThenShared
        )
    }
}

/// Redis connection settings for the shared tier and lock store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// When false, the service runs in single-process mode with in-memory
    /// shared-tier and lock-store implementations
    pub enabled: bool,
    /// Redis connection URL
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Per-command timeout in milliseconds
    pub timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            timeout_ms: 5000,
        }
    }
}

/// Single-flight lock tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SingleFlightConfig {
    /// Maximum time a caller waits for the lock before timing out
    pub max_wait_ms: u64,
    /// Lease TTL; a crashed holder's lock self-expires after this long
    pub lease_ttl_ms: u64,
    /// Initial retry interval while waiting for the lock
    pub retry_initial_ms: u64,
    /// Retry interval ceiling
    pub retry_max_ms: u64,
}

impl Default for SingleFlightConfig {
    fn default() -> Self {
        Self {
            max_wait_ms: 3000,
            lease_ttl_ms: 10_000,
            retry_initial_ms: 25,
            retry_max_ms: 250,
        }
    }
}

impl SingleFlightConfig {
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lease_ttl_ms)
    }
}

/// Delayed invalidation tuning.
///
/// The grace delay is a heuristic: it should exceed the durable store's
/// expected replication lag so that repopulation reads consistent data.
/// It is not a consistency guarantee; tier TTLs remain the staleness bound.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InvalidatorConfig {
    /// Delay between a write and the eviction of affected namespaces
    pub grace_delay_ms: u64,
}

impl Default for InvalidatorConfig {
    fn default() -> Self {
        Self {
            grace_delay_ms: 1000,
        }
    }
}

impl InvalidatorConfig {
    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }
}

/// Startup-time namespace registry: name -> policy, plus the key prefix
/// applied to everything written to the shared store.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NamespaceRegistry {
    /// Prefix for shared-store keys so several applications can share one Redis
    pub shared_key_prefix: String,
    /// Registered namespaces
    pub policies: HashMap<String, TierPolicy>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        let mut policies = HashMap::new();
        policies.insert(
            namespaces::ITEM_DETAIL.to_string(),
            TierPolicy {
                max_entries: 10_000,
                ttl_seconds: 1800,
                placement: TierPlacement::LocalThenShared,
                on_lock_timeout: LockTimeoutPolicy::Propagate,
            },
        );
        policies.insert(
            namespaces::RANK_VISIT.to_string(),
            TierPolicy {
                max_entries: 1,
                ttl_seconds: 1800,
                placement: TierPlacement::SharedOnly,
                on_lock_timeout: LockTimeoutPolicy::Degrade,
            },
        );
        policies.insert(
            namespaces::RANK_NEWEST.to_string(),
            TierPolicy {
                max_entries: 1,
                ttl_seconds: 600,
                placement: TierPlacement::LocalOnly,
                on_lock_timeout: LockTimeoutPolicy::Degrade,
            },
        );
        policies.insert(
            namespaces::RANK_UPDATED.to_string(),
            TierPolicy {
                max_entries: 1,
                ttl_seconds: 600,
                placement: TierPlacement::LocalOnly,
                on_lock_timeout: LockTimeoutPolicy::Degrade,
            },
        );
        policies.insert(
            namespaces::CATEGORY_LIST.to_string(),
            TierPolicy {
                max_entries: 16,
                ttl_seconds: 3600,
                placement: TierPlacement::LocalOnly,
                on_lock_timeout: LockTimeoutPolicy::Propagate,
            },
        );
        Self {
            shared_key_prefix: "shelf:".to_string(),
            policies,
        }
    }
}

impl NamespaceRegistry {
    /// Look up the policy for a namespace.
    pub fn policy(&self, namespace: &str) -> Result<&TierPolicy> {
        self.policies
            .get(namespace)
            .ok_or_else(|| Error::UnknownNamespace(namespace.to_string()))
    }

    /// Register (or replace) a namespace policy. Intended for startup wiring
    /// only; the registry is immutable once the service is constructed.
    pub fn register(&mut self, namespace: impl Into<String>, policy: TierPolicy) {
        self.policies.insert(namespace.into(), policy);
    }

    /// All registered namespace names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

/// Top-level settings for the cache service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub redis: RedisConfig,
    pub namespaces: NamespaceRegistry,
    pub single_flight: SingleFlightConfig,
    pub invalidator: InvalidatorConfig,
}

// =============================================================================
// Tests
// =============================================================================
