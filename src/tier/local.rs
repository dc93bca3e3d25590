//! Local tier - process-private fast cache
//!
//! One concurrent map per registered namespace, sized and TTL-bounded by
//! that namespace's [`TierPolicy`]. Reads are lock-free via `DashMap`;
//! capacity is enforced with LRU-ish eviction (least recently touched
//! entry goes first). Hit/miss/eviction counts are tracked per namespace.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;

use super::entry::TierEntry;
use crate::config::NamespaceRegistry;
use crate::key::CacheKey;

/// Per-namespace storage and counters.
struct NamespaceCache {
    entries: DashMap<String, TierEntry>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl NamespaceCache {
    fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        if let Some(entry) = self.entries.get(key) {
            if entry.is_expired() {
                drop(entry);
                self.entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            entry.touch();
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry.data());
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn put(&self, key: String, entry: TierEntry) {
        if self.max_entries > 0 && !self.entries.contains_key(&key) {
            while self.entries.len() >= self.max_entries {
                if !self.evict_one() {
                    break;
                }
            }
        }
        self.entries.insert(key, entry);
    }

    /// Evict the expired-or-least-recently-touched entry. Returns false
    /// when the map is empty.
    fn evict_one(&self) -> bool {
        let mut victim: Option<(String, u64)> = None;
        for item in self.entries.iter() {
            if item.is_expired() {
                victim = Some((item.key().clone(), 0));
                break;
            }
            let recency = item.recency();
            match &victim {
                Some((_, best)) if *best <= recency => {}
                _ => victim = Some((item.key().clone(), recency)),
            }
        }
        match victim {
            Some((key, _)) => {
                if self.entries.remove(&key).is_some() {
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                true
            }
            None => false,
        }
    }
}

/// Snapshot of a namespace's local-tier counters.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTierStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_ratio: f64,
}

/// Process-local fast tier.
///
/// The namespace set is fixed at construction from the registry; lookups
/// against unregistered namespaces are plain misses and writes to them
/// are dropped.
pub struct LocalTier {
    caches: HashMap<String, NamespaceCache>,
}

impl LocalTier {
    /// Build the tier from the startup registry. Only namespaces placed
    /// in the local tier get a map.
    pub fn from_registry(registry: &NamespaceRegistry) -> Self {
        let mut caches = HashMap::new();
        for (name, policy) in &registry.policies {
            if policy.uses_local() {
                caches.insert(name.clone(), NamespaceCache::new(policy.max_entries));
            }
        }
        Self { caches }
    }

    /// Look up a key. Expired entries are dropped on the way out.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        self.caches.get(key.namespace())?.get(key.as_str())
    }

    /// Insert a value with the given TTL. Returns false when the key's
    /// namespace has no local placement.
    pub fn put(&self, key: &CacheKey, value: Bytes, ttl: Option<Duration>) -> bool {
        match self.caches.get(key.namespace()) {
            Some(cache) => {
                cache.put(key.as_str().to_string(), TierEntry::new(value, ttl));
                true
            }
            None => false,
        }
    }

    /// Drop a single entry.
    pub fn evict(&self, key: &CacheKey) {
        if let Some(cache) = self.caches.get(key.namespace()) {
            cache.entries.remove(key.as_str());
        }
    }

    /// Drop every entry in a namespace.
    pub fn evict_namespace(&self, namespace: &str) {
        if let Some(cache) = self.caches.get(namespace) {
            cache.entries.clear();
        }
    }

    /// Entries currently held for a namespace.
    pub fn len(&self, namespace: &str) -> usize {
        self.caches
            .get(namespace)
            .map(|cache| cache.entries.len())
            .unwrap_or(0)
    }

    /// Counter snapshot for a namespace, `None` if it has no local placement.
    pub fn stats(&self, namespace: &str) -> Option<LocalTierStats> {
        let cache = self.caches.get(namespace)?;
        let hits = cache.hits.load(Ordering::Relaxed);
        let misses = cache.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        Some(LocalTierStats {
            entries: cache.entries.len(),
            hits,
            misses,
            evictions: cache.evictions.load(Ordering::Relaxed),
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LockTimeoutPolicy, TierPlacement, TierPolicy};

    fn registry(max_entries: usize, ttl_seconds: u64) -> NamespaceRegistry {
        let mut registry = NamespaceRegistry::default();
        registry.register(
            "test:ns",
            TierPolicy {
                max_entries,
                ttl_seconds,
                placement: TierPlacement::LocalOnly,
                on_lock_timeout: LockTimeoutPolicy::Propagate,
            },
        );
        registry
    }

    fn key(segment: &str) -> CacheKey {
        CacheKey::derive("test:ns", &[segment])
    }

    #[test]
    fn test_put_get_roundtrip() {
        let tier = LocalTier::from_registry(&registry(10, 0));
        assert!(tier.put(&key("a"), Bytes::from_static(b"value"), None));
        assert_eq!(tier.get(&key("a")), Some(Bytes::from_static(b"value")));
        assert_eq!(tier.len("test:ns"), 1);
    }

    #[test]
    fn test_miss_on_absent_key() {
        let tier = LocalTier::from_registry(&registry(10, 0));
        assert_eq!(tier.get(&key("absent")), None);
        let stats = tier.stats("test:ns").unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 0);
    }

    #[test]
    fn test_unregistered_namespace_is_a_miss() {
        let tier = LocalTier::from_registry(&registry(10, 0));
        let foreign = CacheKey::derive("unregistered", &["x"]);
        assert!(!tier.put(&foreign, Bytes::from_static(b"v"), None));
        assert_eq!(tier.get(&foreign), None);
        assert!(tier.stats("unregistered").is_none());
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let tier = LocalTier::from_registry(&registry(10, 0));
        tier.put(
            &key("a"),
            Bytes::from_static(b"v"),
            Some(Duration::from_millis(20)),
        );
        assert!(tier.get(&key("a")).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(tier.get(&key("a")), None);
        assert_eq!(tier.len("test:ns"), 0);
    }

    #[test]
    fn test_capacity_evicts_least_recently_touched() {
        let tier = LocalTier::from_registry(&registry(3, 0));
        for name in ["a", "b", "c"] {
            tier.put(&key(name), Bytes::from_static(b"v"), None);
        }
        // Touch a and b so c is the coldest.
        std::thread::sleep(Duration::from_millis(5));
        tier.get(&key("a"));
        tier.get(&key("b"));

        tier.put(&key("d"), Bytes::from_static(b"v"), None);

        assert_eq!(tier.len("test:ns"), 3);
        assert!(tier.get(&key("c")).is_none());
        assert!(tier.get(&key("a")).is_some());
        assert!(tier.get(&key("d")).is_some());
        assert_eq!(tier.stats("test:ns").unwrap().evictions, 1);
    }

    #[test]
    fn test_replacing_existing_key_does_not_evict() {
        let tier = LocalTier::from_registry(&registry(2, 0));
        tier.put(&key("a"), Bytes::from_static(b"1"), None);
        tier.put(&key("b"), Bytes::from_static(b"2"), None);
        tier.put(&key("a"), Bytes::from_static(b"3"), None);

        assert_eq!(tier.len("test:ns"), 2);
        assert_eq!(tier.get(&key("a")), Some(Bytes::from_static(b"3")));
        assert_eq!(tier.stats("test:ns").unwrap().evictions, 0);
    }

    #[test]
    fn test_evict_namespace_clears_everything() {
        let tier = LocalTier::from_registry(&registry(10, 0));
        for name in ["a", "b", "c"] {
            tier.put(&key(name), Bytes::from_static(b"v"), None);
        }
        tier.evict_namespace("test:ns");
        assert_eq!(tier.len("test:ns"), 0);
    }

    #[test]
    fn test_evict_single_key() {
        let tier = LocalTier::from_registry(&registry(10, 0));
        tier.put(&key("a"), Bytes::from_static(b"v"), None);
        tier.put(&key("b"), Bytes::from_static(b"v"), None);
        tier.evict(&key("a"));
        assert!(tier.get(&key("a")).is_none());
        assert!(tier.get(&key("b")).is_some());
    }

    #[test]
    fn test_hit_ratio() {
        let tier = LocalTier::from_registry(&registry(10, 0));
        tier.put(&key("a"), Bytes::from_static(b"v"), None);
        tier.get(&key("a"));
        tier.get(&key("a"));
        tier.get(&key("absent"));

        let stats = tier.stats("test:ns").unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_ratio - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let tier = Arc::new(LocalTier::from_registry(&registry(100_000, 0)));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tier = Arc::clone(&tier);
                thread::spawn(move || {
                    for i in 0..500 {
                        let k = key(&format!("{t}-{i}"));
                        tier.put(&k, Bytes::from_static(b"v"), None);
                        assert!(tier.get(&k).is_some());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(tier.len("test:ns"), 4000);
    }
}
