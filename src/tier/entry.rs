//! Tier entry types

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;

/// A cached value with optional expiry and access tracking.
///
/// Values are serialized payloads (`Bytes`), so cloning an entry is cheap
/// and transfers between tiers always copy the payload reference rather
/// than sharing mutable state.
#[derive(Debug)]
pub struct TierEntry {
    data: Bytes,
    created_at: Instant,
    expires_at: Option<Instant>,
    /// Milliseconds since entry creation at last access; drives LRU-ish
    /// eviction in the local tier
    last_access_ms: AtomicU64,
}

impl TierEntry {
    /// Create a new entry, expiring `ttl` from now when given.
    pub fn new(data: Bytes, ttl: Option<Duration>) -> Self {
        let created_at = Instant::now();
        Self {
            data,
            created_at,
            expires_at: ttl.map(|ttl| created_at + ttl),
            last_access_ms: AtomicU64::new(0),
        }
    }

    /// The cached payload.
    #[inline]
    pub fn data(&self) -> Bytes {
        self.data.clone()
    }

    /// Payload size in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Whether the entry's TTL has elapsed.
    #[inline]
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Record an access for recency tracking.
    #[inline]
    pub fn touch(&self) {
        let elapsed = self.created_at.elapsed().as_millis() as u64;
        self.last_access_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Recency score: larger means more recently used.
    #[inline]
    pub fn recency(&self) -> u64 {
        self.last_access_ms.load(Ordering::Relaxed)
    }
}

impl Clone for TierEntry {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_access_ms: AtomicU64::new(self.last_access_ms.load(Ordering::Relaxed)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let entry = TierEntry::new(Bytes::from_static(b"v"), None);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let entry = TierEntry::new(Bytes::from_static(b"v"), Some(Duration::from_millis(20)));
        assert!(!entry.is_expired());
        std::thread::sleep(Duration::from_millis(40));
        assert!(entry.is_expired());
    }

    #[test]
    fn test_touch_advances_recency() {
        let entry = TierEntry::new(Bytes::from_static(b"v"), None);
        assert_eq!(entry.recency(), 0);
        std::thread::sleep(Duration::from_millis(5));
        entry.touch();
        assert!(entry.recency() >= 5);
    }

    #[test]
    fn test_clone_preserves_payload_and_expiry() {
        let entry = TierEntry::new(Bytes::from_static(b"payload"), Some(Duration::from_secs(60)));
        entry.touch();
        let cloned = entry.clone();
        assert_eq!(cloned.data(), Bytes::from_static(b"payload"));
        assert_eq!(cloned.size(), 7);
        assert!(!cloned.is_expired());
    }
}
