//! Cache key derivation
//!
//! Keys are derived deterministically from a namespace plus the call's
//! logical arguments: `namespace::arg1::arg2`. Identical logical inputs
//! always yield identical keys; distinct inputs yield distinct keys. The
//! same derivation is used for cache entries and single-flight locks so
//! that population of distinct logical entities never contends.

use std::fmt;

/// Separator between the namespace and each argument segment
const SEGMENT_SEPARATOR: &str = "::";

/// A cache key scoped to a named namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    namespace: String,
    full: String,
}

impl CacheKey {
    /// Derive a key from a namespace and its logical argument segments.
    ///
    /// An empty segment list addresses the namespace's singleton entry
    /// (e.g. a whole top-N listing).
    pub fn derive<S: AsRef<str>>(namespace: &str, segments: &[S]) -> Self {
        let mut full = String::from(namespace);
        for segment in segments {
            full.push_str(SEGMENT_SEPARATOR);
            full.push_str(segment.as_ref());
        }
        Self {
            namespace: namespace.to_string(),
            full,
        }
    }

    /// Key for a namespace's singleton entry.
    pub fn singleton(namespace: &str) -> Self {
        Self::derive::<&str>(namespace, &[])
    }

    /// The namespace this key belongs to.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The full key string, `namespace::arg1::arg2`.
    pub fn as_str(&self) -> &str {
        &self.full
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full)
    }
}

// =============================================================================
// Tests
// =============================================================================
