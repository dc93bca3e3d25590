//! Error types for the shelfcache core

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache core.
///
/// Logical absence is never an error: lookups and population return
/// `Ok(None)` when the durable store has no matching record.
#[derive(Error, Debug)]
pub enum Error {
    /// Durable store error surfaced by a gateway implementation
    #[error("durable store error: {0}")]
    Store(String),

    /// Population failed for a cache key; no tier was written
    #[error("population failed for {key}: {source}")]
    PopulateFailed {
        key: String,
        #[source]
        source: Box<Error>,
    },

    /// Single-flight lock wait exceeded the configured bound
    #[error("single-flight lock wait exceeded {waited:?} for {key}")]
    LockTimeout { key: String, waited: Duration },

    /// Shared tier unreachable or misbehaving
    #[error("shared tier unavailable: {0}")]
    TierUnavailable(String),

    /// Redis pool error
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// Redis command error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Cached payload (de)serialization error
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Lookup against a namespace the registry does not know
    #[error("unknown cache namespace: {0}")]
    UnknownNamespace(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that only mean the shared tier could not be reached.
    ///
    /// The orchestrator degrades these to a cache miss instead of failing
    /// the read.
    pub fn is_tier_unavailable(&self) -> bool {
        matches!(
            self,
            Error::TierUnavailable(_) | Error::Pool(_) | Error::Redis(_)
        )
    }
}

// =============================================================================
// Tests
// =============================================================================
