//! Cache tiers
//!
//! Two tiers with fixed precedence: the process-local fast tier is always
//! consulted before the shared network tier. Entries flow downward on
//! write-through and upward on promotion after a shared hit.

mod entry;
mod local;
mod shared;

pub use entry::TierEntry;
pub use local::{LocalTier, LocalTierStats};
pub use shared::{build_redis_pool, InMemorySharedTier, RankEntry, RedisTier, SharedTier};
