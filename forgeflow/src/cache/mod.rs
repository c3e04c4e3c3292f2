//! Skip-step cache.
//!
//! The cache never stores step output. It only remembers that a target
//! succeeded for a given version, so a later job for the same pair can mark
//! every step completed without running anything.

mod key;
mod store;

pub use key::job_cache_key;
pub use store::{CacheEntry, CacheStats, CacheStore, InMemoryCacheStore};

#[cfg(test)]
pub use store::MockCacheStore;
