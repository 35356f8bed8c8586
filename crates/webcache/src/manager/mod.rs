//! # Cache Manager
//!
//! Coordinates the disk stores, the key → store index, the freshness and
//! cacheability policies, and the table of active shared items.

mod cache_manager;
mod freshness;
pub mod policy;

pub use cache_manager::CacheManager;
pub(crate) use cache_manager::{ManagerInner, deactivate};
pub use freshness::FreshnessPolicy;
pub use policy::{CACHEABLE_SCHEMES, Cacheability, Refusal};

use serde::Serialize;

/// Snapshot of the manager's bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub stores: usize,
    pub entries: usize,
    /// Bytes held across all stores
    pub size: u64,
    /// Budget of the primary store
    pub max_size: u64,
    /// Shared items with at least one consumer
    pub active: usize,
}
