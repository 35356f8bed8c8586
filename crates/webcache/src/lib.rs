//! # Webcache Engine
//!
//! A persistent disk cache for document retrieval. Fetched documents are
//! stored in size-budgeted on-disk stores whose metadata is journaled to a
//! transaction log, so the index survives restarts without re-reading the
//! payloads. Consumers of the same URL share a single fetch or cache read.
//!
//! ## Features
//!
//! - Crash-consistent transaction log with versioned replay and checkpoints
//! - Expiry sweep plus LRU eviction over a shared byte budget
//! - Per-session, periodic, always or never freshness policies
//! - HTTP cacheability rules (`Pragma`, `Expires`, `Cache-Control`)
//! - Conditional revalidation with `If-Modified-Since`
//! - Shared in-flight fetches: late consumers replay the same stream

pub mod builder;
pub mod config;
pub mod error;
pub mod key;
pub mod manager;
pub mod protocol;
pub mod shared;
pub mod store;
pub mod time_value;

pub use builder::CacheConfigBuilder;
pub use config::{CacheConfig, FreshnessMode};
pub use error::{CacheError, CacheResult};
pub use key::CacheKey;
pub use manager::{CacheManager, CacheStats, Cacheability, FreshnessPolicy};
pub use protocol::{
    FetchRequest, Fetcher, HttpFetcher, Method, PollStatus, ProtocolAccess, ResponseMeta,
    create_client,
};
pub use shared::{ItemState, SharedApi};
pub use store::{CacheEntry, DiskCacheAccess, DiskStore, Document, StoreId};
pub use time_value::TimeValue;
