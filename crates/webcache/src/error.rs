use std::io;
use std::path::PathBuf;

/// Errors produced by the disk cache subsystem.
///
/// `Expired` and `MissingPayload` are never surfaced to a consumer: the
/// manager recovers from them by evicting the entry and fetching live.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache entry expired")]
    Expired,

    #[error("Cached payload missing at {path:?}: {source}")]
    MissingPayload {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cache file error at {path:?}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot make room for {requested} bytes in a cache of {max_size} bytes")]
    CacheExhausted { requested: u64, max_size: u64 },

    #[error("No cache entry for key {0}")]
    NotFound(String),

    #[error("Transaction log error at {path:?}: {source}")]
    Log {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Data not ready")]
    NotReady,

    #[error("Handle already closed")]
    Closed,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CacheError {
    /// True for the conditions that mean "evict the entry and treat as a miss".
    pub fn needs_eviction(&self) -> bool {
        matches!(self, CacheError::Expired | CacheError::MissingPayload { .. })
    }
}

/// Result of a cache operation
pub type CacheResult<T> = std::result::Result<T, CacheError>;
