//! # Disk Store
//!
//! A size-budgeted persistent store of cached documents. Each store owns one
//! directory holding the payload files and the transaction log that lets the
//! in-memory index be rebuilt at startup without reading the payloads.

mod access;
mod disk;
mod entry;
mod log;
mod lru;
mod naming;

pub use access::DiskCacheAccess;
pub use disk::{DiskStore, MakeRoom};
pub use entry::CacheEntry;
pub use log::{ACCEPTED_VERSIONS, CHECKPOINT_FILE, LOG_FILE, LOG_VERSION, LogRecord, TransactionLog};
pub use lru::LruOrder;
pub use naming::{FileNamer, is_payload_name};

use std::fmt;

use bytes::Bytes;

use crate::error::CacheError;
use crate::key::CacheKey;
use crate::protocol::ResponseMeta;

/// Identifies a store within its manager. Ids are never reused, so an id
/// outliving its store can be detected and forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StoreId(pub(crate) u64);

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store-{}", self.0)
    }
}

/// A completed response ready to be written to a store.
#[derive(Debug, Clone)]
pub struct Document {
    pub key: CacheKey,
    pub url: String,
    pub meta: ResponseMeta,
    pub body: Vec<Bytes>,
}

impl Document {
    pub fn len(&self) -> u64 {
        self.body.iter().map(|chunk| chunk.len() as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.body.iter().all(Bytes::is_empty)
    }
}

/// Outcome of reading a cached entry.
#[derive(Debug)]
pub enum ReadOutcome {
    Hit(DiskCacheAccess),
    /// The entry is expired or its payload is gone; the carried error says
    /// which. The caller evicts the entry and treats the read as a miss.
    NeedsEviction(CacheError),
}
