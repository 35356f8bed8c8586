//! # Protocol Access
//!
//! The non-blocking interface the cache consumes from the network layer and
//! presents back to its own consumers. Readiness is polled; data is pulled in
//! chunks, with an empty chunk marking the end of the body.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use reqwest::header::HeaderMap;

use crate::error::{CacheError, CacheResult};
use crate::time_value::TimeValue;

pub mod http;
pub mod scripted;

pub use self::http::{HttpFetcher, create_client};
pub use self::scripted::{Gate, ScriptedFetcher, ScriptedResponse};

/// Result of a readiness poll: a status message and whether the next
/// `get_*` call will make progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub message: String,
    pub ready: bool,
}

impl PollStatus {
    pub fn ready() -> Self {
        Self {
            message: "Ready".to_string(),
            ready: true,
        }
    }

    pub fn pending(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ready: false,
        }
    }
}

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
}

impl ResponseMeta {
    pub fn new(status: u16, reason: impl Into<String>, headers: HeaderMap) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers,
        }
    }

    /// Header value as text, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A protocol access object: one in-flight fetch or cache read.
///
/// `get_meta` and `get_data` must only be called after the matching poll
/// reported ready; otherwise implementations return [`CacheError::NotReady`].
pub trait ProtocolAccess: Send {
    fn poll_meta(&mut self) -> PollStatus;

    fn get_meta(&mut self) -> CacheResult<ResponseMeta>;

    fn poll_data(&mut self) -> PollStatus;

    /// Up to `max_bytes` of body. An empty chunk means the body is complete.
    fn get_data(&mut self, max_bytes: usize) -> CacheResult<Bytes>;

    fn close(&mut self);
}

/// Request method. Only GET responses are ever cached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

impl FromStr for Method {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            other => Err(CacheError::Fetch(format!("Unsupported method: {other}"))),
        }
    }
}

/// Everything the network layer needs to start a fetch.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: Method,
    /// Extra request headers supplied by the consumer
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
    /// Set for a conditional request revalidating a cached copy
    pub if_modified_since: Option<TimeValue>,
    /// Forced reload: intermediaries must not answer from their caches
    pub reload: bool,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            headers: HeaderMap::new(),
            body: None,
            if_modified_since: None,
            reload: false,
        }
    }
}

/// Starts fetches. Implemented by the network layer.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> CacheResult<Box<dyn ProtocolAccess>>;
}
