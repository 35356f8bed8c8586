//! # Scripted Fetcher
//!
//! An in-memory [`Fetcher`] that answers from canned responses. Used for
//! exercising the cache without a network.
//! Responses can be held behind a [`Gate`] to keep a fetch in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

use crate::error::{CacheError, CacheResult};
use crate::protocol::{Fetcher, FetchRequest, PollStatus, ProtocolAccess, ResponseMeta};

/// Holds a scripted response "in flight" until opened.
#[derive(Debug, Clone, Default)]
pub struct Gate(Arc<AtomicBool>);

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// A canned response.
#[derive(Debug, Clone)]
pub struct ScriptedResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HeaderMap,
    pub chunks: Vec<Bytes>,
    pub gate: Option<Gate>,
}

impl ScriptedResponse {
    /// `200 OK` with the given content type and body.
    pub fn ok(content_type: &str, body: impl Into<Bytes>) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        Self {
            status: 200,
            reason: "OK".to_string(),
            headers,
            chunks: vec![body.into()],
            gate: None,
        }
    }

    pub fn not_modified() -> Self {
        Self {
            status: 304,
            reason: "Not Modified".to_string(),
            headers: HeaderMap::new(),
            chunks: Vec::new(),
            gate: None,
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found".to_string(),
            headers: HeaderMap::new(),
            chunks: Vec::new(),
            gate: None,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Split the body into the given chunks.
    pub fn with_chunks<I, B>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        self.chunks = chunks
            .into_iter()
            .map(Into::into)
            .filter(|chunk: &Bytes| !chunk.is_empty())
            .collect();
        self
    }

    pub fn gated(mut self, gate: Gate) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[derive(Default)]
struct Script {
    routes: HashMap<String, ScriptedResponse>,
    requests: Vec<FetchRequest>,
}

/// [`Fetcher`] serving [`ScriptedResponse`]s by exact URL.
#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    script: Arc<Mutex<Script>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `response` for every fetch of `url`.
    pub fn respond(&self, url: &str, response: ScriptedResponse) {
        self.script.lock().routes.insert(url.to_string(), response);
    }

    /// Number of fetches started for `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.script
            .lock()
            .requests
            .iter()
            .filter(|r| r.url == url)
            .count()
    }

    /// Every request seen so far, oldest first.
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.script.lock().requests.clone()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(&self, request: &FetchRequest) -> CacheResult<Box<dyn ProtocolAccess>> {
        let mut script = self.script.lock();
        script.requests.push(request.clone());
        let response = script
            .routes
            .get(&request.url)
            .cloned()
            .unwrap_or_else(ScriptedResponse::not_found);
        Ok(Box::new(ScriptedAccess {
            response,
            next_chunk: 0,
            closed: false,
        }))
    }
}

struct ScriptedAccess {
    response: ScriptedResponse,
    next_chunk: usize,
    closed: bool,
}

impl ScriptedAccess {
    fn released(&self) -> bool {
        self.response.gate.as_ref().is_none_or(Gate::is_open)
    }
}

impl ProtocolAccess for ScriptedAccess {
    fn poll_meta(&mut self) -> PollStatus {
        if self.released() {
            PollStatus::ready()
        } else {
            PollStatus::pending("Waiting for response")
        }
    }

    fn get_meta(&mut self) -> CacheResult<ResponseMeta> {
        if !self.released() {
            return Err(CacheError::NotReady);
        }
        Ok(ResponseMeta::new(
            self.response.status,
            self.response.reason.clone(),
            self.response.headers.clone(),
        ))
    }

    fn poll_data(&mut self) -> PollStatus {
        self.poll_meta()
    }

    fn get_data(&mut self, max_bytes: usize) -> CacheResult<Bytes> {
        if self.closed {
            return Err(CacheError::Closed);
        }
        if !self.released() {
            return Err(CacheError::NotReady);
        }
        let Some(chunk) = self.response.chunks.get_mut(self.next_chunk) else {
            return Ok(Bytes::new());
        };
        let take = max_bytes.max(1).min(chunk.len());
        let data = chunk.split_to(take);
        if chunk.is_empty() {
            self.next_chunk += 1;
        }
        Ok(data)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
