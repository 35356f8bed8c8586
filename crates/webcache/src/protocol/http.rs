//! # HTTP Fetcher
//!
//! Network collaborator backed by `reqwest`. Each fetch runs as a tokio task
//! that forwards the response into a channel; the access object only ever
//! drains that channel, so its poll methods never block.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, HeaderValue, IF_MODIFIED_SINCE, PRAGMA};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::protocol::{Fetcher, FetchRequest, Method, PollStatus, ProtocolAccess, ResponseMeta};

/// Create a reqwest client suitable for document retrieval
pub fn create_client(user_agent: &str, timeout: Duration) -> CacheResult<Client> {
    let mut builder = Client::builder()
        .user_agent(user_agent)
        .redirect(reqwest::redirect::Policy::limited(10));

    if !timeout.is_zero() {
        builder = builder.timeout(timeout);
    }

    builder
        .build()
        .map_err(|e| CacheError::Fetch(format!("Failed to build HTTP client: {e}")))
}

#[derive(Debug)]
enum FetchEvent {
    Meta(ResponseMeta),
    Data(Bytes),
    Done,
    Failed(String),
}

/// [`Fetcher`] that performs real HTTP requests.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    runtime: Handle,
}

impl HttpFetcher {
    /// Create a fetcher that spawns onto the current tokio runtime.
    pub fn new(client: Client) -> CacheResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| CacheError::Fetch(format!("No tokio runtime available: {e}")))?;
        Ok(Self::with_handle(client, runtime))
    }

    pub fn with_handle(client: Client, runtime: Handle) -> Self {
        Self { client, runtime }
    }

    fn build(&self, request: &FetchRequest) -> reqwest::RequestBuilder {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        builder = builder.headers(request.headers.clone());

        if let Some(since) = &request.if_modified_since {
            if let Ok(value) = HeaderValue::from_str(since.to_http_string()) {
                builder = builder.header(IF_MODIFIED_SINCE, value);
            }
        }

        if request.reload {
            builder = builder
                .header(PRAGMA, HeaderValue::from_static("no-cache"))
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        }

        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        builder
    }
}

async fn run_fetch(builder: reqwest::RequestBuilder, events: UnboundedSender<FetchEvent>) {
    let response = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            let _ = events.send(FetchEvent::Failed(e.to_string()));
            return;
        }
    };

    let status = response.status();
    let meta = ResponseMeta::new(
        status.as_u16(),
        status.canonical_reason().unwrap_or_default(),
        response.headers().clone(),
    );
    if events.send(FetchEvent::Meta(meta)).is_err() {
        return;
    }

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let event = match chunk {
            Ok(bytes) => FetchEvent::Data(bytes),
            Err(e) => FetchEvent::Failed(e.to_string()),
        };
        let failed = matches!(event, FetchEvent::Failed(_));
        if events.send(event).is_err() || failed {
            return;
        }
    }

    let _ = events.send(FetchEvent::Done);
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> CacheResult<Box<dyn ProtocolAccess>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = self.runtime.spawn(run_fetch(self.build(request), tx));
        debug!(url = %request.url, method = %request.method, "Started HTTP fetch");

        Ok(Box::new(HttpAccess {
            url: request.url.clone(),
            events: Some(rx),
            task: Some(task),
            meta: None,
            pending: VecDeque::new(),
            done: false,
            failure: None,
        }))
    }
}

struct HttpAccess {
    url: String,
    events: Option<UnboundedReceiver<FetchEvent>>,
    task: Option<JoinHandle<()>>,
    meta: Option<ResponseMeta>,
    pending: VecDeque<Bytes>,
    done: bool,
    failure: Option<String>,
}

impl HttpAccess {
    fn drain(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        loop {
            match events.try_recv() {
                Ok(FetchEvent::Meta(meta)) => self.meta = Some(meta),
                Ok(FetchEvent::Data(bytes)) if !bytes.is_empty() => self.pending.push_back(bytes),
                Ok(FetchEvent::Data(_)) => {}
                Ok(FetchEvent::Done) => self.done = true,
                Ok(FetchEvent::Failed(reason)) => {
                    warn!(url = %self.url, error = %reason, "HTTP fetch failed");
                    self.failure = Some(reason);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.done && self.failure.is_none() {
                        self.failure = Some("connection closed".to_string());
                    }
                    break;
                }
            }
        }
    }
}

impl ProtocolAccess for HttpAccess {
    fn poll_meta(&mut self) -> PollStatus {
        self.drain();
        if self.meta.is_some() || self.failure.is_some() {
            PollStatus::ready()
        } else {
            PollStatus::pending("Waiting for response")
        }
    }

    fn get_meta(&mut self) -> CacheResult<ResponseMeta> {
        self.drain();
        if let Some(meta) = &self.meta {
            return Ok(meta.clone());
        }
        match &self.failure {
            Some(reason) => Err(CacheError::Fetch(reason.clone())),
            None => Err(CacheError::NotReady),
        }
    }

    fn poll_data(&mut self) -> PollStatus {
        self.drain();
        if !self.pending.is_empty() || self.done || self.failure.is_some() {
            PollStatus::ready()
        } else {
            PollStatus::pending("Receiving data")
        }
    }

    fn get_data(&mut self, max_bytes: usize) -> CacheResult<Bytes> {
        self.drain();
        let max_bytes = max_bytes.max(1);
        if let Some(mut chunk) = self.pending.pop_front() {
            if chunk.len() > max_bytes {
                let rest = chunk.split_off(max_bytes);
                self.pending.push_front(rest);
            }
            return Ok(chunk);
        }
        if let Some(reason) = &self.failure {
            return Err(CacheError::Fetch(reason.clone()));
        }
        if self.done {
            return Ok(Bytes::new());
        }
        Err(CacheError::NotReady)
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.events = None;
    }
}

impl Drop for HttpAccess {
    fn drop(&mut self) {
        self.close();
    }
}
