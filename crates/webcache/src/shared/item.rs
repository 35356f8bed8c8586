use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::manager::{ManagerInner, deactivate};
use crate::protocol::{Method, PollStatus, ProtocolAccess, ResponseMeta};
use crate::shared::api::SharedApi;
use crate::store::{DiskCacheAccess, Document};

const READ_CHUNK: usize = 16 * 1024;
const NOT_MODIFIED: u16 = 304;
const OK: u16 = 200;

/// Lifecycle of a shared item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    /// A network fetch is in progress
    Fetching,
    /// The origin confirmed the cached copy; held until that copy delivers
    /// its first data
    Revalidating,
    /// All data is available from the buffer or the cached copy, or the
    /// fetch failed for good
    Ready,
}

/// Read position of one consumer: chunk index and offset within it.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Cursor {
    chunk: usize,
    offset: usize,
}

struct ItemInner {
    state: ItemState,
    source: Option<Box<dyn ProtocolAccess>>,
    /// Cached copy held while a conditional request is outstanding
    fallback: Option<DiskCacheAccess>,
    meta: Option<ResponseMeta>,
    chunks: Vec<Bytes>,
    complete: bool,
    failure: Option<String>,
    refcount: usize,
    /// Hand the finished body to the manager for caching
    store_on_complete: bool,
    /// Replace any existing cache entry when storing
    reload: bool,
}

impl ItemInner {
    fn new(state: ItemState, source: Box<dyn ProtocolAccess>) -> Self {
        Self {
            state,
            source: Some(source),
            fallback: None,
            meta: None,
            chunks: Vec::new(),
            complete: false,
            failure: None,
            refcount: 0,
            store_on_complete: false,
            reload: false,
        }
    }

    fn fail(&mut self, error: CacheError) {
        if let Some(mut source) = self.source.take() {
            source.close();
        }
        if let Some(mut fallback) = self.fallback.take() {
            fallback.close();
        }
        self.failure = Some(error.to_string());
        self.state = ItemState::Ready;
    }

    fn has_unread(&self, cursor: &Cursor) -> bool {
        self.chunks
            .get(cursor.chunk)
            .is_some_and(|chunk| cursor.offset < chunk.len())
    }

    fn read_buffered(&self, cursor: &mut Cursor, max_bytes: usize) -> Option<Bytes> {
        let chunk = self.chunks.get(cursor.chunk)?;
        let end = chunk.len().min(cursor.offset + max_bytes.max(1));
        let data = chunk.slice(cursor.offset..end);
        if end == chunk.len() {
            cursor.chunk += 1;
            cursor.offset = 0;
        } else {
            cursor.offset = end;
        }
        Some(data)
    }
}

/// One fetch or cache read shared by every consumer of a URL.
pub struct SharedItem {
    key: CacheKey,
    url: String,
    method: Method,
    manager: Option<Weak<ManagerInner>>,
    inner: Mutex<ItemInner>,
}

impl SharedItem {
    /// An item fed by a live fetch. With a manager the finished body is
    /// offered to the cache.
    pub(crate) fn live(
        key: CacheKey,
        url: impl Into<String>,
        method: Method,
        source: Box<dyn ProtocolAccess>,
        manager: Option<Weak<ManagerInner>>,
        reload: bool,
    ) -> Arc<Self> {
        let mut inner = ItemInner::new(ItemState::Fetching, source);
        inner.store_on_complete = manager.is_some() && method == Method::Get;
        inner.reload = reload;
        Arc::new(Self {
            key,
            url: url.into(),
            method,
            manager,
            inner: Mutex::new(inner),
        })
    }

    /// An item served straight from the disk cache.
    pub(crate) fn cached(
        key: CacheKey,
        url: impl Into<String>,
        access: DiskCacheAccess,
        manager: Option<Weak<ManagerInner>>,
    ) -> Arc<Self> {
        let mut inner = ItemInner::new(ItemState::Ready, Box::new(access));
        if let Some(source) = inner.source.as_mut() {
            inner.meta = source.get_meta().ok();
        }
        Arc::new(Self {
            key,
            url: url.into(),
            method: Method::Get,
            manager,
            inner: Mutex::new(inner),
        })
    }

    /// An item waiting on a conditional request. A 304 answer switches to
    /// `cached`; any other answer replaces it.
    pub(crate) fn revalidating(
        key: CacheKey,
        url: impl Into<String>,
        source: Box<dyn ProtocolAccess>,
        cached: DiskCacheAccess,
        manager: Option<Weak<ManagerInner>>,
    ) -> Arc<Self> {
        let mut inner = ItemInner::new(ItemState::Fetching, source);
        inner.fallback = Some(cached);
        inner.store_on_complete = manager.is_some();
        Arc::new(Self {
            key,
            url: url.into(),
            method: Method::Get,
            manager,
            inner: Mutex::new(inner),
        })
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn state(&self) -> ItemState {
        self.inner.lock().state
    }

    pub fn ref_count(&self) -> usize {
        self.inner.lock().refcount
    }

    /// New consumer handle reading from the start of the stream.
    pub(crate) fn attach(self: &Arc<Self>) -> SharedApi {
        self.inner.lock().refcount += 1;
        SharedApi::new(Arc::clone(self))
    }

    /// Drop one consumer. The last one out aborts an unfinished source and
    /// removes the item from the manager's active table.
    ///
    /// The active table stays locked across the refcount drop so a concurrent
    /// open never joins an item that is being retired.
    pub(crate) fn release(self: &Arc<Self>) {
        let manager = self.manager.as_ref().and_then(Weak::upgrade);
        let mut active = manager.as_ref().map(|manager| manager.lock_active());
        let mut inner = self.inner.lock();
        inner.refcount = inner.refcount.saturating_sub(1);
        if inner.refcount > 0 {
            return;
        }
        if let Some(mut source) = inner.source.take() {
            if !inner.complete {
                debug!(key = %self.key, "Last consumer gone, aborting source");
            }
            source.close();
        }
        if let Some(mut fallback) = inner.fallback.take() {
            fallback.close();
        }
        if let Some(active) = active.as_mut() {
            deactivate(active, &self.key, self);
        }
    }

    pub(crate) fn poll_meta(&self) -> PollStatus {
        let mut inner = self.inner.lock();
        self.pump_meta(&mut inner)
    }

    pub(crate) fn get_meta(&self) -> CacheResult<ResponseMeta> {
        let inner = self.inner.lock();
        if let Some(meta) = &inner.meta {
            return Ok(meta.clone());
        }
        match &inner.failure {
            Some(failure) => Err(CacheError::Fetch(failure.clone())),
            None => Err(CacheError::NotReady),
        }
    }

    pub(crate) fn poll_data(&self, cursor: &Cursor) -> PollStatus {
        let (status, finished) = {
            let mut inner = self.inner.lock();
            if inner.has_unread(cursor) || inner.complete || inner.failure.is_some() {
                (PollStatus::ready(), None)
            } else {
                let finished = self.pump_data(&mut inner);
                let status = if inner.has_unread(cursor)
                    || inner.complete
                    || inner.failure.is_some()
                {
                    PollStatus::ready()
                } else {
                    PollStatus::pending(waiting_message(&inner))
                };
                (status, finished)
            }
        };
        self.store(finished);
        status
    }

    pub(crate) fn read(&self, cursor: &mut Cursor, max_bytes: usize) -> CacheResult<Bytes> {
        let (result, finished) = {
            let mut inner = self.inner.lock();
            let mut finished = None;
            if !inner.has_unread(cursor) && !inner.complete && inner.failure.is_none() {
                finished = self.pump_data(&mut inner);
            }

            let result = if let Some(data) = inner.read_buffered(cursor, max_bytes) {
                Ok(data)
            } else if inner.complete {
                Ok(Bytes::new())
            } else if let Some(failure) = &inner.failure {
                Err(CacheError::Fetch(failure.clone()))
            } else {
                Err(CacheError::NotReady)
            };
            (result, finished)
        };
        self.store(finished);
        result
    }

    fn pump_meta(&self, inner: &mut ItemInner) -> PollStatus {
        if inner.meta.is_some() || inner.failure.is_some() {
            return PollStatus::ready();
        }
        let Some(source) = inner.source.as_mut() else {
            return PollStatus::pending("Closed");
        };

        let status = source.poll_meta();
        if !status.ready {
            return status;
        }
        match source.get_meta() {
            Ok(meta) => self.accept_meta(inner, meta),
            Err(CacheError::NotReady) => return PollStatus::pending("Waiting for response"),
            Err(e) => {
                warn!(url = %self.url, error = %e, "Fetch failed");
                inner.fail(e);
            }
        }
        PollStatus::ready()
    }

    fn accept_meta(&self, inner: &mut ItemInner, meta: ResponseMeta) {
        let Some(mut cached) = inner.fallback.take() else {
            inner.meta = Some(meta);
            return;
        };

        if meta.status == NOT_MODIFIED {
            debug!(key = %self.key, "Not modified, serving cached copy");
            inner.state = ItemState::Revalidating;
            if let Some(mut source) = inner.source.take() {
                source.close();
            }
            inner.meta = cached.get_meta().ok();
            inner.source = Some(Box::new(cached));
            inner.store_on_complete = false;
        } else {
            debug!(key = %self.key, status = meta.status, "Revalidation returned a new copy");
            cached.close();
            inner.reload = true;
            inner.meta = Some(meta);
        }
    }

    /// Pull at most one chunk from the source into the buffer. Returns the
    /// finished document when this call completed a cacheable fetch.
    fn pump_data(&self, inner: &mut ItemInner) -> Option<Document> {
        if inner.meta.is_none() && !self.pump_meta(inner).ready {
            return None;
        }
        if inner.failure.is_some() || inner.complete {
            return None;
        }
        let source = inner.source.as_mut()?;
        if !source.poll_data().ready {
            return None;
        }

        match source.get_data(READ_CHUNK) {
            Ok(chunk) if chunk.is_empty() => self.finish(inner),
            Ok(chunk) => {
                inner.chunks.push(chunk);
                if inner.state == ItemState::Revalidating {
                    inner.state = ItemState::Ready;
                }
                None
            }
            Err(CacheError::NotReady) => None,
            Err(e) => {
                warn!(url = %self.url, error = %e, "Reading response body failed");
                inner.fail(e);
                None
            }
        }
    }

    fn finish(&self, inner: &mut ItemInner) -> Option<Document> {
        inner.complete = true;
        inner.state = ItemState::Ready;
        if let Some(mut source) = inner.source.take() {
            source.close();
        }
        let meta = inner.meta.as_ref()?;
        debug!(
            key = %self.key,
            chunks = inner.chunks.len(),
            status = meta.status,
            "Shared item complete"
        );

        if !inner.store_on_complete || meta.status != OK {
            return None;
        }
        inner.store_on_complete = false;
        Some(Document {
            key: self.key.clone(),
            url: self.url.clone(),
            meta: meta.clone(),
            body: inner.chunks.clone(),
        })
    }

    /// Offer a finished document to the manager. Must be called without the
    /// item lock held.
    fn store(&self, finished: Option<Document>) {
        let Some(doc) = finished else { return };
        let reload = self.inner.lock().reload;
        if let Some(manager) = self.manager.as_ref().and_then(Weak::upgrade) {
            manager.add(&doc, reload);
        }
    }
}

fn waiting_message(inner: &ItemInner) -> &'static str {
    match (inner.state, inner.meta.is_some()) {
        (ItemState::Fetching, false) => "Waiting for response",
        (ItemState::Fetching, true) => "Receiving data",
        _ => "Reading",
    }
}

impl fmt::Debug for SharedItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SharedItem")
            .field("key", &self.key)
            .field("method", &self.method)
            .field("state", &inner.state)
            .field("refcount", &inner.refcount)
            .field("chunks", &inner.chunks.len())
            .field("complete", &inner.complete)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{FetchRequest, Fetcher, Gate, ScriptedFetcher, ScriptedResponse};

    const URL: &str = "http://example.com/page";

    fn live_item(fetcher: &ScriptedFetcher) -> Arc<SharedItem> {
        let source = fetcher.fetch(&FetchRequest::get(URL)).unwrap();
        let key = CacheKey::normalize(URL).unwrap();
        SharedItem::live(key, URL, Method::Get, source, None, false)
    }

    fn drain(api: &mut SharedApi) -> Vec<u8> {
        let mut body = Vec::new();
        loop {
            assert!(api.poll_data().ready);
            let chunk = api.get_data(3).unwrap();
            if chunk.is_empty() {
                return body;
            }
            body.extend_from_slice(&chunk);
        }
    }

    #[test]
    fn consumers_replay_the_same_stream() {
        let fetcher = ScriptedFetcher::new();
        let gate = Gate::new();
        fetcher.respond(
            URL,
            ScriptedResponse::ok("text/plain", "")
                .with_chunks(["hello ", "shared ", "world"])
                .gated(gate.clone()),
        );

        let item = live_item(&fetcher);
        let mut first = item.attach();
        assert!(!first.poll_meta().ready);
        assert!(matches!(first.get_meta(), Err(CacheError::NotReady)));
        assert_eq!(item.state(), ItemState::Fetching);

        gate.open();
        assert!(first.poll_meta().ready);
        assert!(first.poll_data().ready);
        let head = first.get_data(5).unwrap();
        assert_eq!(&head[..], b"hello");

        let mut late = item.attach();
        assert_eq!(item.ref_count(), 2);
        assert_eq!(late.get_meta().unwrap().status, 200);

        let mut rest = head.to_vec();
        rest.extend(drain(&mut first));
        assert_eq!(rest, b"hello shared world");
        assert_eq!(drain(&mut late), b"hello shared world");
        assert_eq!(item.state(), ItemState::Ready);
        assert_eq!(fetcher.fetch_count(URL), 1);
    }

    #[test]
    fn last_release_closes_the_source() {
        let fetcher = ScriptedFetcher::new();
        let gate = Gate::new();
        fetcher.respond(URL, ScriptedResponse::ok("text/plain", "data").gated(gate.clone()));

        let item = live_item(&fetcher);
        let mut a = item.attach();
        let b = item.attach();
        drop(b);
        assert_eq!(item.ref_count(), 1);

        a.close();
        assert_eq!(item.ref_count(), 0);
        gate.open();
        assert!(matches!(a.get_data(10), Err(CacheError::Closed)));
        assert!(item.inner.lock().source.is_none());
    }

    #[test]
    fn error_status_is_passed_through() {
        let fetcher = ScriptedFetcher::new();
        let item = live_item(&fetcher);
        let mut api = item.attach();
        assert!(api.poll_meta().ready);
        assert_eq!(api.get_meta().unwrap().status, 404);
        assert!(drain(&mut api).is_empty());
    }

    #[tokio::test]
    async fn read_to_end_waits_for_the_gate() {
        let fetcher = ScriptedFetcher::new();
        let gate = Gate::new();
        fetcher.respond(
            URL,
            ScriptedResponse::ok("text/html", "")
                .with_chunks(["<p>", "late", "</p>"])
                .gated(gate.clone()),
        );

        let item = live_item(&fetcher);
        let mut api = item.attach();
        let opener = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(30)).await;
            gate.open();
        });

        let (meta, body) = api.read_to_end().await.unwrap();
        opener.await.unwrap();
        assert_eq!(meta.header("content-type"), Some("text/html"));
        assert_eq!(&body[..], b"<p>late</p>");
    }
}
