use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::protocol::{PollStatus, ProtocolAccess, ResponseMeta};
use crate::shared::item::{Cursor, ItemState, SharedItem};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
const READ_SIZE: usize = 64 * 1024;

/// One consumer's handle on a [`SharedItem`].
///
/// Dropping the handle (or calling `close`) releases the consumer's
/// reference; the underlying fetch is only aborted when the last handle goes.
#[derive(Debug)]
pub struct SharedApi {
    item: Arc<SharedItem>,
    cursor: Cursor,
    closed: bool,
}

impl SharedApi {
    pub(crate) fn new(item: Arc<SharedItem>) -> Self {
        Self {
            item,
            cursor: Cursor::default(),
            closed: false,
        }
    }

    pub fn key(&self) -> &CacheKey {
        self.item.key()
    }

    pub fn url(&self) -> &str {
        self.item.url()
    }

    pub fn state(&self) -> ItemState {
        self.item.state()
    }

    /// True if both handles observe the same underlying item.
    pub fn shares_item_with(&self, other: &SharedApi) -> bool {
        Arc::ptr_eq(&self.item, &other.item)
    }

    /// Drive the poll interface until the whole body has been read,
    /// sleeping briefly whenever the source is not ready.
    pub async fn read_to_end(&mut self) -> CacheResult<(ResponseMeta, Bytes)> {
        loop {
            let status = self.poll_meta();
            if status.ready {
                break;
            }
            trace!(url = %self.url(), message = %status.message, "Waiting for metadata");
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        let meta = self.get_meta()?;

        let mut body = BytesMut::new();
        loop {
            if !self.poll_data().ready {
                tokio::time::sleep(POLL_INTERVAL).await;
                continue;
            }
            match self.get_data(READ_SIZE) {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => body.extend_from_slice(&chunk),
                Err(CacheError::NotReady) => tokio::time::sleep(POLL_INTERVAL).await,
                Err(e) => return Err(e),
            }
        }
        Ok((meta, body.freeze()))
    }
}

impl ProtocolAccess for SharedApi {
    fn poll_meta(&mut self) -> PollStatus {
        if self.closed {
            return PollStatus::ready();
        }
        self.item.poll_meta()
    }

    fn get_meta(&mut self) -> CacheResult<ResponseMeta> {
        if self.closed {
            return Err(CacheError::Closed);
        }
        self.item.get_meta()
    }

    fn poll_data(&mut self) -> PollStatus {
        if self.closed {
            return PollStatus::ready();
        }
        self.item.poll_data(&self.cursor)
    }

    fn get_data(&mut self, max_bytes: usize) -> CacheResult<Bytes> {
        if self.closed {
            return Err(CacheError::Closed);
        }
        self.item.read(&mut self.cursor, max_bytes)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.item.release();
        }
    }
}

impl Drop for SharedApi {
    fn drop(&mut self) {
        self.close();
    }
}
