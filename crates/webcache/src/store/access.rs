//! Read handle for a cached payload.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use reqwest::header::{
    CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_TYPE, DATE, HeaderMap, HeaderName, HeaderValue,
};

use crate::error::{CacheError, CacheResult};
use crate::protocol::{PollStatus, ProtocolAccess, ResponseMeta};
use crate::store::entry::CacheEntry;

const CONTENT_TRANSFER_ENCODING: HeaderName =
    HeaderName::from_static("content-transfer-encoding");

/// Serves a cached document through the same interface as a live fetch.
/// Always ready; the metadata is a synthesized `200 OK`.
#[derive(Debug)]
pub struct DiskCacheAccess {
    path: PathBuf,
    file: Option<File>,
    meta: ResponseMeta,
}

impl DiskCacheAccess {
    /// Open the payload of `entry` in `dir`. A missing or unreadable file is
    /// reported as [`CacheError::MissingPayload`].
    pub(crate) fn open(dir: &Path, entry: &CacheEntry) -> CacheResult<Self> {
        let path = dir.join(&entry.filename);
        let file = File::open(&path).map_err(|source| CacheError::MissingPayload {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            file: Some(file),
            meta: ResponseMeta::new(200, "OK", headers_for(entry)),
        })
    }

    /// Payload file backing this handle.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }
}

fn headers_for(entry: &CacheEntry) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let mut set = |name: HeaderName, value: &str| {
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(name, value);
        }
    };

    set(CONTENT_TYPE, &entry.content_type);
    set(CONTENT_LENGTH, &entry.size.to_string());
    if let Some(date) = &entry.date {
        set(DATE, date.to_http_string());
    }
    if let Some(encoding) = &entry.content_encoding {
        set(CONTENT_ENCODING, encoding);
    }
    if let Some(encoding) = &entry.transfer_encoding {
        set(CONTENT_TRANSFER_ENCODING, encoding);
    }
    headers
}

impl ProtocolAccess for DiskCacheAccess {
    fn poll_meta(&mut self) -> PollStatus {
        PollStatus::ready()
    }

    fn get_meta(&mut self) -> CacheResult<ResponseMeta> {
        Ok(self.meta.clone())
    }

    fn poll_data(&mut self) -> PollStatus {
        PollStatus::ready()
    }

    fn get_data(&mut self, max_bytes: usize) -> CacheResult<Bytes> {
        let file = self.file.as_mut().ok_or(CacheError::Closed)?;
        let mut buf = BytesMut::zeroed(max_bytes.max(1));
        let read = file.read(&mut buf).map_err(|source| CacheError::Storage {
            path: self.path.clone(),
            source,
        })?;
        buf.truncate(read);
        Ok(buf.freeze())
    }

    fn close(&mut self) {
        self.file = None;
    }
}
