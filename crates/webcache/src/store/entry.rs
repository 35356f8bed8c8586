//! # Cache Entries
//!
//! Per-object metadata and its tab-separated transaction log form:
//!
//! ```text
//! key  url  filename  size  date  last-modified  expires  content-type  content-encoding  transfer-encoding
//! ```
//!
//! Lines written by the 1.2 log format stop after the content type.

use reqwest::header::{
    CONTENT_ENCODING, CONTENT_TYPE, DATE, EXPIRES, HeaderMap, LAST_MODIFIED,
};
use tracing::debug;

use crate::key::CacheKey;
use crate::store::StoreId;
use crate::time_value::TimeValue;

const NONE_FIELD: &str = "None";
const MIN_FIELDS: usize = 8;
const DEFAULT_CONTENT_TYPE: &str = "text/html";
const CONTENT_TRANSFER_ENCODING: &str = "content-transfer-encoding";

/// Metadata for one cached document.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub url: String,
    /// Payload file name, relative to the store directory
    pub filename: String,
    pub size: u64,
    /// Last time the document was fetched or validated
    pub date: Option<TimeValue>,
    pub last_modified: Option<TimeValue>,
    pub expires: Option<TimeValue>,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub transfer_encoding: Option<String>,
    pub(crate) store: StoreId,
}

impl CacheEntry {
    /// Build an entry from response headers.
    ///
    /// A missing `Date` defaults to `now`, a missing `Last-Modified` to the
    /// date, and a missing `Content-Type` to `text/html`.
    pub(crate) fn from_headers(
        key: CacheKey,
        url: &str,
        size: u64,
        headers: &HeaderMap,
        store: StoreId,
        now: i64,
    ) -> Self {
        let text = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let date = text(DATE.as_str())
            .map(TimeValue::from_http)
            .unwrap_or_else(|| TimeValue::from_secs(now));
        let last_modified = text(LAST_MODIFIED.as_str())
            .map(TimeValue::from_http)
            .unwrap_or_else(|| date.clone());

        Self {
            key,
            url: url.to_string(),
            filename: String::new(),
            size,
            date: Some(date),
            last_modified: Some(last_modified),
            expires: text(EXPIRES.as_str()).map(TimeValue::from_http),
            content_type: text(CONTENT_TYPE.as_str())
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            content_encoding: text(CONTENT_ENCODING.as_str()),
            transfer_encoding: text(CONTENT_TRANSFER_ENCODING),
            store,
        }
    }

    /// Store that owns this entry.
    pub fn store(&self) -> StoreId {
        self.store
    }

    /// True if the entry carries an expiry strictly before `now`.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires
            .as_ref()
            .is_some_and(|expires| expires.to_seconds() < now)
    }

    /// Record a fresh validation against the origin.
    pub fn touch(&mut self, now: i64) {
        self.date = Some(TimeValue::from_secs(now));
    }

    /// Serialize to the log line format.
    pub fn to_log_line(&self) -> String {
        let time = |value: &Option<TimeValue>| {
            value
                .as_ref()
                .map_or_else(|| NONE_FIELD.to_string(), TimeValue::log_field)
        };
        let text = |value: &Option<String>| {
            value
                .as_deref()
                .map_or_else(|| NONE_FIELD.to_string(), clean)
        };

        [
            clean(self.key.as_str()),
            clean(&self.url),
            clean(&self.filename),
            self.size.to_string(),
            time(&self.date),
            time(&self.last_modified),
            time(&self.expires),
            clean(&self.content_type),
            text(&self.content_encoding),
            text(&self.transfer_encoding),
        ]
        .join("\t")
    }

    /// Parse a log line. Returns `None` for malformed lines.
    pub fn parse_log_line(line: &str, store: StoreId) -> Option<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < MIN_FIELDS {
            return None;
        }

        let optional = |index: usize| {
            fields
                .get(index)
                .filter(|value| **value != NONE_FIELD)
                .map(|value| value.to_string())
        };

        Some(Self {
            key: CacheKey::from_normalized(fields[0]),
            url: fields[1].to_string(),
            filename: fields[2].to_string(),
            size: fields[3].trim().parse().ok()?,
            date: parse_time_field(fields[4]),
            last_modified: parse_time_field(fields[5]),
            expires: parse_time_field(fields[6]),
            content_type: fields[7].to_string(),
            content_encoding: optional(8),
            transfer_encoding: optional(9),
            store,
        })
    }
}

/// `None` literal → absent; leading letter → HTTP date text; otherwise
/// numeric epoch seconds. Anything else reads as the epoch.
fn parse_time_field(field: &str) -> Option<TimeValue> {
    let field = field.trim();
    if field == NONE_FIELD {
        return None;
    }
    if field.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Some(TimeValue::from_http(field));
    }
    let secs = field.parse::<f64>().unwrap_or_else(|_| {
        debug!(field = %field, "Unparseable time field, using epoch");
        0.0
    });
    Some(TimeValue::from_secs(secs as i64))
}

fn clean(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}
