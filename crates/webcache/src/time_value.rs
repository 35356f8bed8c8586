//! # Time Values
//!
//! HTTP timestamps kept as text, as epoch seconds, or both. The missing
//! representation is computed on first access and cached.

use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, NaiveDateTime, Utc};
use tracing::debug;

const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
const RFC850_DATE: &str = "%A, %d-%b-%y %H:%M:%S GMT";
const ASCTIME_DATE: &str = "%a %b %e %H:%M:%S %Y";

/// Current time in whole seconds since the Unix epoch.
pub fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Parse any of the three HTTP date formats into epoch seconds.
pub fn parse_http_date(text: &str) -> Option<i64> {
    let text = text.trim();
    [IMF_FIXDATE, RFC850_DATE, ASCTIME_DATE]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|dt| dt.and_utc().timestamp())
        .or_else(|| {
            DateTime::parse_from_rfc2822(text)
                .ok()
                .map(|dt| dt.timestamp())
        })
}

/// Format epoch seconds as an IMF-fixdate HTTP date.
pub fn format_http_date(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .unwrap_or_default()
        .format(IMF_FIXDATE)
        .to_string()
}

/// A timestamp with lazily converted text and numeric forms.
///
/// Equality and ordering only look at the numeric form.
#[derive(Clone)]
pub struct TimeValue {
    text: OnceLock<String>,
    secs: OnceLock<i64>,
}

impl TimeValue {
    /// A value known only by its HTTP date text.
    pub fn from_http(text: impl Into<String>) -> Self {
        let value = Self {
            text: OnceLock::new(),
            secs: OnceLock::new(),
        };
        let _ = value.text.set(text.into());
        value
    }

    /// A value known only by its epoch seconds.
    pub fn from_secs(secs: i64) -> Self {
        let value = Self {
            text: OnceLock::new(),
            secs: OnceLock::new(),
        };
        let _ = value.secs.set(secs);
        value
    }

    pub fn now() -> Self {
        Self::from_secs(now_secs())
    }

    /// Epoch seconds. An unparseable date yields 0 rather than an error.
    pub fn to_seconds(&self) -> i64 {
        *self.secs.get_or_init(|| {
            let text = self.text.get().map(String::as_str).unwrap_or_default();
            parse_http_date(text).unwrap_or_else(|| {
                debug!(date = %text, "Unparseable HTTP date, using epoch");
                0
            })
        })
    }

    /// HTTP date text, formatted from the seconds if it was never given.
    pub fn to_http_string(&self) -> &str {
        self.text.get_or_init(|| {
            let secs = self.secs.get().copied().unwrap_or_default();
            format_http_date(secs)
        })
    }

    /// Representation written to the transaction log: always epoch seconds,
    /// so text that is not a valid HTTP date is logged as `0`.
    pub(crate) fn log_field(&self) -> String {
        self.to_seconds().to_string()
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.to_seconds() == other.to_seconds()
    }
}

impl Eq for TimeValue {}

impl PartialOrd for TimeValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_seconds().cmp(&other.to_seconds())
    }
}

impl fmt::Debug for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeValue")
            .field("text", &self.text.get())
            .field("secs", &self.secs.get())
            .finish()
    }
}

impl fmt::Display for TimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_http_string())
    }
}
