//! # Cache Keys
//!
//! Normalized URL strings that identify a cacheable resource.

use std::borrow::Borrow;
use std::fmt;

use url::Url;

use crate::error::{CacheError, CacheResult};

/// Normalized URL: lowercase host, default port removed, no fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Normalize a URL into a cache key.
    pub fn normalize(url: &str) -> CacheResult<Self> {
        let mut parsed = Url::parse(url.trim()).map_err(|e| CacheError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

        parsed.set_fragment(None);

        // Special schemes already get a lowercased host from the parser.
        if let Some(host) = parsed.host_str() {
            let lower = host.to_ascii_lowercase();
            if lower != host {
                parsed
                    .set_host(Some(&lower))
                    .map_err(|e| CacheError::InvalidUrl {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
            }
        }

        if parsed.port().is_some() && parsed.port() == default_port(parsed.scheme()) {
            let _ = parsed.set_port(None);
        }

        Ok(Self(parsed.into()))
    }

    /// Wrap a key that is already normalized, such as one read back from a log.
    pub(crate) fn from_normalized(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "http" => Some(80),
        "https" => Some(443),
        "ftp" => Some(21),
        "gopher" => Some(70),
        "hdl" => Some(2641),
        _ => None,
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for CacheKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
