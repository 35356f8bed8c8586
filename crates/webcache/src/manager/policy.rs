//! Cacheability rules for completed responses.

use std::fmt;

use reqwest::header::{CACHE_CONTROL, EXPIRES, PRAGMA};
use url::Url;

use crate::protocol::ResponseMeta;

/// URL schemes whose responses may be stored.
pub const CACHEABLE_SCHEMES: &[&str] = &["http", "ftp", "hdl"];

/// Verdict on whether a response may be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cacheability {
    /// Store it. `expires_override` comes from `Cache-Control: max-age`.
    Cacheable { expires_override: Option<i64> },
    Refused(Refusal),
}

impl Cacheability {
    pub fn is_cacheable(&self) -> bool {
        matches!(self, Cacheability::Cacheable { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    NoStore,
    HasQuery,
    Scheme(String),
    TooLarge { size: u64, limit: u64 },
    PragmaNoCache,
    ExpiresZero,
    CacheControl(String),
    BadUrl,
}

impl fmt::Display for Refusal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Refusal::NoStore => write!(f, "no disk store is open"),
            Refusal::HasQuery => write!(f, "URL has a query"),
            Refusal::Scheme(scheme) => write!(f, "scheme '{scheme}' is not cacheable"),
            Refusal::TooLarge { size, limit } => {
                write!(f, "{size} bytes exceeds the {limit} byte limit")
            }
            Refusal::PragmaNoCache => write!(f, "Pragma: no-cache"),
            Refusal::ExpiresZero => write!(f, "Expires: 0"),
            Refusal::CacheControl(directive) => write!(f, "Cache-Control: {directive}"),
            Refusal::BadUrl => write!(f, "URL does not parse"),
        }
    }
}

/// Split a `Cache-Control` value into lowercase directives with optional
/// (unquoted) arguments.
pub fn parse_cache_control(value: &str) -> Vec<(String, Option<String>)> {
    value
        .split(',')
        .map(str::trim)
        .filter(|directive| !directive.is_empty())
        .map(|directive| match directive.split_once('=') {
            Some((name, arg)) => (
                name.trim().to_ascii_lowercase(),
                Some(arg.trim().trim_matches('"').to_string()),
            ),
            None => (directive.to_ascii_lowercase(), None),
        })
        .collect()
}

/// Decide whether a `size`-byte response to `url` may be stored in a primary
/// store with budget `primary_max_size` (`None` when no store is open).
pub fn evaluate(
    url: &str,
    meta: &ResponseMeta,
    size: u64,
    primary_max_size: Option<u64>,
    now: i64,
) -> Cacheability {
    use Cacheability::Refused;

    let Some(max_size) = primary_max_size else {
        return Refused(Refusal::NoStore);
    };

    let Ok(parsed) = Url::parse(url) else {
        return Refused(Refusal::BadUrl);
    };
    if parsed.query().is_some_and(|query| !query.is_empty()) {
        return Refused(Refusal::HasQuery);
    }
    if !CACHEABLE_SCHEMES.contains(&parsed.scheme()) {
        return Refused(Refusal::Scheme(parsed.scheme().to_string()));
    }

    let limit = max_size / 4;
    if size > limit {
        return Refused(Refusal::TooLarge { size, limit });
    }

    if meta
        .header(PRAGMA.as_str())
        .is_some_and(|pragma| pragma.trim().eq_ignore_ascii_case("no-cache"))
    {
        return Refused(Refusal::PragmaNoCache);
    }
    if meta
        .header(EXPIRES.as_str())
        .is_some_and(|expires| expires.trim() == "0")
    {
        return Refused(Refusal::ExpiresZero);
    }

    let mut expires_override = None;
    for value in meta.headers.get_all(CACHE_CONTROL) {
        let Ok(value) = value.to_str() else { continue };
        for (name, arg) in parse_cache_control(value) {
            match name.as_str() {
                "no-cache" | "no-store" => return Refused(Refusal::CacheControl(name)),
                "max-age" => {
                    if let Some(secs) = arg.and_then(|arg| arg.parse::<i64>().ok()) {
                        expires_override = Some(now.saturating_add(secs));
                    }
                }
                _ => {}
            }
        }
    }

    Cacheability::Cacheable { expires_override }
}
