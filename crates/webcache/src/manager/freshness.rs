use std::collections::HashSet;
use std::time::Duration;

use crate::config::{CacheConfig, FreshnessMode};
use crate::key::CacheKey;
use crate::store::CacheEntry;

/// Decides whether a cached entry can be served without revalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FreshnessPolicy {
    /// Never revalidate
    Never,
    /// Always revalidate
    Always,
    /// Fresh on the first query for a key in this process, stale afterwards.
    /// The set only grows; it is reset when the policy is re-selected.
    PerSession(HashSet<CacheKey>),
    /// Fresh while less than the period has passed since the entry's `date`
    Periodic(Duration),
}

impl FreshnessPolicy {
    pub fn from_config(config: &CacheConfig) -> Self {
        match config.freshness {
            FreshnessMode::Never => FreshnessPolicy::Never,
            FreshnessMode::Always => FreshnessPolicy::Always,
            FreshnessMode::PerSession => FreshnessPolicy::PerSession(HashSet::new()),
            FreshnessMode::Periodic => FreshnessPolicy::Periodic(config.freshness_period()),
        }
    }

    pub fn mode(&self) -> FreshnessMode {
        match self {
            FreshnessPolicy::Never => FreshnessMode::Never,
            FreshnessPolicy::Always => FreshnessMode::Always,
            FreshnessPolicy::PerSession(_) => FreshnessMode::PerSession,
            FreshnessPolicy::Periodic(_) => FreshnessMode::Periodic,
        }
    }

    pub fn is_fresh(&mut self, entry: &CacheEntry, now: i64) -> bool {
        match self {
            FreshnessPolicy::Never => true,
            FreshnessPolicy::Always => false,
            FreshnessPolicy::PerSession(seen) => seen.insert(entry.key.clone()),
            FreshnessPolicy::Periodic(period) => match &entry.date {
                Some(date) => {
                    let age = now.saturating_sub(date.to_seconds());
                    age < i64::try_from(period.as_secs()).unwrap_or(i64::MAX)
                }
                None => false,
            },
        }
    }
}
