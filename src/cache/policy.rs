//! Per-call cache policy.

use super::duration::{DurationError, DurationSpec};

/// How a single fetch should interact with the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Fresh window; absent means no caching.
    pub duration: Option<DurationSpec>,
    pub force_refresh: bool,
    pub avoid_cache: bool,
    pub stale_while_revalidate: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            duration: None,
            force_refresh: false,
            avoid_cache: false,
            stale_while_revalidate: true,
        }
    }
}

impl CachePolicy {
    /// A policy caching for `duration` with stale-while-revalidate on.
    pub fn fresh_for(duration: impl Into<DurationSpec>) -> Self {
        Self {
            duration: Some(duration.into()),
            ..Self::default()
        }
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn avoid_cache(mut self) -> Self {
        self.avoid_cache = true;
        self
    }

    pub fn stale_while_revalidate(mut self, enabled: bool) -> Self {
        self.stale_while_revalidate = enabled;
        self
    }

    /// The fresh window in milliseconds, `None` when absent or zero.
    pub fn fresh_millis(&self) -> Result<Option<u64>, DurationError> {
        match &self.duration {
            None => Ok(None),
            Some(spec) => spec.to_millis().map(|ms| (ms > 0).then_some(ms)),
        }
    }
}
