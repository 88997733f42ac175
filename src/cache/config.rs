//! ISR configuration.
//!
//! Constructor-time settings shared by every fetch: the fetcher key, the
//! fast-tier partition and the long-term retention windows.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::duration::{DurationError, DurationSpec};

const DEFAULT_KEY: &str = "fetch";
const DEFAULT_LONG_TERM: &str = "1 year";
const DEFAULT_FAST_TIER_CAPACITY: usize = 1000;
const DEFAULT_REVALIDATION_CONCURRENCY: usize = 4;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IsrConfigError {
    #[error("ISR key name must not be empty")]
    MissingKey,
    #[error("invalid `{field}`: {source}")]
    Duration {
        field: &'static str,
        #[source]
        source: DurationError,
    },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IsrConfig {
    /// Name the per-request fetcher is registered under.
    pub key: String,
    /// Fast-tier partition; `None` or `"default"` selects the default tier.
    pub cache_name: Option<String>,
    /// Retention advertised to the fast tier via `s-maxage`.
    pub long_term_cache_duration: DurationSpec,
    /// Time-to-live of durable-tier entries.
    pub long_term_kv_duration: DurationSpec,
    /// Maximum entries held by an in-memory fast tier.
    pub fast_tier_capacity: usize,
    /// Maximum background revalidations running at once.
    pub revalidation_concurrency: usize,
}

impl Default for IsrConfig {
    fn default() -> Self {
        Self {
            key: DEFAULT_KEY.to_string(),
            cache_name: None,
            long_term_cache_duration: DurationSpec::from(DEFAULT_LONG_TERM),
            long_term_kv_duration: DurationSpec::from(DEFAULT_LONG_TERM),
            fast_tier_capacity: DEFAULT_FAST_TIER_CAPACITY,
            revalidation_concurrency: DEFAULT_REVALIDATION_CONCURRENCY,
        }
    }
}

impl From<&crate::config::IsrSettings> for IsrConfig {
    fn from(settings: &crate::config::IsrSettings) -> Self {
        Self {
            key: settings.key.clone(),
            cache_name: settings.cache_name.clone(),
            long_term_cache_duration: settings.long_term_cache_duration.clone(),
            long_term_kv_duration: settings.long_term_kv_duration.clone(),
            fast_tier_capacity: settings.fast_tier_capacity,
            revalidation_concurrency: settings.revalidation_concurrency,
        }
    }
}

/// Validated, millisecond-resolved form of [`IsrConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub key: String,
    pub long_term_cache_ms: u64,
    pub durable_ttl: Duration,
    pub revalidation_concurrency: NonZeroUsize,
}

impl IsrConfig {
    /// Validate the configuration, failing on the first bad field.
    pub fn resolve(&self) -> Result<ResolvedConfig, IsrConfigError> {
        if self.key.trim().is_empty() {
            return Err(IsrConfigError::MissingKey);
        }

        let long_term_cache_ms =
            self.long_term_cache_duration
                .to_millis()
                .map_err(|source| IsrConfigError::Duration {
                    field: "long_term_cache_duration",
                    source,
                })?;
        let kv_ms =
            self.long_term_kv_duration
                .to_millis()
                .map_err(|source| IsrConfigError::Duration {
                    field: "long_term_kv_duration",
                    source,
                })?;

        Ok(ResolvedConfig {
            key: self.key.clone(),
            long_term_cache_ms,
            // whole seconds
            durable_ttl: Duration::from_secs(kv_ms / 1000),
            revalidation_concurrency: self.revalidation_concurrency_non_zero(),
        })
    }

    /// Returns the fast-tier capacity as NonZeroUsize, clamping to 1 if zero.
    pub fn fast_tier_capacity_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.fast_tier_capacity).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the revalidation concurrency as NonZeroUsize, clamping to 1 if zero.
    pub fn revalidation_concurrency_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.revalidation_concurrency).unwrap_or(NonZeroUsize::MIN)
    }
}
