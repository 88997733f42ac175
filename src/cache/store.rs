//! Cache tiers.
//!
//! Fast tier: low-latency response store addressed by a lookup URL.
//! Durable tier: replicated text store addressed by content hash.
//!
//! Both are consumed through traits; the in-memory implementations back the
//! demo server and tests.

use std::num::NonZeroUsize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use thiserror::Error;

use super::envelope::s_maxage;
use super::keys::LookupKey;
use super::lock::{rw_read, rw_write};
use super::response::BufferedResponse;

const SOURCE: &str = "cache::store";

/// Name of the fast tier used when no partition is configured.
pub const DEFAULT_CACHE_NAME: &str = "default";

#[derive(Debug, Error)]
pub enum TierError {
    #[error("cache tier unavailable: {0}")]
    Unavailable(String),
}

/// Low-latency response store.
#[async_trait]
pub trait FastTier: Send + Sync {
    /// Return the stored envelope for `key`, if any.
    async fn lookup(&self, key: &LookupKey) -> Result<Option<BufferedResponse>, TierError>;

    /// Overwrite the envelope stored for `key`.
    async fn put(&self, key: &LookupKey, envelope: BufferedResponse) -> Result<(), TierError>;
}

/// Globally replicated text store with per-entry expiry.
#[async_trait]
pub trait DurableTier: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<String>, TierError>;

    async fn put(&self, hash: &str, text: String, ttl: Duration) -> Result<(), TierError>;
}

// ============================================================================
// Fast tier: in-memory LRU
// ============================================================================

#[derive(Clone)]
struct FastEntry {
    envelope: BufferedResponse,
    retain_until: Option<Instant>,
}

/// In-memory fast tier with LRU eviction.
///
/// Entries are retained for the envelope's `s-maxage` seconds, independent of
/// their `Expires` freshness.
pub struct MemoryFastTier {
    entries: RwLock<LruCache<String, FastEntry>>,
}

impl MemoryFastTier {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "fast_len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        rw_write(&self.entries, SOURCE, "fast_clear").clear();
    }
}

#[async_trait]
impl FastTier for MemoryFastTier {
    async fn lookup(&self, key: &LookupKey) -> Result<Option<BufferedResponse>, TierError> {
        let mut entries = rw_write(&self.entries, SOURCE, "fast_lookup");
        let Some(entry) = entries.get(key.as_str()) else {
            return Ok(None);
        };

        if entry
            .retain_until
            .is_some_and(|deadline| deadline <= Instant::now())
        {
            entries.pop(key.as_str());
            return Ok(None);
        }

        Ok(Some(entry.envelope.clone()))
    }

    async fn put(&self, key: &LookupKey, envelope: BufferedResponse) -> Result<(), TierError> {
        let retain_until = s_maxage(envelope.headers())
            .and_then(|seconds| Instant::now().checked_add(Duration::from_secs(seconds)));
        rw_write(&self.entries, SOURCE, "fast_put").put(
            key.as_str().to_string(),
            FastEntry {
                envelope,
                retain_until,
            },
        );
        Ok(())
    }
}

/// Named fast-tier partitions sharing one capacity setting.
pub struct CacheStorage {
    capacity: NonZeroUsize,
    tiers: DashMap<String, Arc<MemoryFastTier>>,
}

impl CacheStorage {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            capacity,
            tiers: DashMap::new(),
        }
    }

    pub fn default_tier(&self) -> Arc<MemoryFastTier> {
        self.open(DEFAULT_CACHE_NAME)
    }

    /// Open (creating on first use) the partition called `name`.
    pub fn open(&self, name: &str) -> Arc<MemoryFastTier> {
        self.tiers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryFastTier::new(self.capacity)))
            .clone()
    }

    /// Resolve an optional configured name, treating `"default"` as unnamed.
    pub fn select(&self, name: Option<&str>) -> Arc<MemoryFastTier> {
        match name {
            None => self.default_tier(),
            Some(name) if name == DEFAULT_CACHE_NAME => self.default_tier(),
            Some(name) => self.open(name),
        }
    }
}

// ============================================================================
// Durable tier: in-memory map with TTL
// ============================================================================

struct DurableEntry {
    text: String,
    expires_at: Option<Instant>,
}

/// In-memory durable tier honouring per-entry TTLs.
#[derive(Default)]
pub struct MemoryDurableTier {
    entries: DashMap<String, DurableEntry>,
}

impl MemoryDurableTier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl DurableTier for MemoryDurableTier {
    async fn get(&self, hash: &str) -> Result<Option<String>, TierError> {
        let now = Instant::now();
        let expired = match self.entries.get(hash) {
            None => return Ok(None),
            Some(entry) if entry.expires_at.is_none_or(|deadline| deadline > now) => {
                return Ok(Some(entry.text.clone()));
            }
            Some(_) => true,
        };

        if expired {
            self.entries.remove(hash);
        }
        Ok(None)
    }

    async fn put(&self, hash: &str, text: String, ttl: Duration) -> Result<(), TierError> {
        let expires_at = Instant::now().checked_add(ttl);
        self.entries
            .insert(hash.to_string(), DurableEntry { text, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{AssertUnwindSafe, catch_unwind};

    use axum::http::{HeaderMap, HeaderValue, StatusCode, header::CACHE_CONTROL};

    use super::*;
    use crate::cache::keys::CacheKey;
    use crate::cache::response::OriginRequest;

    fn key(path: &str) -> LookupKey {
        let request = OriginRequest::parse(&format!("https://example.com{path}")).expect("url");
        CacheKey::generate(&request).lookup
    }

    fn envelope(body: &str, s_maxage: Option<&'static str>) -> BufferedResponse {
        let mut headers = HeaderMap::new();
        if let Some(value) = s_maxage {
            headers.insert(CACHE_CONTROL, HeaderValue::from_static(value));
        }
        BufferedResponse::new(StatusCode::OK, headers, body.to_string())
    }

    fn capacity(value: usize) -> NonZeroUsize {
        NonZeroUsize::new(value).expect("non-zero")
    }

    #[tokio::test]
    async fn fast_tier_roundtrip() {
        let tier = MemoryFastTier::new(capacity(8));
        let key = key("/posts/hello");

        assert!(tier.lookup(&key).await.expect("lookup").is_none());

        tier.put(&key, envelope("hello", Some("s-maxage=60")))
            .await
            .expect("put");

        let stored = tier.lookup(&key).await.expect("lookup").expect("entry");
        assert_eq!(stored.text(), "hello");
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn fast_tier_overwrites_wholesale() {
        let tier = MemoryFastTier::new(capacity(8));
        let key = key("/a");

        tier.put(&key, envelope("v1", None)).await.expect("put");
        tier.put(&key, envelope("v2", None)).await.expect("put");

        let stored = tier.lookup(&key).await.expect("lookup").expect("entry");
        assert_eq!(stored.text(), "v2");
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn fast_tier_drops_entries_past_retention() {
        let tier = MemoryFastTier::new(capacity(8));
        let key = key("/short");

        tier.put(&key, envelope("gone", Some("s-maxage=0")))
            .await
            .expect("put");

        assert!(tier.lookup(&key).await.expect("lookup").is_none());
        assert!(tier.is_empty());
    }

    #[tokio::test]
    async fn fast_tier_evicts_least_recently_used() {
        let tier = MemoryFastTier::new(capacity(2));
        let (a, b, c) = (key("/a"), key("/b"), key("/c"));

        tier.put(&a, envelope("a", None)).await.expect("put");
        tier.put(&b, envelope("b", None)).await.expect("put");
        tier.put(&c, envelope("c", None)).await.expect("put");

        assert!(tier.lookup(&a).await.expect("lookup").is_none());
        assert!(tier.lookup(&b).await.expect("lookup").is_some());
        assert!(tier.lookup(&c).await.expect("lookup").is_some());
    }

    #[test]
    fn storage_partitions_are_shared_by_name() {
        let storage = CacheStorage::new(capacity(4));

        let first = storage.open("pages");
        let second = storage.select(Some("pages"));
        assert!(Arc::ptr_eq(&first, &second));

        let default = storage.select(Some(DEFAULT_CACHE_NAME));
        assert!(Arc::ptr_eq(&default, &storage.select(None)));
        assert!(!Arc::ptr_eq(&default, &first));
    }

    #[tokio::test]
    async fn durable_tier_roundtrip_and_expiry() {
        let tier = MemoryDurableTier::new();

        tier.put("abc", "body".to_string(), Duration::from_secs(60))
            .await
            .expect("put");
        assert_eq!(
            tier.get("abc").await.expect("get").as_deref(),
            Some("body")
        );

        tier.put("gone", "old".to_string(), Duration::ZERO)
            .await
            .expect("put");
        assert!(tier.get("gone").await.expect("get").is_none());
        assert_eq!(tier.len(), 1);
    }

    #[tokio::test]
    async fn fast_tier_recovers_from_poisoned_lock() {
        let tier = MemoryFastTier::new(capacity(4));

        let _ = catch_unwind(AssertUnwindSafe(|| {
            let _guard = tier
                .entries
                .write()
                .expect("entries lock should be acquired");
            panic!("poison entries lock");
        }));

        let key = key("/after-panic");
        tier.put(&key, envelope("ok", None)).await.expect("put");
        assert!(tier.lookup(&key).await.expect("lookup").is_some());
    }
}
