//! Revalidation orchestrator.
//!
//! Decides per fetch whether to serve the fast tier, fall back to the durable
//! tier, or go to the origin, and queues the background refresh that keeps
//! both tiers current. Branches are evaluated in a fixed order:
//!
//! 1. bypass (policy, missing fresh window, or avoid hook)
//! 2. forced refresh (revalidation marker, policy, or refresh hook)
//! 3. fresh fast-tier hit
//! 4. stale fast-tier hit
//! 5. fast-tier miss without stale-while-revalidate
//! 6. durable-tier hit
//! 7. full miss
//!
//! Tier failures never fail a fetch; they are logged and read as a miss.

use std::fmt;
use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::config::{IsrConfig, IsrConfigError};
use super::duration::DurationError;
use super::envelope::is_expired;
use super::hooks::{CacheHooks, HookContext, NoHooks, RequestEvent};
use super::keys::CacheKey;
use super::origin::{Origin, OriginError};
use super::policy::CachePolicy;
use super::queue::{RevalidationQueue, RevalidationTask, TaskSource};
use super::response::{BufferedResponse, OriginRequest};
use super::store::{DurableTier, FastTier};
use super::worker::{METRIC_TIER_ERROR, RevalidationWorker, WriteThrough};

const METRIC_FAST_HIT: &str = "isr_cache_fast_hit_total";
const METRIC_FAST_STALE: &str = "isr_cache_fast_stale_total";
const METRIC_FAST_MISS: &str = "isr_cache_fast_miss_total";
const METRIC_DURABLE_HIT: &str = "isr_cache_durable_hit_total";
const METRIC_BYPASS: &str = "isr_cache_bypass_total";
const METRIC_FORCED_REFRESH: &str = "isr_cache_forced_refresh_total";

#[derive(Debug, Error)]
pub enum IsrError {
    #[error(transparent)]
    Duration(#[from] DurationError),
    #[error(transparent)]
    Origin(#[from] OriginError),
    #[error("no fetcher registered under `{0}`")]
    UnknownFetcher(String),
}

/// Which branch served a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Bypass,
    ForcedRefresh,
    FreshHit,
    /// Stale envelope served while a refetch runs in the background.
    StaleHit,
    /// Stale envelope replaced by a synchronous origin fetch.
    StaleRefetch,
    MissNoSwr,
    DurableHit,
    FullMiss,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Bypass => "bypass",
            Outcome::ForcedRefresh => "forced_refresh",
            Outcome::FreshHit => "fresh_hit",
            Outcome::StaleHit => "stale_hit",
            Outcome::StaleRefetch => "stale_refetch",
            Outcome::MissNoSwr => "miss_no_swr",
            Outcome::DurableHit => "durable_hit",
            Outcome::FullMiss => "full_miss",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Resolved {
    pub outcome: Outcome,
    pub response: BufferedResponse,
}

impl Resolved {
    fn new(outcome: Outcome, response: BufferedResponse) -> Self {
        Self { outcome, response }
    }
}

/// Two-tier ISR cache in front of an origin.
///
/// Cheap to clone; clones share tiers, hooks and the revalidation queue.
#[derive(Clone)]
pub struct IsrCache {
    inner: Arc<Inner>,
}

struct Inner {
    key: String,
    write_through: Arc<WriteThrough>,
    hooks: Arc<dyn CacheHooks>,
    queue: RevalidationQueue,
}

pub struct IsrCacheBuilder {
    config: IsrConfig,
    fast: Arc<dyn FastTier>,
    origin: Arc<dyn Origin>,
    durable: Option<Arc<dyn DurableTier>>,
    hooks: Arc<dyn CacheHooks>,
}

impl IsrCacheBuilder {
    /// Enable the durable tier fallback.
    pub fn durable(mut self, durable: Arc<dyn DurableTier>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn CacheHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Validate the configuration and wire the cache to its worker.
    ///
    /// The worker must be driven (usually spawned with
    /// [`RevalidationWorker::run`]) for background refreshes to land.
    pub fn build(self) -> Result<(IsrCache, RevalidationWorker), IsrConfigError> {
        let resolved = self.config.resolve()?;
        let write_through = Arc::new(WriteThrough::new(
            self.fast,
            self.durable,
            self.origin,
            resolved.long_term_cache_ms,
            resolved.durable_ttl,
        ));
        let (queue, receiver) = RevalidationQueue::channel();
        let worker = RevalidationWorker::new(
            receiver,
            write_through.clone(),
            resolved.revalidation_concurrency.get(),
        );

        let cache = IsrCache {
            inner: Arc::new(Inner {
                key: resolved.key,
                write_through,
                hooks: self.hooks,
                queue,
            }),
        };
        Ok((cache, worker))
    }
}

impl IsrCache {
    pub fn builder(
        config: IsrConfig,
        fast: Arc<dyn FastTier>,
        origin: Arc<dyn Origin>,
    ) -> IsrCacheBuilder {
        IsrCacheBuilder {
            config,
            fast,
            origin,
            durable: None,
            hooks: Arc::new(NoHooks),
        }
    }

    /// Name the per-request fetcher is registered under.
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn has_durable_tier(&self) -> bool {
        self.inner.write_through.durable().is_some()
    }

    /// Bind a fetcher to one inbound request.
    pub fn fetcher(&self, event: RequestEvent) -> RequestFetcher {
        RequestFetcher {
            cache: self.clone(),
            event: Arc::new(event),
        }
    }

    pub async fn fetch(
        &self,
        event: &RequestEvent,
        request: OriginRequest,
        policy: &CachePolicy,
    ) -> Result<BufferedResponse, IsrError> {
        self.resolve(event, request, policy)
            .await
            .map(|resolved| resolved.response)
    }

    /// Like [`fetch`](Self::fetch), also reporting the branch taken.
    #[instrument(skip_all, fields(url = %request.url()))]
    pub async fn resolve(
        &self,
        event: &RequestEvent,
        request: OriginRequest,
        policy: &CachePolicy,
    ) -> Result<Resolved, IsrError> {
        let inner = &self.inner;
        if policy.avoid_cache {
            return self.bypass(request).await;
        }
        let Some(fresh_ms) = policy.fresh_millis()? else {
            return self.bypass(request).await;
        };
        let ctx = HookContext {
            event,
            request: &request,
        };

        if inner.hooks.should_avoid_cache(ctx).await {
            return self.bypass(request).await;
        }

        let forced = event.is_programmatic_revalidation()
            || policy.force_refresh
            || inner.hooks.should_refresh_cache(ctx).await;
        let key = CacheKey::generate(&request);

        if forced {
            counter!(METRIC_FORCED_REFRESH).increment(1);
            info!(hash = %key.content_hash, outcome = "forced_refresh", "Refreshing cache entry");
            let response = self.origin_fetch(request).await?;
            self.schedule(key, fresh_ms, TaskSource::Prefetched(response.clone()));
            return Ok(Resolved::new(Outcome::ForcedRefresh, response));
        }

        if let Some(envelope) = self.lookup_fast(&key).await {
            if !is_expired(&envelope, OffsetDateTime::now_utc()) {
                counter!(METRIC_FAST_HIT).increment(1);
                debug!(hash = %key.content_hash, outcome = "fresh_hit", "Serving cached response");
                return Ok(Resolved::new(Outcome::FreshHit, envelope));
            }

            counter!(METRIC_FAST_STALE).increment(1);
            if policy.stale_while_revalidate {
                debug!(hash = %key.content_hash, outcome = "stale_hit", "Serving stale response");
                self.schedule(key, fresh_ms, TaskSource::Refetch(request));
                return Ok(Resolved::new(Outcome::StaleHit, envelope));
            }

            debug!(hash = %key.content_hash, outcome = "stale_refetch", "Refetching stale response");
            let response = self.origin_fetch(request).await?;
            self.schedule(key, fresh_ms, TaskSource::Prefetched(response.clone()));
            return Ok(Resolved::new(Outcome::StaleRefetch, response));
        }

        counter!(METRIC_FAST_MISS).increment(1);
        if !policy.stale_while_revalidate {
            debug!(hash = %key.content_hash, outcome = "miss_no_swr", "Fetching missing response");
            let response = self.origin_fetch(request).await?;
            self.schedule(key, fresh_ms, TaskSource::Prefetched(response.clone()));
            return Ok(Resolved::new(Outcome::MissNoSwr, response));
        }

        if let Some(text) = self.lookup_durable(&key).await {
            counter!(METRIC_DURABLE_HIT).increment(1);
            debug!(hash = %key.content_hash, outcome = "durable_hit", "Serving durable tier text");
            self.schedule(key, fresh_ms, TaskSource::Refetch(request));
            return Ok(Resolved::new(
                Outcome::DurableHit,
                BufferedResponse::from_text(text),
            ));
        }

        debug!(hash = %key.content_hash, outcome = "full_miss", "Fetching and storing response");
        let response = self.origin_fetch(request).await?;
        inner
            .write_through
            .store(&key, &response, fresh_ms)
            .await;
        Ok(Resolved::new(Outcome::FullMiss, response))
    }

    async fn bypass(&self, request: OriginRequest) -> Result<Resolved, IsrError> {
        counter!(METRIC_BYPASS).increment(1);
        debug!(outcome = "bypass", "Fetching origin without cache");
        let response = self.origin_fetch(request).await?;
        Ok(Resolved::new(Outcome::Bypass, response))
    }

    async fn origin_fetch(&self, request: OriginRequest) -> Result<BufferedResponse, IsrError> {
        Ok(self.inner.write_through.origin().fetch(request).await?)
    }

    async fn lookup_fast(&self, key: &CacheKey) -> Option<BufferedResponse> {
        match self.inner.write_through.fast().lookup(&key.lookup).await {
            Ok(found) => found,
            Err(err) => {
                counter!(METRIC_TIER_ERROR, "tier" => "fast", "op" => "lookup").increment(1);
                warn!(hash = %key.content_hash, error = %err, "Fast tier lookup failed");
                None
            }
        }
    }

    async fn lookup_durable(&self, key: &CacheKey) -> Option<String> {
        let durable = self.inner.write_through.durable()?;
        match durable.get(&key.content_hash).await {
            Ok(found) => found,
            Err(err) => {
                counter!(METRIC_TIER_ERROR, "tier" => "durable", "op" => "get").increment(1);
                warn!(hash = %key.content_hash, error = %err, "Durable tier lookup failed");
                None
            }
        }
    }

    fn schedule(&self, key: CacheKey, fresh_ms: u64, source: TaskSource) {
        self.inner
            .queue
            .schedule(RevalidationTask::new(key, fresh_ms, source));
    }
}

/// A cache fetcher bound to the inbound request it serves.
#[derive(Clone)]
pub struct RequestFetcher {
    cache: IsrCache,
    event: Arc<RequestEvent>,
}

impl RequestFetcher {
    pub fn event(&self) -> &RequestEvent {
        &self.event
    }

    pub async fn fetch(
        &self,
        request: OriginRequest,
        policy: &CachePolicy,
    ) -> Result<BufferedResponse, IsrError> {
        self.cache.fetch(&self.event, request, policy).await
    }

    pub async fn resolve(
        &self,
        request: OriginRequest,
        policy: &CachePolicy,
    ) -> Result<Resolved, IsrError> {
        self.cache.resolve(&self.event, request, policy).await
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use axum::http::{HeaderMap, HeaderValue};
    use url::Url;

    use super::*;
    use crate::cache::keys::LookupKey;
    use crate::cache::store::{MemoryDurableTier, MemoryFastTier, TierError};

    #[derive(Default)]
    struct CountingOrigin {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Origin for CountingOrigin {
        async fn fetch(&self, _request: OriginRequest) -> Result<BufferedResponse, OriginError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(BufferedResponse::from_text(format!("v{n}")))
        }
    }

    struct UnavailableTier;

    #[async_trait]
    impl FastTier for UnavailableTier {
        async fn lookup(&self, _key: &LookupKey) -> Result<Option<BufferedResponse>, TierError> {
            Err(TierError::Unavailable("timeout".to_string()))
        }

        async fn put(&self, _key: &LookupKey, _envelope: BufferedResponse) -> Result<(), TierError> {
            Err(TierError::Unavailable("timeout".to_string()))
        }
    }

    #[async_trait]
    impl DurableTier for UnavailableTier {
        async fn get(&self, _hash: &str) -> Result<Option<String>, TierError> {
            Err(TierError::Unavailable("timeout".to_string()))
        }

        async fn put(
            &self,
            _hash: &str,
            _text: String,
            _ttl: std::time::Duration,
        ) -> Result<(), TierError> {
            Err(TierError::Unavailable("timeout".to_string()))
        }
    }

    fn event(headers: HeaderMap) -> RequestEvent {
        RequestEvent::new(Url::parse("https://site.test/").expect("url"), headers)
    }

    fn request() -> OriginRequest {
        OriginRequest::parse("https://origin.test/data").expect("url")
    }

    fn memory_fast() -> Arc<MemoryFastTier> {
        Arc::new(MemoryFastTier::new(NonZeroUsize::new(8).expect("non-zero")))
    }

    #[tokio::test]
    async fn tier_errors_degrade_to_origin() {
        let origin = Arc::new(CountingOrigin::default());
        let (cache, mut worker) = IsrCache::builder(
            IsrConfig::default(),
            Arc::new(UnavailableTier),
            origin.clone(),
        )
        .durable(Arc::new(UnavailableTier))
        .build()
        .expect("build");

        let resolved = cache
            .resolve(&event(HeaderMap::new()), request(), &CachePolicy::fresh_for("1 hour"))
            .await
            .expect("resolve");

        assert_eq!(resolved.outcome, Outcome::FullMiss);
        assert_eq!(resolved.response.text(), "v1");
        assert_eq!(worker.consume().await, 0);
    }

    #[tokio::test]
    async fn revalidation_marker_forces_refresh_and_reuses_response() {
        let fast = memory_fast();
        let origin = Arc::new(CountingOrigin::default());
        let (cache, mut worker) =
            IsrCache::builder(IsrConfig::default(), fast.clone(), origin.clone())
                .build()
                .expect("build");

        let mut headers = HeaderMap::new();
        headers.insert("x-revalidate", HeaderValue::from_static("true"));
        let resolved = cache
            .resolve(&event(headers), request(), &CachePolicy::fresh_for("1 hour"))
            .await
            .expect("resolve");

        assert_eq!(resolved.outcome, Outcome::ForcedRefresh);
        assert_eq!(worker.consume().await, 1);
        assert_eq!(origin.calls.load(Ordering::SeqCst), 1);

        let key = CacheKey::generate(&request());
        let stored = fast.lookup(&key.lookup).await.expect("lookup").expect("entry");
        assert_eq!(stored.text(), resolved.response.text());
    }

    #[tokio::test]
    async fn bad_policy_duration_is_surfaced() {
        let (cache, _worker) = IsrCache::builder(
            IsrConfig::default(),
            memory_fast(),
            Arc::new(CountingOrigin::default()),
        )
        .build()
        .expect("build");

        let err = cache
            .fetch(&event(HeaderMap::new()), request(), &CachePolicy::fresh_for("2 eons"))
            .await
            .expect_err("invalid duration");
        assert!(matches!(err, IsrError::Duration(_)));
    }

    #[tokio::test]
    async fn avoid_cache_bypasses_before_parsing_duration() {
        let origin = Arc::new(CountingOrigin::default());
        let (cache, _worker) =
            IsrCache::builder(IsrConfig::default(), memory_fast(), origin.clone())
                .build()
                .expect("build");

        let policy = CachePolicy::fresh_for("2 eons").avoid_cache();
        let resolved = cache
            .resolve(&event(HeaderMap::new()), request(), &policy)
            .await
            .expect("bypass ignores the duration");

        assert_eq!(resolved.outcome, Outcome::Bypass);
        assert_eq!(origin.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_key_fails_at_build() {
        let config = IsrConfig {
            key: String::new(),
            ..Default::default()
        };
        let result = IsrCache::builder(config, memory_fast(), Arc::new(CountingOrigin::default()))
            .durable(Arc::new(MemoryDurableTier::new()))
            .build();
        assert!(matches!(result, Err(IsrConfigError::MissingKey)));
    }

    #[test]
    fn outcome_labels_match_log_fields() {
        assert_eq!(Outcome::StaleRefetch.to_string(), "stale_refetch");
        assert_eq!(Outcome::DurableHit.as_str(), "durable_hit");
    }
}
