//! ISR response cache.
//!
//! Serves origin responses from two tiers using stale-while-revalidate:
//!
//! - **Fast tier**: low-latency envelope store keyed by a synthetic lookup URL
//! - **Durable tier**: optional text store keyed by content hash
//!
//! Stale entries are served immediately while a background worker refetches
//! them and writes through to both tiers.
//!
//! ## Configuration
//!
//! ```toml
//! [isr]
//! key = "fetch"
//! long_term_cache_duration = "1 year"
//! long_term_kv_duration = "1 year"
//! # ... see config.rs for all options
//! ```

mod config;
mod duration;
mod envelope;
mod hooks;
mod keys;
mod lock;
mod middleware;
mod orchestrator;
mod origin;
mod policy;
mod queue;
mod response;
mod store;
mod worker;

pub use config::{IsrConfig, IsrConfigError, ResolvedConfig};
pub use duration::{DurationError, DurationSpec, parse_duration};
pub use envelope::{
    EnvelopeConfig, EnvelopeError, expires_at, format_http_date, is_expired, make_cacheable,
    make_cacheable_at, parse_http_date, s_maxage,
};
pub use hooks::{
    CacheHooks, FnHooks, HeaderHooks, HookContext, NoHooks, REVALIDATE_HEADER, RequestEvent,
};
pub use keys::{CacheKey, LOOKUP_NAMESPACE, LookupKey, content_hash};
pub use middleware::{IsrState, Locals, REVALIDATE_ROUTE, isr_layer};
pub use orchestrator::{
    IsrCache, IsrCacheBuilder, IsrError, Outcome, RequestFetcher, Resolved,
};
pub use origin::{Origin, OriginError};
pub use policy::CachePolicy;
pub use queue::{RevalidationQueue, RevalidationTask, TaskSource};
pub use response::{BufferError, BufferedResponse, OriginRequest};
pub use store::{
    CacheStorage, DEFAULT_CACHE_NAME, DurableTier, FastTier, MemoryDurableTier, MemoryFastTier,
    TierError,
};
pub use worker::{RevalidationWorker, WriteThrough};
