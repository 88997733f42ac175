//! Policy hooks.
//!
//! Caller-supplied predicates consulted before the cache: one can force a
//! direct origin fetch, the other a refresh. Both receive the inbound request
//! event and the outbound origin request.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, header::COOKIE};
use url::Url;

use super::response::OriginRequest;

/// Header marking a server-to-server revalidation request.
pub const REVALIDATE_HEADER: &str = "x-revalidate";

/// The inbound request a fetcher is bound to.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    url: Url,
    headers: HeaderMap,
}

impl RequestEvent {
    pub fn new(url: Url, headers: HeaderMap) -> Self {
        Self { url, headers }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// True when the inbound request carries `x-revalidate: true`.
    pub fn is_programmatic_revalidation(&self) -> bool {
        self.headers
            .get_all(REVALIDATE_HEADER)
            .iter()
            .any(|value| value.as_bytes() == b"true")
    }

    /// Value of the first cookie called `name`.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.headers
            .get_all(COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }
}

/// Arguments handed to every hook.
#[derive(Debug, Clone, Copy)]
pub struct HookContext<'a> {
    pub event: &'a RequestEvent,
    pub request: &'a OriginRequest,
}

#[async_trait]
pub trait CacheHooks: Send + Sync {
    /// Skip both tiers and fetch the origin directly.
    async fn should_avoid_cache(&self, _ctx: HookContext<'_>) -> bool {
        false
    }

    /// Serve a fresh origin response and rewrite the cache with it.
    async fn should_refresh_cache(&self, _ctx: HookContext<'_>) -> bool {
        false
    }
}

/// Never avoids, never refreshes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

#[async_trait]
impl CacheHooks for NoHooks {}

/// Header and cookie driven hooks.
///
/// Refreshes when `refresh_header` is present on the inbound request and
/// avoids the cache when the `avoid_cookie` pair matches.
#[derive(Debug, Default, Clone)]
pub struct HeaderHooks {
    refresh_header: Option<HeaderName>,
    avoid_cookie: Option<(String, String)>,
}

impl HeaderHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refresh_on_header(mut self, name: HeaderName) -> Self {
        self.refresh_header = Some(name);
        self
    }

    pub fn avoid_on_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.avoid_cookie = Some((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl CacheHooks for HeaderHooks {
    async fn should_avoid_cache(&self, ctx: HookContext<'_>) -> bool {
        self.avoid_cookie
            .as_ref()
            .is_some_and(|(name, expected)| ctx.event.cookie(name) == Some(expected.as_str()))
    }

    async fn should_refresh_cache(&self, ctx: HookContext<'_>) -> bool {
        self.refresh_header
            .as_ref()
            .is_some_and(|name| ctx.event.headers().contains_key(name))
    }
}

type Predicate = Arc<dyn Fn(HookContext<'_>) -> bool + Send + Sync>;

/// Hooks built from plain closures.
#[derive(Clone, Default)]
pub struct FnHooks {
    avoid: Option<Predicate>,
    refresh: Option<Predicate>,
}

impl FnHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn avoid_when(
        mut self,
        predicate: impl Fn(HookContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.avoid = Some(Arc::new(predicate));
        self
    }

    pub fn refresh_when(
        mut self,
        predicate: impl Fn(HookContext<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.refresh = Some(Arc::new(predicate));
        self
    }
}

#[async_trait]
impl CacheHooks for FnHooks {
    async fn should_avoid_cache(&self, ctx: HookContext<'_>) -> bool {
        self.avoid.as_ref().is_some_and(|predicate| predicate(ctx))
    }

    async fn should_refresh_cache(&self, ctx: HookContext<'_>) -> bool {
        self.refresh.as_ref().is_some_and(|predicate| predicate(ctx))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn event(headers: &[(&'static str, &'static str)]) -> RequestEvent {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(value));
        }
        RequestEvent::new(Url::parse("https://site.test/page").expect("url"), map)
    }

    fn origin() -> OriginRequest {
        OriginRequest::parse("https://origin.test/page").expect("url")
    }

    #[test]
    fn revalidation_marker_requires_true() {
        assert!(event(&[("x-revalidate", "true")]).is_programmatic_revalidation());
        assert!(!event(&[("x-revalidate", "yes")]).is_programmatic_revalidation());
        assert!(!event(&[]).is_programmatic_revalidation());
    }

    #[test]
    fn cookie_lookup_splits_pairs() {
        let event = event(&[("cookie", "session=abc; DATA-PREVIEW=true")]);
        assert_eq!(event.cookie("DATA-PREVIEW"), Some("true"));
        assert_eq!(event.cookie("session"), Some("abc"));
        assert_eq!(event.cookie("missing"), None);
    }

    #[tokio::test]
    async fn header_hooks_follow_configured_triggers() {
        let hooks = HeaderHooks::new()
            .refresh_on_header(HeaderName::from_static("refresh-cache"))
            .avoid_on_cookie("DATA-PREVIEW", "true");
        let request = origin();

        let plain = event(&[]);
        let ctx = HookContext {
            event: &plain,
            request: &request,
        };
        assert!(!hooks.should_avoid_cache(ctx).await);
        assert!(!hooks.should_refresh_cache(ctx).await);

        let refresh = event(&[("refresh-cache", "1")]);
        let ctx = HookContext {
            event: &refresh,
            request: &request,
        };
        assert!(hooks.should_refresh_cache(ctx).await);

        let preview = event(&[("cookie", "DATA-PREVIEW=true")]);
        let ctx = HookContext {
            event: &preview,
            request: &request,
        };
        assert!(hooks.should_avoid_cache(ctx).await);

        let other = event(&[("cookie", "DATA-PREVIEW=false")]);
        let ctx = HookContext {
            event: &other,
            request: &request,
        };
        assert!(!hooks.should_avoid_cache(ctx).await);
    }

    #[tokio::test]
    async fn closure_hooks_see_origin_request() {
        let hooks = FnHooks::new().avoid_when(|ctx| ctx.request.url().path() == "/page");
        let plain = event(&[]);
        let request = origin();
        let ctx = HookContext {
            event: &plain,
            request: &request,
        };

        assert!(hooks.should_avoid_cache(ctx).await);
        assert!(!hooks.should_refresh_cache(ctx).await);
        assert!(!NoHooks.should_avoid_cache(ctx).await);
    }
}
