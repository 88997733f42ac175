//! ISR request middleware.
//!
//! Installs a [`RequestFetcher`] bound to the inbound request into the
//! request's [`Locals`], and serves the `/revalidateRoute` trigger.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode, header::HOST},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::hooks::{REVALIDATE_HEADER, RequestEvent};
use super::orchestrator::{IsrCache, IsrError, RequestFetcher};

/// Path of the external revalidation trigger.
pub const REVALIDATE_ROUTE: &str = "/revalidateRoute";

/// Shared state for [`isr_layer`].
#[derive(Clone)]
pub struct IsrState {
    pub isr: IsrCache,
    /// Client used for revalidation self-fetches.
    pub client: reqwest::Client,
    /// Fallback origin when a request carries no `Host` header.
    pub public_url: Url,
}

/// Per-request registry of cache fetchers, keyed by configured name.
#[derive(Clone, Default)]
pub struct Locals {
    fetchers: HashMap<String, RequestFetcher>,
}

impl Locals {
    pub fn insert(&mut self, key: impl Into<String>, fetcher: RequestFetcher) {
        self.fetchers.insert(key.into(), fetcher);
    }

    pub fn fetcher(&self, key: &str) -> Result<&RequestFetcher, IsrError> {
        self.fetchers
            .get(key)
            .ok_or_else(|| IsrError::UnknownFetcher(key.to_string()))
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn isr_layer(
    State(state): State<IsrState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let event = RequestEvent::new(
        event_url(&request, &state.public_url),
        request.headers().clone(),
    );

    if request.uri().path() == REVALIDATE_ROUTE {
        return trigger_revalidation(&state, &event);
    }

    let fetcher = state.isr.fetcher(event);
    let extensions = request.extensions_mut();
    match extensions.get_mut::<Locals>() {
        Some(locals) => locals.insert(state.isr.key(), fetcher),
        None => {
            let mut locals = Locals::default();
            locals.insert(state.isr.key(), fetcher);
            extensions.insert(locals);
        }
    }

    next.run(request).await
}

/// Fire a forced-refresh fetch at `route` and acknowledge immediately.
fn trigger_revalidation(state: &IsrState, event: &RequestEvent) -> Response {
    let Some(route) = event
        .url()
        .query_pairs()
        .find(|(name, _)| name == "route")
        .map(|(_, value)| value.into_owned())
    else {
        debug!("Revalidate trigger without route parameter");
        return (StatusCode::BAD_REQUEST, "missing `route` query parameter").into_response();
    };

    let Some(target) = revalidation_target(event.url(), &route) else {
        debug!(%route, "Revalidate trigger with invalid route");
        return (StatusCode::BAD_REQUEST, format!("invalid route `{route}`")).into_response();
    };

    info!(%target, "Revalidation triggered");
    let client = state.client.clone();
    let url = target.clone();
    tokio::spawn(async move {
        let result = client
            .get(url.clone())
            .header(REVALIDATE_HEADER, HeaderValue::from_static("true"))
            .send()
            .await;
        match result {
            Ok(response) => debug!(%url, status = %response.status(), "Revalidation fetch sent"),
            Err(err) => warn!(%url, error = %err, "Revalidation fetch failed"),
        }
    });

    (StatusCode::OK, format!("Revalidating {target}")).into_response()
}

/// Resolve `route` against the request origin.
///
/// Only absolute paths on the same origin are accepted.
fn revalidation_target(event_url: &Url, route: &str) -> Option<Url> {
    if !route.starts_with('/') || route.starts_with("//") {
        return None;
    }
    let target = event_url.join(route).ok()?;
    (target.origin() == event_url.origin()).then_some(target)
}

/// Absolute URL of the inbound request, preferring its `Host` header.
fn event_url(request: &Request<Body>, public_url: &Url) -> Url {
    let base = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .and_then(|host| Url::parse(&format!("{}://{host}", public_url.scheme())).ok())
        .unwrap_or_else(|| public_url.clone());
    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or("/");
    base.join(path_and_query).unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn public_url() -> Url {
        Url::parse("http://localhost:3000").expect("url")
    }

    #[test]
    fn event_url_prefers_host_header() {
        let request = Request::builder()
            .uri("/blog/post?draft=1")
            .header(HOST, "site.test:8080")
            .body(Body::empty())
            .expect("request");
        let url = event_url(&request, &public_url());
        assert_eq!(url.as_str(), "http://site.test:8080/blog/post?draft=1");
    }

    #[test]
    fn event_url_falls_back_to_public_url() {
        let request = Request::builder()
            .uri("/feed")
            .body(Body::empty())
            .expect("request");
        let url = event_url(&request, &public_url());
        assert_eq!(url.as_str(), "http://localhost:3000/feed");
    }

    #[test]
    fn revalidation_target_stays_on_request_origin() {
        let base = Url::parse("http://site.test:3000/revalidateRoute?route=/foo").expect("url");
        let target = revalidation_target(&base, "/foo?page=2").expect("same-origin path");
        assert_eq!(target.as_str(), "http://site.test:3000/foo?page=2");
    }

    #[test]
    fn revalidation_target_rejects_foreign_hosts() {
        let base = Url::parse("http://site.test:3000/revalidateRoute").expect("url");
        for route in [
            "@evil.example/steal",
            "//evil.example/steal",
            "/\\evil.example/steal",
            "http://evil.example/steal",
            "foo",
        ] {
            assert!(
                revalidation_target(&base, route).is_none(),
                "route {route:?} should be rejected"
            );
        }
    }
}
