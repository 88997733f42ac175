//! Demo caching proxy: every path is fetched from the origin through the ISR
//! fetcher installed for the request.

mod middleware;

use axum::{
    Router,
    body::{Body, to_bytes},
    extract::State,
    http::{HeaderName, HeaderValue, Request, StatusCode, Uri, header},
    middleware::from_fn,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
};
use url::Url;

use crate::application::error::HttpError;
use crate::cache::{CachePolicy, IsrState, Locals, OriginRequest, isr_layer};

pub use middleware::{RequestContext, log_responses, set_request_context};

/// Header naming the cache branch that produced a proxied response.
pub const OUTCOME_HEADER: HeaderName = HeaderName::from_static("x-isr-outcome");

const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;
const SOURCE: &str = "infra::http::proxy";

#[derive(Clone)]
pub struct ProxyState {
    pub isr: IsrState,
    pub origin_base: Url,
    /// Policy applied to every proxied request.
    pub policy: CachePolicy,
}

pub fn build_router(state: ProxyState) -> Router {
    let isr_state = state.isr.clone();

    Router::new()
        .fallback(proxy)
        .with_state(state)
        .layer(from_fn_with_state(isr_state, isr_layer))
        .layer(from_fn(log_responses))
        .layer(from_fn(set_request_context))
}

async fn proxy(
    State(state): State<ProxyState>,
    request: Request<Body>,
) -> Result<Response, HttpError> {
    let (parts, body) = request.into_parts();

    let fetcher = parts
        .extensions
        .get::<Locals>()
        .ok_or_else(|| {
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Cache unavailable",
                "request reached the proxy without ISR locals",
            )
        })?
        .fetcher(state.isr.isr.key())?
        .clone();

    let url = origin_target(&state.origin_base, &parts.uri);

    let body = to_bytes(body, MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|err| {
            HttpError::from_error(
                SOURCE,
                StatusCode::PAYLOAD_TOO_LARGE,
                "Request body rejected",
                &err,
            )
        })?;

    let mut headers = parts.headers;
    headers.remove(header::HOST);
    let origin_request = OriginRequest::new(parts.method, url)
        .with_headers(headers)
        .with_body(body);

    let resolved = fetcher.resolve(origin_request, &state.policy).await?;
    let mut response = resolved.response.into_response();
    response.headers_mut().insert(
        OUTCOME_HEADER,
        HeaderValue::from_static(resolved.outcome.as_str()),
    );
    Ok(response)
}

/// `base` with the request path appended to its path and the request query.
///
/// The request path never changes the origin host, even when it starts with `//`.
fn origin_target(base: &Url, uri: &Uri) -> Url {
    let mut target = base.clone();
    let path = format!("{}{}", base.path().trim_end_matches('/'), uri.path());
    target.set_path(&path);
    target.set_query(uri.query());
    target.set_fragment(None);
    target
}
