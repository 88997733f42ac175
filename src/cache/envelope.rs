//! Response envelopes stored in the fast tier.
//!
//! An envelope is the origin response plus `Cache-Control: s-maxage=<ms>` and
//! an absolute `Expires` date marking the end of the fresh window.

use axum::http::{
    HeaderMap, HeaderValue,
    header::{CACHE_CONTROL, EXPIRES},
};
use thiserror::Error;
use time::{
    Duration as TimeDuration, OffsetDateTime, PrimitiveDateTime,
    format_description::BorrowedFormatItem, macros::format_description,
};

use super::response::BufferedResponse;

/// RFC 1123 HTTP date, e.g. `Thu, 01 Jan 1970 00:00:00 GMT`.
const HTTP_DATE: &[BorrowedFormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("expiry is out of range: now + {0}ms")]
    OutOfRange(u64),
    #[error("failed to format expiry: {0}")]
    Format(#[from] time::error::Format),
    #[error("invalid header value: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
}

/// Durations applied when stamping an envelope, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvelopeConfig {
    pub long_term_cache_ms: u64,
    pub fresh_ms: u64,
}

/// Stamp a copy of `response` with cache metadata relative to now.
pub fn make_cacheable(
    response: &BufferedResponse,
    config: EnvelopeConfig,
) -> Result<BufferedResponse, EnvelopeError> {
    make_cacheable_at(response, config, OffsetDateTime::now_utc())
}

/// Stamp a copy of `response` with cache metadata relative to `now`.
pub fn make_cacheable_at(
    response: &BufferedResponse,
    config: EnvelopeConfig,
    now: OffsetDateTime,
) -> Result<BufferedResponse, EnvelopeError> {
    let fresh = i64::try_from(config.fresh_ms)
        .map(TimeDuration::milliseconds)
        .map_err(|_| EnvelopeError::OutOfRange(config.fresh_ms))?;
    let expires = now
        .checked_add(fresh)
        .ok_or(EnvelopeError::OutOfRange(config.fresh_ms))?;

    let mut envelope = response.clone();
    let headers = envelope.headers_mut();
    headers.append(
        CACHE_CONTROL,
        HeaderValue::from_str(&format!("s-maxage={}", config.long_term_cache_ms))?,
    );
    headers.append(EXPIRES, HeaderValue::from_str(&format_http_date(expires)?)?);
    Ok(envelope)
}

pub fn format_http_date(at: OffsetDateTime) -> Result<String, time::error::Format> {
    at.to_offset(time::UtcOffset::UTC).format(HTTP_DATE)
}

pub fn parse_http_date(value: &str) -> Option<OffsetDateTime> {
    PrimitiveDateTime::parse(value.trim(), HTTP_DATE)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

/// The last `Expires` value on the envelope, if it parses.
pub fn expires_at(headers: &HeaderMap) -> Option<OffsetDateTime> {
    headers
        .get_all(EXPIRES)
        .iter()
        .last()
        .and_then(|value| value.to_str().ok())
        .and_then(parse_http_date)
}

/// Missing or unreadable expiry counts as expired.
pub fn is_expired(envelope: &BufferedResponse, now: OffsetDateTime) -> bool {
    expires_at(envelope.headers()).is_none_or(|expires| expires < now)
}

/// The last `s-maxage` directive across all `Cache-Control` values.
pub fn s_maxage(headers: &HeaderMap) -> Option<u64> {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|directive| directive.trim().strip_prefix("s-maxage="))
        .filter_map(|seconds| seconds.trim().parse().ok())
        .last()
}
