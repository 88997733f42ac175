//! Buffered request and response values.
//!
//! Bodies are held as `Bytes` so a request can be hashed, cloned into a
//! background task and still sent to the origin without re-reading a stream.

use std::borrow::Cow;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use http_body_util::BodyExt;
use thiserror::Error;
use url::Url;

const TEXT_PLAIN_UTF8: &str = "text/plain;charset=UTF-8";

/// A request destined for the origin.
#[derive(Debug, Clone)]
pub struct OriginRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl OriginRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Parse `url` and build a GET request for it.
    pub fn parse(url: &str) -> Result<Self, url::ParseError> {
        Url::parse(url).map(Self::get)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn body_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("failed to buffer response body: {0}")]
    Body(String),
}

/// A fully buffered HTTP response.
#[derive(Debug, Clone)]
pub struct BufferedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl BufferedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A 200 response carrying `text` with default plain-text headers.
    pub fn from_text(text: impl Into<String>) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(TEXT_PLAIN_UTF8));
        Self::new(StatusCode::OK, headers, text.into())
    }

    /// Collect the body of an axum response.
    pub async fn from_response(response: Response) -> Result<Self, BufferError> {
        let (parts, body) = response.into_parts();
        let collected = BodyExt::collect(body)
            .await
            .map_err(|err| BufferError::Body(err.to_string()))?;
        Ok(Self::new(parts.status, parts.headers, collected.to_bytes()))
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

impl IntoResponse for BufferedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_response_uses_plain_text_defaults() {
        let response = BufferedResponse::from_text("hello");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).map(|v| v.as_bytes()),
            Some(TEXT_PLAIN_UTF8.as_bytes())
        );
        assert_eq!(response.text(), "hello");
    }

    #[tokio::test]
    async fn buffering_preserves_status_headers_and_body() {
        let response = Response::builder()
            .status(StatusCode::CREATED)
            .header("x-origin", "yes")
            .body(Body::from("payload"))
            .expect("response");

        let buffered = BufferedResponse::from_response(response)
            .await
            .expect("buffered");
        assert_eq!(buffered.status(), StatusCode::CREATED);
        assert_eq!(buffered.headers()["x-origin"], "yes");
        assert_eq!(buffered.body(), &Bytes::from("payload"));

        let rebuilt = buffered.clone().into_response();
        assert_eq!(rebuilt.status(), StatusCode::CREATED);
    }

    #[test]
    fn request_body_text_is_lossy() {
        let request = OriginRequest::parse("https://example.com/api")
            .expect("url")
            .with_body(vec![0x66, 0x6f, 0xff]);
        assert_eq!(request.body_text(), "fo\u{fffd}");
        assert_eq!(request.method(), Method::GET);
    }
}
