//! HTTP origin backed by `reqwest`.

use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, header};
use reqwest::Client;
use tracing::debug;

use crate::cache::{BufferedResponse, Origin, OriginError, OriginRequest};

use super::error::InfraError;

/// Connection-scoped headers never forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
    header::TRAILER,
    header::PROXY_AUTHORIZATION,
];

#[derive(Clone, Debug)]
pub struct HttpOrigin {
    client: Client,
}

impl HttpOrigin {
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| InfraError::origin(err.to_string()))?;
        Ok(Self { client })
    }

    pub fn user_agent() -> &'static str {
        concat!("isr-cache/", env!("CARGO_PKG_VERSION"))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

#[async_trait]
impl Origin for HttpOrigin {
    async fn fetch(&self, request: OriginRequest) -> Result<BufferedResponse, OriginError> {
        let mut headers = request.headers().clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);

        let response = self
            .client
            .request(request.method().clone(), request.url().clone())
            .headers(headers)
            .body(request.body().clone())
            .send()
            .await
            .map_err(|err| OriginError::Transport(err.to_string()))?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response
            .bytes()
            .await
            .map_err(|err| OriginError::Body(err.to_string()))?;

        debug!(url = %request.url(), status = status.as_u16(), "Origin responded");
        Ok(BufferedResponse::new(status, headers, body))
    }
}

pub(crate) fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove("keep-alive");
}
