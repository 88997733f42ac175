//! Cache key generation.
//!
//! The content hash is SHA-256 over the request body followed by the URL.
//! It keys the durable tier and is embedded in the fast-tier lookup URL so
//! distinct bodies posted to the same URL never share an entry.

use axum::http::{HeaderMap, Method};
use sha2::{Digest, Sha256};
use url::Url;

use super::response::OriginRequest;

/// Path segment every fast-tier lookup URL is namespaced under.
pub const LOOKUP_NAMESPACE: &str = "/posts";

/// Synthetic read request addressing the fast tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupKey {
    url: Url,
    headers: HeaderMap,
}

impl LookupKey {
    /// Lookups are always reads, whatever the original method was.
    pub fn method(&self) -> Method {
        Method::GET
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    pub content_hash: String,
    pub lookup: LookupKey,
}

impl CacheKey {
    pub fn generate(request: &OriginRequest) -> Self {
        let content_hash = content_hash(request.url(), &request.body_text());

        let mut url = request.url().clone();
        let path = format!("{LOOKUP_NAMESPACE}{}{content_hash}", url.path());
        url.set_path(&path);

        Self {
            content_hash,
            lookup: LookupKey {
                url,
                headers: request.headers().clone(),
            },
        }
    }
}

/// Hex-encoded SHA-256 of `body + url`.
pub fn content_hash(url: &Url, body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hasher.update(url.as_str().as_bytes());
    hex::encode(hasher.finalize())
}
