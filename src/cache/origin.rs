use async_trait::async_trait;
use thiserror::Error;

use super::response::{BufferedResponse, OriginRequest};

#[derive(Debug, Error)]
pub enum OriginError {
    #[error("origin request failed: {0}")]
    Transport(String),
    #[error("failed to read origin response: {0}")]
    Body(String),
}

/// The upstream the cache sits in front of.
#[async_trait]
pub trait Origin: Send + Sync {
    async fn fetch(&self, request: OriginRequest) -> Result<BufferedResponse, OriginError>;
}
