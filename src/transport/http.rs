//! HTTP transport over `reqwest`.
//!
//! Each command is a single `GET /NAME+arg1+arg2`. The reply body is handed
//! back untouched; status and `ok` checks happen in the response decoder.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;
use url::Url;

use super::{Connect, Handle, HttpReply, HttpTransport};
use crate::error::Result;

// ============================================================================
// ReqwestTransport
// ============================================================================

/// [`HttpTransport`] backed by a shared `reqwest::Client`.
///
/// The client keeps its own connection pool, so the handle never reports
/// itself disconnected.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Wraps an existing client, keeping its timeouts and TLS settings.
    #[inline]
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Handle for ReqwestTransport {
    fn is_connected(&self) -> bool {
        true
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: Url) -> Result<HttpReply> {
        trace!(%url, "HTTP GET");
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        trace!(status, bytes = body.len(), "HTTP reply");
        Ok(HttpReply { status, body })
    }
}

// ============================================================================
// HttpConnector
// ============================================================================

/// Hands out [`ReqwestTransport`]s for a [`Link`](super::Link).
#[derive(Debug, Clone, Default)]
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    /// Creates a connector sharing `client`.
    #[inline]
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Connect<dyn HttpTransport> for HttpConnector {
    async fn connect(&self) -> Result<Arc<dyn HttpTransport>> {
        let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(self.client.clone()));
        Ok(transport)
    }
}
