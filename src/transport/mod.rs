//! Transport layer.
//!
//! Transports move rendered commands to the server and raw replies back.
//! They know nothing about command semantics.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   Link<dyn PipeTransport>   ┌──────────────────┐
//! │  Connection  │────────────────────────────►│  RespTransport   │──► TCP (RESP)
//! │              │   Link<dyn HttpTransport>   ├──────────────────┤
//! │              │────────────────────────────►│ ReqwestTransport │──► HTTP GET
//! └──────────────┘                             └──────────────────┘
//! ```
//!
//! A [`Link`] owns the lazily established handle and guarantees at most one
//! connect attempt in flight.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `link` | Lazy handle cache (`idle → connecting → ready`) |
//! | `pipe` | RESP over TCP with an event loop task |
//! | `http` | HTTP GET via `reqwest` |

// ============================================================================
// Submodules
// ============================================================================

/// HTTP transport.
pub mod http;

/// Lazy handle cache.
pub mod link;

/// RESP pipe transport.
pub mod pipe;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use url::Url;

use crate::error::Result;
use crate::protocol::WireValue;

// ============================================================================
// Re-exports
// ============================================================================

pub use http::{HttpConnector, ReqwestTransport};
pub use link::{Link, Phase};
pub use pipe::{PipeConnector, RespTransport};

// ============================================================================
// Traits
// ============================================================================

/// An established transport handle.
pub trait Handle: Send + Sync {
    /// Returns `false` once the handle can no longer carry requests.
    fn is_connected(&self) -> bool;

    /// Releases the underlying socket. Idempotent.
    fn close(&self) {}
}

/// Persistent request/response transport carrying [`WireValue`]s.
#[async_trait]
pub trait PipeTransport: Handle {
    /// Sends `name` with `arguments` and waits for the matching reply.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFailure`](crate::Error::TransportFailure)
    /// if the request cannot be written or the connection closes first.
    async fn send(&self, name: &str, arguments: Vec<WireValue>) -> Result<WireValue>;

    /// Takes the receiver of server-pushed values that answer no request.
    ///
    /// Returns `None` after the first call.
    fn take_pushes(&self) -> Option<mpsc::UnboundedReceiver<WireValue>>;
}

/// A raw HTTP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Bytes,
}

/// Request/response transport issuing HTTP GETs.
#[async_trait]
pub trait HttpTransport: Handle {
    /// Issues a GET for `url`.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error if no reply is received.
    async fn get(&self, url: Url) -> Result<HttpReply>;
}

/// Establishes transport handles for a [`Link`].
#[async_trait]
pub trait Connect<T: ?Sized>: Send + Sync {
    /// Opens a new handle.
    ///
    /// # Errors
    ///
    /// Returns a transport-level error if the handle cannot be established.
    async fn connect(&self) -> Result<Arc<T>>;
}
