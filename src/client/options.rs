//! Connection settings.
//!
//! # Example
//!
//! ```ignore
//! use talon::{ConnectionOptions, TransportKind};
//!
//! let options = ConnectionOptions::new("tile38.local")
//!     .with_port(9851)
//!     .with_transport(TransportKind::Pipe);
//!
//! assert_eq!(options.address(), "tile38.local:9851");
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::Ipv6Addr;

use url::Url;

use crate::error::{Error, Result};
use crate::transport::pipe::DEFAULT_PORT;

// ============================================================================
// Constants
// ============================================================================

/// Host used when none is configured.
pub const DEFAULT_HOST: &str = "localhost";

// ============================================================================
// TransportKind
// ============================================================================

/// Which transport a [`Connection`](crate::Connection) uses for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportKind {
    /// JSON over HTTP GET.
    #[default]
    Http,
    /// RESP over a persistent TCP connection.
    Pipe,
}

// ============================================================================
// ConnectionOptions
// ============================================================================

/// Where and how to reach the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Server host name or address.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Use `https` / `wss` instead of `http` / `ws`.
    pub secure: bool,

    /// Command transport.
    pub transport: TransportKind,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self::new(DEFAULT_HOST)
    }
}

// ============================================================================
// Constructors
// ============================================================================

impl ConnectionOptions {
    /// Creates options for `host` on the default port over HTTP.
    #[inline]
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_PORT,
            secure: false,
            transport: TransportKind::Http,
        }
    }
}

// ============================================================================
// Builder Methods
// ============================================================================

impl ConnectionOptions {
    /// Sets the port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enables TLS for HTTP and WebSocket URLs.
    #[inline]
    #[must_use]
    pub fn with_secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Selects the command transport.
    #[inline]
    #[must_use]
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }
}

// ============================================================================
// Conversion Methods
// ============================================================================

impl ConnectionOptions {
    /// Returns `host:port`, bracketing an IPv6 literal host (`[::1]:9851`).
    #[must_use]
    pub fn address(&self) -> String {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Returns the HTTP base URL, e.g. `http://localhost:9851/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the host does not form a URL.
    pub fn http_base(&self) -> Result<Url> {
        self.base_url(if self.secure { "https" } else { "http" })
    }

    /// Returns the WebSocket base URL, e.g. `ws://localhost:9851/`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the host does not form a URL.
    pub fn ws_base(&self) -> Result<Url> {
        self.base_url(if self.secure { "wss" } else { "ws" })
    }

    fn base_url(&self, scheme: &str) -> Result<Url> {
        let text = format!("{scheme}://{}/", self.address());
        Url::parse(&text).map_err(|e| Error::invalid_request(format!("invalid URL {text}: {e}")))
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] for an empty host, port 0 or a host
    /// that does not form a URL.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::invalid_request("host must not be empty"));
        }
        if self.port == 0 {
            return Err(Error::invalid_request("port must be greater than zero"));
        }
        self.http_base().map(|_| ())
    }
}

// ============================================================================
// Tests
// ============================================================================
