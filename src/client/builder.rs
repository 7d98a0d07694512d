//! Builder pattern for connection configuration.
//!
//! Provides a fluent API for configuring and creating [`Connection`]
//! instances.
//!
//! # Example
//!
//! ```no_run
//! use talon::{Connection, TransportKind};
//!
//! # fn example() -> talon::Result<()> {
//! let connection = Connection::builder()
//!     .host("127.0.0.1")
//!     .port(9851)
//!     .transport(TransportKind::Pipe)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::transport::{
    Connect, HttpConnector, HttpTransport, PipeConnector, PipeTransport,
};

use super::connection::Connection;
use super::options::{ConnectionOptions, TransportKind};

// ============================================================================
// ConnectionBuilder
// ============================================================================

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create a new builder.
#[derive(Default, Clone)]
pub struct ConnectionBuilder {
    /// Target and transport selection.
    options: ConnectionOptions,
    /// Shared HTTP client.
    http_client: Option<reqwest::Client>,
    /// Overrides how pipe transports are opened.
    pipe_connector: Option<Arc<dyn Connect<dyn PipeTransport>>>,
    /// Overrides how HTTP transports are opened.
    http_connector: Option<Arc<dyn Connect<dyn HttpTransport>>>,
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("options", &self.options)
            .field("custom_pipe_connector", &self.pipe_connector.is_some())
            .field("custom_http_connector", &self.http_connector.is_some())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ConnectionBuilder Implementation
// ============================================================================

impl ConnectionBuilder {
    /// Creates a builder targeting `localhost:9851` over HTTP.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the server host.
    #[inline]
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.options.host = host.into();
        self
    }

    /// Sets the server port.
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    /// Uses `https` and `wss`.
    #[inline]
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.options.secure = secure;
        self
    }

    /// Selects the command transport.
    #[inline]
    #[must_use]
    pub fn transport(mut self, transport: TransportKind) -> Self {
        self.options.transport = transport;
        self
    }

    /// Replaces all settings at once.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares an existing `reqwest::Client` (timeouts, proxies, TLS roots).
    #[inline]
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Opens pipe transports through `connector` instead of TCP.
    #[inline]
    #[must_use]
    pub fn pipe_connector(mut self, connector: Arc<dyn Connect<dyn PipeTransport>>) -> Self {
        self.pipe_connector = Some(connector);
        self
    }

    /// Opens HTTP transports through `connector` instead of `reqwest`.
    #[inline]
    #[must_use]
    pub fn http_connector(mut self, connector: Arc<dyn Connect<dyn HttpTransport>>) -> Self {
        self.http_connector = Some(connector);
        self
    }

    /// Builds the connection. No I/O happens until the first command.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`](crate::Error::InvalidRequest) if the
    /// options do not validate.
    pub fn build(self) -> Result<Connection> {
        self.options.validate()?;

        let pipe_connector: Arc<dyn Connect<dyn PipeTransport>> = match self.pipe_connector {
            Some(connector) => connector,
            None => Arc::new(PipeConnector::new(
                self.options.host.clone(),
                self.options.port,
            )),
        };
        let http_connector: Arc<dyn Connect<dyn HttpTransport>> = match self.http_connector {
            Some(connector) => connector,
            None => Arc::new(HttpConnector::new(self.http_client.unwrap_or_default())),
        };

        Connection::new(self.options, pipe_connector, http_connector)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_creates_default_builder() {
        let builder = ConnectionBuilder::new();
        assert_eq!(builder.options, ConnectionOptions::default());
        assert!(builder.http_client.is_none());
        assert!(builder.pipe_connector.is_none());
    }

    #[test]
    fn test_setters() {
        let builder = ConnectionBuilder::new()
            .host("geo.example")
            .port(7000)
            .secure(true)
            .transport(TransportKind::Pipe);

        assert_eq!(builder.options.host, "geo.example");
        assert_eq!(builder.options.port, 7000);
        assert!(builder.options.secure);
        assert_eq!(builder.options.transport, TransportKind::Pipe);
    }

    #[test]
    fn test_build_rejects_invalid_options() {
        let err = ConnectionBuilder::new().host("").build().unwrap_err();
        assert!(matches!(err, crate::Error::InvalidRequest { .. }));
    }

    #[test]
    fn test_debug_hides_connectors() {
        let text = format!("{:?}", ConnectionBuilder::new());
        assert!(text.contains("ConnectionBuilder"));
        assert!(text.contains("custom_pipe_connector: false"));
    }
}
