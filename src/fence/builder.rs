//! Builder for live fences.
//!
//! # Example
//!
//! ```no_run
//! use talon::fence::{FenceBuilder, FenceNotification};
//! use talon::protocol::query::{Coordinate, Detect, Fence, Nearby};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> talon::Result<()> {
//! let nearby = Nearby::new("fleet", Coordinate::new(33.462, -112.268), 6000.0);
//! let (tx, mut rx) = mpsc::unbounded_channel::<FenceNotification>();
//!
//! let fence = FenceBuilder::new(&Fence::new(nearby).detect([Detect::Enter, Detect::Exit]))
//!     .host("127.0.0.1")
//!     .observer(tx)
//!     .open()
//!     .await?;
//!
//! while let Some(notification) = rx.recv().await {
//!     println!("{notification:?}");
//! }
//! fence.disconnect().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use tokio_tungstenite::connect_async;
use tracing::debug;
use url::Url;

use crate::client::{Connection, ConnectionOptions};
use crate::error::{Error, Result};
use crate::protocol::{Command, Fence, SpatialQuery, ToCommand};

use super::core::{LiveFence, Seed};
use super::observer::FenceObserver;

// ============================================================================
// FenceBuilder
// ============================================================================

/// Builder for a [`LiveFence`].
///
/// Use [`Connection::fence`] to start from a connection's host and port.
pub struct FenceBuilder {
    command: Command,
    options: ConnectionOptions,
    observer: Option<Box<dyn FenceObserver>>,
    seed: Option<Seed>,
}

impl fmt::Debug for FenceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceBuilder")
            .field("command", &self.command)
            .field("address", &self.options.address())
            .field("secure", &self.options.secure)
            .field("has_observer", &self.observer.is_some())
            .field("has_seed", &self.seed.is_some())
            .finish()
    }
}

impl FenceBuilder {
    /// Creates a builder for `fence` against `localhost:9851`.
    #[must_use]
    pub fn new<Q: SpatialQuery>(fence: &Fence<Q>) -> Self {
        Self {
            command: fence.to_command(),
            options: ConnectionOptions::default(),
            observer: None,
            seed: None,
        }
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

    /// Uses `wss` instead of `ws`.
    #[inline]
    #[must_use]
    pub fn secure(mut self, secure: bool) -> Self {
        self.options.secure = secure;
        self
    }

    /// Sets the notification sink.
    ///
    /// Without one, notifications are discarded.
    #[must_use]
    pub fn observer(mut self, observer: impl FenceObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Sends `command` on `connection` once the socket opens.
    ///
    /// The reply is not awaited; failures are logged.
    #[must_use]
    pub fn on_connect(mut self, connection: &Connection, command: &impl ToCommand) -> Self {
        self.seed = Some(Seed {
            connection: connection.clone(),
            command: command.to_command(),
        });
        self
    }

    /// Returns the fenced command.
    #[inline]
    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Returns the socket URL, e.g. `ws://localhost:9851/NEARBY+fleet+FENCE+...`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the host does not form a URL.
    pub fn url(&self) -> Result<Url> {
        let text = format!("{}{}", self.options.ws_base()?, self.command.http_path());
        Url::parse(&text).map_err(|e| Error::invalid_request(format!("invalid URL {text}: {e}")))
    }

    /// Opens the socket and starts delivering notifications.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] if the URL cannot be built
    /// - [`Error::TransportFailure`] if the WebSocket handshake fails
    pub async fn open(self) -> Result<LiveFence> {
        let url = self.url()?;

        let (stream, response) = connect_async(url.as_str())
            .await
            .map_err(|e| Error::transport(format!("connect {url}: {e}")))?;

        debug!(%url, status = response.status().as_u16(), "Fence handshake complete");

        let observer: Box<dyn FenceObserver> = match self.observer {
            Some(observer) => observer,
            None => Box::new(()),
        };
        Ok(LiveFence::spawn(stream, self.command, url, observer, self.seed))
    }
}

// ============================================================================
// Tests
// ============================================================================
