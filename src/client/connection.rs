//! Command dispatch over the selected transport.
//!
//! A [`Connection`] renders each command for its transport, obtains the
//! cached handle from its [`Link`] (connecting on first use), and decodes
//! the reply.
//!
//! | Method | HTTP | Pipe |
//! |--------|------|------|
//! | [`send`](Connection::send) | [`classify_http`] | [`response::decode`] |
//! | [`perform`](Connection::perform) / [`execute`](Connection::execute) | [`decode_http`] | `InvalidRequest` |
//! | [`subscribe`](Connection::subscribe) | `InvalidRequest` | dedicated transport |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::{Error, Result};
use crate::fence::FenceBuilder;
use crate::identifiers::ConnectionId;
use crate::protocol::response::{self, Response, classify_http, decode_http};
use crate::protocol::{Command, Fence, SpatialQuery, ToCommand, TypedCommand, WireValue};
use crate::transport::{Connect, HttpReply, HttpTransport, Link, Phase, PipeTransport};

use super::builder::ConnectionBuilder;
use super::options::{ConnectionOptions, TransportKind};
use super::subscription::Subscription;

// ============================================================================
// Types
// ============================================================================

enum Backend {
    Http(Link<dyn HttpTransport>),
    Pipe(Link<dyn PipeTransport>),
}

impl Backend {
    fn phase(&self) -> Phase {
        match self {
            Self::Http(link) => link.phase(),
            Self::Pipe(link) => link.phase(),
        }
    }

    fn release(&self) {
        match self {
            Self::Http(link) => link.release(),
            Self::Pipe(link) => link.release(),
        }
    }
}

/// Internal shared state for the connection.
struct ConnectionInner {
    id: ConnectionId,
    options: ConnectionOptions,
    http_base: Url,
    backend: Backend,
    /// Opens dedicated transports for subscriptions.
    pipe_connector: Arc<dyn Connect<dyn PipeTransport>>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.backend.release();
    }
}

// ============================================================================
// Connection
// ============================================================================

/// Client connection to a Tile38 server.
///
/// Cheap to clone; clones share the cached transport handle. The handle is
/// opened on the first command, reused while it reports itself connected,
/// and released by [`disconnect`](Self::disconnect) or when the last clone
/// is dropped.
///
/// # Example
///
/// ```no_run
/// use talon::Connection;
/// use talon::protocol::command::{Ping, Set};
///
/// # async fn example() -> talon::Result<()> {
/// let connection = Connection::builder().host("127.0.0.1").build()?;
///
/// connection.send(&Ping).await?.expect_pong()?;
/// connection.execute(&Set::point("fleet", "truck1", 33.51, -112.26)).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("address", &self.inner.options.address())
            .field("transport", &self.inner.options.transport)
            .field("phase", &self.inner.backend.phase())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Connection - Constructor
// ============================================================================

impl Connection {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    pub(crate) fn new(
        options: ConnectionOptions,
        pipe_connector: Arc<dyn Connect<dyn PipeTransport>>,
        http_connector: Arc<dyn Connect<dyn HttpTransport>>,
    ) -> Result<Self> {
        let http_base = options.http_base()?;
        let backend = match options.transport {
            TransportKind::Http => Backend::Http(Link::new(http_connector)),
            TransportKind::Pipe => Backend::Pipe(Link::new(Arc::clone(&pipe_connector))),
        };
        let id = ConnectionId::next();

        debug!(connection = %id, address = %options.address(), transport = ?options.transport, "Connection created");

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                id,
                options,
                http_base,
                backend,
                pipe_connector,
            }),
        })
    }
}

// ============================================================================
// Connection - Accessors
// ============================================================================

impl Connection {
    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the connection settings.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ConnectionOptions {
        &self.inner.options
    }

    /// Returns the state of the cached transport handle.
    #[inline]
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.inner.backend.phase()
    }
}

// ============================================================================
// Connection - Commands
// ============================================================================

impl Connection {
    /// Sends a command and classifies the reply.
    ///
    /// # Errors
    ///
    /// - [`Error::TransportFailure`] if connecting or the round trip fails
    /// - [`Error::BadResponse`] if the server reports an error
    pub async fn send(&self, command: &impl ToCommand) -> Result<Response> {
        let command = command.to_command();
        debug!(connection = %self.inner.id, command = %command.name(), "Sending command");

        let response = match &self.inner.backend {
            Backend::Http(link) => {
                let reply = self.http_round_trip(link, &command).await?;
                classify_http(reply.status, &reply.body)?
            }
            Backend::Pipe(link) => {
                let transport = link.get().await?;
                let value = transport
                    .send(command.name(), command.wire_arguments())
                    .await?;
                if let WireValue::Error(message) = value {
                    return Err(Error::bad_response(message));
                }
                response::decode(&value)
            }
        };

        trace!(connection = %self.inner.id, kind = response.kind(), "Reply decoded");
        Ok(response)
    }

    /// Sends a command in the background and hands the result to
    /// `callback` exactly once.
    ///
    /// Must be called within a tokio runtime.
    pub fn send_detached<F>(&self, command: &impl ToCommand, callback: F)
    where
        F: FnOnce(Result<Response>) + Send + 'static,
    {
        let command = command.to_command();
        let connection = self.clone();
        tokio::spawn(async move {
            let result = connection.send(&command).await;
            callback(result);
        });
    }

    /// Sends a command over HTTP and decodes the reply into `R`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] on a pipe connection
    /// - [`Error::BadResponse`] if the status is not 200 or `ok` is not true
    /// - [`Error::DecodeFailure`] if the body does not match `R`
    pub async fn perform<R: DeserializeOwned>(&self, command: &impl ToCommand) -> Result<R> {
        let Backend::Http(link) = &self.inner.backend else {
            return Err(Error::invalid_request(
                "typed replies require the HTTP transport",
            ));
        };

        let command = command.to_command();
        debug!(connection = %self.inner.id, command = %command.name(), "Performing command");

        let reply = self.http_round_trip(link, &command).await?;
        decode_http(reply.status, &reply.body)
    }

    /// Sends a command with a fixed reply schema.
    ///
    /// # Errors
    ///
    /// Same as [`perform`](Self::perform).
    pub async fn execute<C: TypedCommand>(&self, command: &C) -> Result<C::Response> {
        self.perform::<C::Response>(command).await
    }

    async fn http_round_trip(
        &self,
        link: &Link<dyn HttpTransport>,
        command: &Command,
    ) -> Result<HttpReply> {
        let url = self.url_for(command)?;
        let transport = link.get().await?;
        transport.get(url).await
    }

    fn url_for(&self, command: &Command) -> Result<Url> {
        let text = format!("{}{}", self.inner.http_base, command.http_path());
        Url::parse(&text).map_err(|e| Error::invalid_request(format!("invalid URL {text}: {e}")))
    }
}

// ============================================================================
// Connection - Subscriptions
// ============================================================================

impl Connection {
    /// Subscribes to pub/sub channels on a dedicated pipe transport.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidRequest`] on an HTTP connection or with no channels
    /// - [`Error::TransportFailure`] if the transport cannot be opened
    /// - [`Error::BadResponse`] if the server rejects the subscription
    pub async fn subscribe<I, S>(&self, channels: I) -> Result<Subscription>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if self.inner.options.transport != TransportKind::Pipe {
            return Err(Error::invalid_request(
                "subscriptions require the pipe transport",
            ));
        }

        let channels: Vec<String> = channels.into_iter().map(Into::into).collect();
        if channels.is_empty() {
            return Err(Error::invalid_request("at least one channel is required"));
        }

        let transport = self.inner.pipe_connector.connect().await?;
        Subscription::open(self.inner.id, transport, channels).await
    }

    /// Starts configuring a live fence against this connection's server.
    #[must_use]
    pub fn fence<Q: SpatialQuery>(&self, fence: &Fence<Q>) -> FenceBuilder {
        FenceBuilder::new(fence)
            .host(self.inner.options.host.clone())
            .port(self.inner.options.port)
            .secure(self.inner.options.secure)
    }

    /// Releases the cached transport handle.
    ///
    /// The next command reconnects.
    pub fn disconnect(&self) {
        debug!(connection = %self.inner.id, "Disconnecting");
        self.inner.backend.release();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicU64, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    use crate::protocol::command::{Get, Keys, Ping, Set};
    use crate::protocol::response::{KeysResponse, OkResponse};
    use crate::transport::Handle;

    // ------------------------------------------------------------------------
    // Fakes
    // ------------------------------------------------------------------------

    struct FakePipe;

    impl Handle for FakePipe {
        fn is_connected(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl PipeTransport for FakePipe {
        async fn send(&self, name: &str, _arguments: Vec<WireValue>) -> Result<WireValue> {
            Ok(match name {
                "PING" => WireValue::status("PONG"),
                "SET" => WireValue::status("OK"),
                "GET" => WireValue::Error("ERR id not found".to_string()),
                _ => WireValue::Integer(1),
            })
        }

        fn take_pushes(&self) -> Option<mpsc::UnboundedReceiver<WireValue>> {
            None
        }
    }

    #[derive(Default)]
    struct FakePipeConnector {
        calls: AtomicU64,
    }

    #[async_trait]
    impl Connect<dyn PipeTransport> for FakePipeConnector {
        async fn connect(&self) -> Result<Arc<dyn PipeTransport>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            let transport: Arc<dyn PipeTransport> = Arc::new(FakePipe);
            Ok(transport)
        }
    }

    #[derive(Default)]
    struct FakeHttp {
        paths: Mutex<Vec<String>>,
    }

    impl Handle for FakeHttp {
        fn is_connected(&self) -> bool {
            true
        }
    }

    #[async_trait]
    impl HttpTransport for FakeHttp {
        async fn get(&self, url: Url) -> Result<HttpReply> {
            self.paths.lock().push(url.path().to_string());
            let (status, body): (u16, &'static str) = if url.path().starts_with("/KEYS") {
                (200, r#"{"ok":true,"keys":["fleet"],"elapsed":"1µs"}"#)
            } else if url.path().starts_with("/GET") {
                (200, r#"{"ok":false,"err":"id not found","elapsed":"1µs"}"#)
            } else {
                (200, r#"{"ok":true,"elapsed":"1µs"}"#)
            };
            Ok(HttpReply {
                status,
                body: Bytes::from_static(body.as_bytes()),
            })
        }
    }

    struct FakeHttpConnector(Arc<FakeHttp>);

    #[async_trait]
    impl Connect<dyn HttpTransport> for FakeHttpConnector {
        async fn connect(&self) -> Result<Arc<dyn HttpTransport>> {
            let transport: Arc<dyn HttpTransport> = self.0.clone();
            Ok(transport)
        }
    }

    fn pipe_connection(connector: Arc<FakePipeConnector>) -> Connection {
        Connection::builder()
            .transport(TransportKind::Pipe)
            .pipe_connector(connector)
            .build()
            .expect("connection")
    }

    fn http_connection(http: Arc<FakeHttp>) -> Connection {
        Connection::builder()
            .http_connector(Arc::new(FakeHttpConnector(http)))
            .build()
            .expect("connection")
    }

    // ------------------------------------------------------------------------
    // Pipe
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_pipe_ping_yields_pong() {
        let connection = pipe_connection(Arc::default());
        assert_eq!(connection.send(&Ping).await.expect("send"), Response::Pong);
        assert_eq!(connection.phase(), Phase::Ready);
    }

    #[tokio::test]
    async fn test_pipe_server_error_is_bad_response() {
        let connection = pipe_connection(Arc::default());
        let err = connection.send(&Get::new("fleet", "x")).await.unwrap_err();
        assert!(err.is_bad_response());
        assert!(err.to_string().contains("id not found"));
    }

    #[tokio::test]
    async fn test_concurrent_sends_connect_once() {
        let connector = Arc::new(FakePipeConnector::default());
        let connection = pipe_connection(Arc::clone(&connector));

        let (a, b) = tokio::join!(connection.send(&Ping), connection.send(&Ping));
        assert_eq!(a.expect("a"), Response::Pong);
        assert_eq!(b.expect("b"), Response::Pong);
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disconnect_then_reconnect() {
        let connector = Arc::new(FakePipeConnector::default());
        let connection = pipe_connection(Arc::clone(&connector));

        connection.send(&Ping).await.expect("first");
        connection.disconnect();
        assert_eq!(connection.phase(), Phase::Idle);

        connection.send(&Ping).await.expect("second");
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_perform_requires_http() {
        let connection = pipe_connection(Arc::default());
        let err = connection.execute(&Keys::new("*")).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }

    #[tokio::test]
    async fn test_send_detached_invokes_callback_once() {
        let connection = pipe_connection(Arc::default());
        let (tx, mut rx) = mpsc::unbounded_channel();

        connection.send_detached(&Set::point("fleet", "a", 1.0, 2.0), move |result| {
            let _ = tx.send(result.map(|r| r.kind()));
        });

        assert_eq!(rx.recv().await.expect("callback").expect("ok"), "ok");
        assert!(rx.recv().await.is_none());
    }

    // ------------------------------------------------------------------------
    // HTTP
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_http_execute_typed() {
        let http = Arc::new(FakeHttp::default());
        let connection = http_connection(Arc::clone(&http));

        let keys: KeysResponse = connection.execute(&Keys::new("*")).await.expect("keys");
        assert_eq!(keys.keys, ["fleet"]);
        assert_eq!(http.paths.lock().as_slice(), ["/KEYS+%2A"]);
    }

    #[tokio::test]
    async fn test_http_ok_false_is_bad_response() {
        let connection = http_connection(Arc::default());
        let err = connection
            .perform::<OkResponse>(&Get::new("fleet", "nope"))
            .await
            .unwrap_err();
        assert!(err.is_bad_response());
    }

    #[tokio::test]
    async fn test_http_send_classifies() {
        let connection = http_connection(Arc::default());
        let response = connection.send(&Set::point("fleet", "a", 1.0, 2.0)).await;
        assert_eq!(response.expect("send"), Response::Ok);
    }

    #[tokio::test]
    async fn test_subscribe_requires_pipe() {
        let connection = http_connection(Arc::default());
        let err = connection.subscribe(["warehouse"]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest { .. }));
    }
}
