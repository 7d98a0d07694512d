//! RESP pipe transport and event loop.
//!
//! # Event Loop
//!
//! Each [`RespTransport`] spawns one tokio task that handles:
//!
//! - Outgoing request frames from [`PipeTransport::send`]
//! - Incoming reply frames, decoded incrementally
//! - FIFO correlation of replies to requests
//! - Routing of unsolicited frames (channel messages) to the push receiver
//!
//! Replies arrive in request order, so correlation is a queue rather than
//! a map. At most [`MAX_PENDING_REQUESTS`] requests may await a reply.
//! Unsolicited frames are dropped until the push receiver has been taken.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

use super::{Connect, Handle, PipeTransport};
use crate::error::{Error, Result};
use crate::protocol::wire::{self, Decoder, WireValue};

// ============================================================================
// Constants
// ============================================================================

/// Default server port.
pub const DEFAULT_PORT: u16 = 9851;

/// Initial read buffer capacity.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Maximum requests awaiting a reply before new ones are rejected.
pub const MAX_PENDING_REQUESTS: usize = 1024;

// ============================================================================
// Types
// ============================================================================

type ReplySender = oneshot::Sender<Result<WireValue>>;

/// Internal commands for the event loop.
enum PipeCommand {
    /// Write a frame and queue for its reply.
    Send {
        frame: BytesMut,
        reply_tx: ReplySender,
    },
    /// Close the connection.
    Shutdown,
}

// ============================================================================
// RespTransport
// ============================================================================

/// RESP connection over any byte stream, normally TCP.
///
/// `RespTransport` is `Send + Sync`; requests from several tasks are
/// serialized through the event loop.
pub struct RespTransport {
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<PipeCommand>,
    /// Cleared by the event loop when it exits.
    connected: Arc<AtomicBool>,
    /// Requests sent and not yet answered or failed.
    in_flight: Arc<AtomicUsize>,
    /// Set once the push receiver has been taken.
    pushes_taken: Arc<AtomicBool>,
    /// Receiver of unsolicited frames until taken.
    pushes: Mutex<Option<mpsc::UnboundedReceiver<WireValue>>>,
}

impl RespTransport {
    /// Opens a TCP connection to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFailure`] if the connection is refused.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| Error::transport(format!("connect {host}:{port}: {e}")))?;
        stream.set_nodelay(true)?;

        debug!(host, port, "Pipe transport connected");
        Ok(Self::from_stream(stream))
    }

    /// Wraps an established stream and spawns the event loop.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let pushes_taken = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::run_event_loop(
            stream,
            command_rx,
            Pushes {
                tx: push_tx,
                taken: Arc::clone(&pushes_taken),
            },
            Arc::clone(&connected),
            Arc::clone(&in_flight),
        ));

        Self {
            command_tx,
            connected,
            in_flight,
            pushes_taken,
            pushes: Mutex::new(Some(push_rx)),
        }
    }

    /// Returns the number of requests awaiting a reply.
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Event loop that handles socket I/O.
    async fn run_event_loop<S>(
        stream: S,
        mut command_rx: mpsc::UnboundedReceiver<PipeCommand>,
        pushes: Pushes,
        connected: Arc<AtomicBool>,
        in_flight: Arc<AtomicUsize>,
    ) where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let mut buffer = BytesMut::with_capacity(READ_BUFFER_CAPACITY);
        let mut decoder = Decoder::new();
        let mut pending = Pending {
            queue: VecDeque::new(),
            in_flight,
        };

        let reason = loop {
            tokio::select! {
                // Incoming frames from server
                read = reader.read_buf(&mut buffer) => {
                    match read {
                        Ok(0) => break "closed by server",
                        Ok(n) => {
                            trace!(bytes = n, "Read from pipe");
                            if let Err(e) = Self::drain_frames(&mut decoder, &mut buffer, &mut pending, &pushes) {
                                error!(error = %e, "Malformed reply, closing pipe");
                                break "malformed reply";
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Pipe read failed");
                            break "read failed";
                        }
                    }
                }

                // Commands from the API
                command = command_rx.recv() => {
                    match command {
                        Some(PipeCommand::Send { frame, reply_tx }) => {
                            if let Err(e) = writer.write_all(&frame).await {
                                warn!(error = %e, "Pipe write failed");
                                pending.settle(reply_tx, Err(Error::transport(e.to_string())));
                                break "write failed";
                            }
                            pending.queue.push_back(reply_tx);
                        }

                        Some(PipeCommand::Shutdown) => {
                            debug!("Shutdown command received");
                            let _ = writer.shutdown().await;
                            break "shut down";
                        }

                        None => {
                            debug!("Command channel closed");
                            let _ = writer.shutdown().await;
                            break "dropped";
                        }
                    }
                }
            }
        };

        connected.store(false, Ordering::Release);
        pending.fail_all(reason);

        // Requests queued behind the exit never reach the socket.
        command_rx.close();
        while let Some(command) = command_rx.recv().await {
            if let PipeCommand::Send { reply_tx, .. } = command {
                pending.settle(reply_tx, Err(Error::transport(format!("connection {reason}"))));
            }
        }

        debug!(reason, "Pipe event loop terminated");
    }

    /// Decodes every complete frame in `buffer`.
    fn drain_frames(
        decoder: &mut Decoder,
        buffer: &mut BytesMut,
        pending: &mut Pending,
        pushes: &Pushes,
    ) -> Result<()> {
        while let Some(value) = decoder.decode(buffer)? {
            match pending.queue.pop_front() {
                Some(reply_tx) => pending.settle(reply_tx, Ok(value)),
                None if pushes.taken.load(Ordering::Acquire) => {
                    trace!(kind = value.kind(), "Unsolicited frame");
                    let _ = pushes.tx.send(value);
                }
                None => {
                    trace!(kind = value.kind(), "Unsolicited frame dropped, no receiver");
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Event Loop State
// ============================================================================

/// Reply senders in request order, with the shared in-flight count.
struct Pending {
    queue: VecDeque<ReplySender>,
    in_flight: Arc<AtomicUsize>,
}

impl Pending {
    /// Answers one request and releases its slot.
    fn settle(&self, reply_tx: ReplySender, result: Result<WireValue>) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        let _ = reply_tx.send(result);
    }

    /// Fails every queued request.
    fn fail_all(&mut self, reason: &str) {
        let count = self.queue.len();
        while let Some(reply_tx) = self.queue.pop_front() {
            self.settle(reply_tx, Err(Error::transport(format!("connection {reason}"))));
        }
        if count > 0 {
            debug!(count, "Failed pending requests on shutdown");
        }
    }
}

/// Unsolicited frame sink.
struct Pushes {
    tx: mpsc::UnboundedSender<WireValue>,
    taken: Arc<AtomicBool>,
}

impl Handle for RespTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.command_tx.is_closed()
    }

    fn close(&self) {
        let _ = self.command_tx.send(PipeCommand::Shutdown);
    }
}

#[async_trait]
impl PipeTransport for RespTransport {
    async fn send(&self, name: &str, arguments: Vec<WireValue>) -> Result<WireValue> {
        if self.command_tx.is_closed() {
            return Err(Error::transport("connection closed"));
        }

        self.in_flight
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < MAX_PENDING_REQUESTS).then_some(n + 1)
            })
            .map_err(|pending| {
                warn!(pending, max = MAX_PENDING_REQUESTS, "Too many pending requests");
                Error::transport(format!(
                    "too many pending requests: {pending}/{MAX_PENDING_REQUESTS}"
                ))
            })?;

        let frame = wire::encode_command(name, &arguments);
        let (reply_tx, reply_rx) = oneshot::channel();

        if self
            .command_tx
            .send(PipeCommand::Send { frame, reply_tx })
            .is_err()
        {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::transport("connection closed"));
        }

        trace!(command = name, "Request queued");

        reply_rx
            .await
            .map_err(|_| Error::transport("connection closed before reply"))?
    }

    fn take_pushes(&self) -> Option<mpsc::UnboundedReceiver<WireValue>> {
        let mut pushes = self.pushes.lock();
        let taken = pushes.take();
        if taken.is_some() {
            self.pushes_taken.store(true, Ordering::Release);
        }
        taken
    }
}

impl Drop for RespTransport {
    fn drop(&mut self) {
        let _ = self.command_tx.send(PipeCommand::Shutdown);
    }
}

// ============================================================================
// PipeConnector
// ============================================================================

/// Opens [`RespTransport`]s for a [`Link`](super::Link).
#[derive(Debug, Clone)]
pub struct PipeConnector {
    host: String,
    port: u16,
}

impl PipeConnector {
    /// Creates a connector for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

#[async_trait]
impl Connect<dyn PipeTransport> for PipeConnector {
    async fn connect(&self) -> Result<Arc<dyn PipeTransport>> {
        let transport: Arc<dyn PipeTransport> =
            Arc::new(RespTransport::connect(&self.host, self.port).await?);
        Ok(transport)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::io::duplex;

    async fn read_request<S: AsyncRead + Unpin>(server: &mut S, buffer: &mut BytesMut) -> WireValue {
        loop {
            if let Some(value) = wire::decode(buffer).expect("decode") {
                return value;
            }
            server.read_buf(buffer).await.expect("read");
        }
    }

    #[tokio::test]
    async fn test_replies_are_matched_in_order() {
        let (client, mut server) = duplex(1024);
        let transport = RespTransport::from_stream(client);

        let server_task = tokio::spawn(async move {
            let mut buffer = BytesMut::new();
            let first = read_request(&mut server, &mut buffer).await;
            let second = read_request(&mut server, &mut buffer).await;
            server.write_all(b"+PONG\r\n:7\r\n").await.expect("write");
            (first, second)
        });

        let (ping, ttl) = tokio::join!(
            transport.send("PING", Vec::new()),
            transport.send("TTL", vec![WireValue::bulk("fleet"), WireValue::bulk("a")]),
        );

        assert_eq!(ping.expect("ping"), WireValue::status("PONG"));
        assert_eq!(ttl.expect("ttl"), WireValue::Integer(7));

        let (first, second) = server_task.await.expect("join");
        assert_eq!(first, WireValue::Array(vec![WireValue::bulk("PING")]));
        assert_eq!(
            second,
            WireValue::Array(vec![
                WireValue::bulk("TTL"),
                WireValue::bulk("fleet"),
                WireValue::bulk("a"),
            ])
        );
    }

    #[tokio::test]
    async fn test_unsolicited_frames_are_pushed() {
        let (client, mut server) = duplex(1024);
        let transport = RespTransport::from_stream(client);
        let mut pushes = transport.take_pushes().expect("pushes");
        assert!(transport.take_pushes().is_none());

        server
            .write_all(b"*3\r\n$7\r\nmessage\r\n$1\r\nc\r\n$2\r\n{}\r\n")
            .await
            .expect("write");

        let pushed = pushes.recv().await.expect("push");
        assert_eq!(pushed.as_array().map(<[WireValue]>::len), Some(3));
    }

    #[tokio::test]
    async fn test_pushes_before_take_are_dropped() {
        let (client, mut server) = duplex(1024);
        let transport = RespTransport::from_stream(client);

        let server_task = tokio::spawn(async move {
            let mut buffer = BytesMut::new();
            let _ = read_request(&mut server, &mut buffer).await;
            server
                .write_all(b"*3\r\n$7\r\nmessage\r\n$1\r\nc\r\n$2\r\n{}\r\n+PONG\r\n")
                .await
                .expect("write");
            server
        });

        let pong = transport.send("PING", Vec::new()).await.expect("ping");
        assert_eq!(pong, WireValue::status("PONG"));

        let mut pushes = transport.take_pushes().expect("pushes");
        assert!(pushes.try_recv().is_err());
        drop(server_task.await.expect("join"));
    }

    #[tokio::test]
    async fn test_pending_requests_are_capped() {
        let (client, server) = duplex(64);
        let transport = Arc::new(RespTransport::from_stream(client));

        let waiting: Vec<_> = (0..MAX_PENDING_REQUESTS)
            .map(|_| {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move { transport.send("PING", Vec::new()).await })
            })
            .collect();

        for _ in 0..200 {
            if transport.pending_count() == MAX_PENDING_REQUESTS {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(transport.pending_count(), MAX_PENDING_REQUESTS);

        let err = transport.send("PING", Vec::new()).await.unwrap_err();
        assert!(err.is_transport_error());
        assert!(err.to_string().contains("too many pending requests"));

        drop(server);
        for request in waiting {
            assert!(request.await.expect("join").unwrap_err().is_transport_error());
        }
        assert_eq!(transport.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_server_close_fails_pending_and_disconnects() {
        let (client, mut server) = duplex(1024);
        let transport = RespTransport::from_stream(client);

        let server_task = tokio::spawn(async move {
            let mut buffer = BytesMut::new();
            let _ = read_request(&mut server, &mut buffer).await;
            drop(server);
        });

        let err = transport.send("PING", Vec::new()).await.unwrap_err();
        assert!(err.is_transport_error());
        server_task.await.expect("join");

        tokio::task::yield_now().await;
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_close_stops_event_loop() {
        let (client, _server) = duplex(1024);
        let transport = RespTransport::from_stream(client);
        assert!(transport.is_connected());

        transport.close();
        for _ in 0..50 {
            if !transport.is_connected() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(!transport.is_connected());
        assert!(transport.send("PING", Vec::new()).await.is_err());
    }
}
