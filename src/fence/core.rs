//! Live fence handle and event loop.
//!
//! # Event Loop
//!
//! Each [`LiveFence`] spawns one tokio task that handles:
//!
//! - Inbound socket messages, classified by the [`FenceMachine`]
//! - Observer notifications, in receipt order
//! - Shutdown requests from [`LiveFence::disconnect`] and `Drop`
//!
//! The task owns the observer, so notifications never run concurrently.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, error, trace, warn};
use url::Url;

use crate::client::Connection;
use crate::error::Error;
use crate::identifiers::FenceId;
use crate::protocol::Command;

use super::machine::{FenceMachine, FenceState};
use super::observer::FenceObserver;

// ============================================================================
// Types
// ============================================================================

/// Command sent on a connection once the socket opens.
pub(crate) struct Seed {
    pub(crate) connection: Connection,
    pub(crate) command: Command,
}

/// Internal commands for the event loop.
enum FenceCommand {
    /// Close the socket, then acknowledge.
    Shutdown { ack: Option<oneshot::Sender<()>> },
}

// ============================================================================
// LiveFence
// ============================================================================

/// An open fence subscription.
///
/// Owns its socket. [`disconnect`](Self::disconnect) closes it and
/// notifies the observer; dropping the handle closes it as well.
pub struct LiveFence {
    id: FenceId,
    command: Command,
    url: Url,
    command_tx: mpsc::UnboundedSender<FenceCommand>,
    machine: Arc<Mutex<FenceMachine>>,
}

impl fmt::Debug for LiveFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFence")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LiveFence {
    /// Takes over an open socket and spawns the event loop.
    pub(crate) fn spawn<S>(
        stream: S,
        command: Command,
        url: Url,
        observer: Box<dyn FenceObserver>,
        seed: Option<Seed>,
    ) -> Self
    where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let id = FenceId::next();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let machine = Arc::new(Mutex::new(FenceMachine::new()));

        debug!(fence = %id, %url, "Fence opened");

        tokio::spawn(Self::run_event_loop(
            id,
            stream,
            command_rx,
            Arc::clone(&machine),
            observer,
            seed,
        ));

        Self {
            id,
            command,
            url,
            command_tx,
            machine,
        }
    }

    /// Returns the fence ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> FenceId {
        self.id
    }

    /// Returns the fenced command.
    #[inline]
    #[must_use]
    pub fn command(&self) -> &Command {
        &self.command
    }

    /// Returns the socket URL.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FenceState {
        self.machine.lock().state()
    }

    /// Closes the socket and waits until the observer has been told.
    ///
    /// The disconnect notification is emitted exactly once, whether the
    /// server or this call closed the socket first.
    pub async fn disconnect(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .command_tx
            .send(FenceCommand::Shutdown { ack: Some(ack_tx) })
            .is_err()
        {
            trace!(fence = %self.id, "Event loop already stopped");
            return;
        }
        let _ = ack_rx.await;
    }

    /// Event loop that handles socket I/O.
    async fn run_event_loop<S>(
        id: FenceId,
        stream: S,
        mut command_rx: mpsc::UnboundedReceiver<FenceCommand>,
        machine: Arc<Mutex<FenceMachine>>,
        mut observer: Box<dyn FenceObserver>,
        seed: Option<Seed>,
    ) where
        S: Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = stream.split();

        if machine.lock().open() {
            observer.on_connect(id);
        }
        if let Some(seed) = seed {
            Self::send_seed(id, seed);
        }

        let mut reading = true;

        loop {
            tokio::select! {
                // Messages from the server
                message = ws_read.next(), if reading => {
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            let event = machine.lock().receive(text.as_str());
                            if let Some(event) = event {
                                trace!(fence = %id, kind = event.kind(), "Fence message");
                                observer.on_event(id, event);
                            }
                        }

                        Some(Ok(Message::Close(_))) => {
                            debug!(fence = %id, "Fence closed by server");
                            Self::closed(id, &machine, observer.as_mut());
                            break;
                        }

                        Some(Err(e)) => {
                            error!(fence = %id, error = %e, "Fence socket failed");
                            machine.lock().fail();
                            observer.on_error(id, Error::transport(e.to_string()));
                            reading = false;
                        }

                        None => {
                            debug!(fence = %id, "Fence stream ended");
                            Self::closed(id, &machine, observer.as_mut());
                            break;
                        }

                        // Ignore Binary, Ping, Pong
                        _ => {}
                    }
                }

                // Commands from the handle
                command = command_rx.recv() => {
                    let ack = match command {
                        Some(FenceCommand::Shutdown { ack }) => ack,
                        None => None,
                    };

                    debug!(fence = %id, "Fence shutting down");
                    machine.lock().begin_disconnect();
                    if let Err(e) = ws_write.close().await {
                        trace!(fence = %id, error = %e, "Close frame not sent");
                    }
                    Self::closed(id, &machine, observer.as_mut());

                    if let Some(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }

        debug!(fence = %id, "Fence event loop terminated");
    }

    fn closed(id: FenceId, machine: &Mutex<FenceMachine>, observer: &mut dyn FenceObserver) {
        if machine.lock().close() {
            observer.on_disconnect(id);
        }
    }

    /// Fires the seed command without waiting for its reply.
    fn send_seed(id: FenceId, seed: Seed) {
        let name = seed.command.name().to_string();
        seed.connection.send_detached(&seed.command, move |result| match result {
            Ok(response) => trace!(fence = %id, command = %name, kind = response.kind(), "Seed sent"),
            Err(e) => warn!(fence = %id, command = %name, error = %e, "Seed command failed"),
        });
    }
}

impl Drop for LiveFence {
    fn drop(&mut self) {
        let _ = self.command_tx.send(FenceCommand::Shutdown { ack: None });
    }
}

// ============================================================================
// Tests
// ============================================================================
