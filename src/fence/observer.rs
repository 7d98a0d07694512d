//! Fence notification sinks.
//!
//! Implement [`FenceObserver`] for callbacks, or pass an
//! `mpsc::UnboundedSender<FenceNotification>` to receive everything as a
//! stream.

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;

use crate::error::Error;
use crate::identifiers::FenceId;
use crate::protocol::{FenceDelete, FenceEvent, FenceUpdate};

// ============================================================================
// FenceObserver
// ============================================================================

/// Receives fence notifications in arrival order.
///
/// Called from the fence's event loop task; implementations should not
/// block. Every method defaults to doing nothing.
pub trait FenceObserver: Send {
    /// The socket opened.
    fn on_connect(&mut self, _fence: FenceId) {}

    /// The server acknowledged the fence.
    fn on_ready(&mut self, _fence: FenceId) {}

    /// An object matched the fence.
    fn on_update(&mut self, _fence: FenceId, _update: FenceUpdate) {}

    /// A matched object was deleted.
    fn on_delete(&mut self, _fence: FenceId, _delete: FenceDelete) {}

    /// A message could not be decoded, or the transport failed.
    fn on_error(&mut self, _fence: FenceId, _error: Error) {}

    /// The socket closed. Called exactly once.
    fn on_disconnect(&mut self, _fence: FenceId) {}

    /// Dispatches a classified message to the matching method.
    fn on_event(&mut self, fence: FenceId, event: FenceEvent) {
        match event {
            FenceEvent::Ready => self.on_ready(fence),
            FenceEvent::Updated(update) => self.on_update(fence, update),
            FenceEvent::Deleted(delete) => self.on_delete(fence, delete),
            FenceEvent::DecodeError(error) => self.on_error(fence, error),
        }
    }
}

/// Discards everything.
impl FenceObserver for () {}

// ============================================================================
// Channel Adapter
// ============================================================================

/// A fence notification delivered through a channel.
#[derive(Debug)]
pub enum FenceNotification {
    /// The socket opened.
    Connected,
    /// A classified message, including decode errors.
    Event(FenceEvent),
    /// The transport failed; the fence must still be disconnected.
    TransportError(Error),
    /// The socket closed.
    Disconnected,
}

impl FenceNotification {
    /// Returns the variant name for logging and assertions.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Event(event) => event.kind(),
            Self::TransportError(_) => "transport_error",
            Self::Disconnected => "disconnected",
        }
    }
}

impl FenceObserver for mpsc::UnboundedSender<FenceNotification> {
    fn on_connect(&mut self, _fence: FenceId) {
        let _ = self.send(FenceNotification::Connected);
    }

    fn on_error(&mut self, _fence: FenceId, error: Error) {
        let _ = self.send(FenceNotification::TransportError(error));
    }

    fn on_disconnect(&mut self, _fence: FenceId) {
        let _ = self.send(FenceNotification::Disconnected);
    }

    fn on_event(&mut self, _fence: FenceId, event: FenceEvent) {
        let _ = self.send(FenceNotification::Event(event));
    }
}

// ============================================================================
// Tests
// ============================================================================
