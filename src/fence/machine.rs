//! Fence lifecycle state machine.
//!
//! Pure: no I/O and no callbacks. The event loop feeds it socket events
//! and forwards whatever it returns to the observer.
//!
//! ```text
//! Connecting ─open─► Connected ─ack─► Ready ─update/delete─► Streaming
//!      │                 │              │                       │
//!      └──────── begin_disconnect ──────┴───────────────────────┴─► Disconnecting ─close─► Disconnected
//!
//! any live state ─fail─► Errored ─begin_disconnect─► Disconnecting
//! ```

// ============================================================================
// Imports
// ============================================================================

use crate::protocol::FenceEvent;
use crate::protocol::event::is_live_ack;

// ============================================================================
// FenceState
// ============================================================================

/// Lifecycle state of a live fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FenceState {
    /// Socket not yet open.
    #[default]
    Connecting,
    /// Socket open, waiting for the live acknowledgement.
    Connected,
    /// Acknowledged by the server.
    Ready,
    /// At least one notification received.
    Streaming,
    /// Local close in progress.
    Disconnecting,
    /// Socket closed.
    Disconnected,
    /// The transport failed. Still requires a disconnect.
    Errored,
}

impl FenceState {
    /// Returns `true` while messages are accepted.
    #[inline]
    #[must_use]
    pub fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Ready | Self::Streaming
        )
    }
}

// ============================================================================
// FenceMachine
// ============================================================================

/// Transition function for one fence.
#[derive(Debug, Default)]
pub struct FenceMachine {
    state: FenceState,
}

impl FenceMachine {
    /// Creates a machine in [`FenceState::Connecting`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> FenceState {
        self.state
    }

    /// Records that the socket opened. Returns `true` on the transition.
    pub fn open(&mut self) -> bool {
        if self.state == FenceState::Connecting {
            self.state = FenceState::Connected;
            true
        } else {
            false
        }
    }

    /// Classifies one inbound text message.
    ///
    /// Returns `None` once the fence is no longer live. A decode error
    /// leaves the state untouched.
    pub fn receive(&mut self, text: &str) -> Option<FenceEvent> {
        if !self.state.is_live() {
            return None;
        }
        if self.state == FenceState::Connecting {
            self.state = FenceState::Connected;
        }

        if self.state == FenceState::Connected && is_live_ack(text) {
            self.state = FenceState::Ready;
            return Some(FenceEvent::Ready);
        }

        let event = FenceEvent::classify(text);
        match &event {
            FenceEvent::Updated(_) | FenceEvent::Deleted(_) => {
                self.state = FenceState::Streaming;
            }
            FenceEvent::Ready if self.state == FenceState::Connected => {
                self.state = FenceState::Ready;
            }
            FenceEvent::Ready | FenceEvent::DecodeError(_) => {}
        }
        Some(event)
    }

    /// Records an unrecoverable transport failure.
    pub fn fail(&mut self) {
        if self.state.is_live() {
            self.state = FenceState::Errored;
        }
    }

    /// Records that a local close was requested.
    pub fn begin_disconnect(&mut self) {
        if self.state != FenceState::Disconnected {
            self.state = FenceState::Disconnecting;
        }
    }

    /// Records that the socket closed.
    ///
    /// Returns `true` only the first time, so the disconnect notification
    /// is emitted exactly once.
    pub fn close(&mut self) -> bool {
        if self.state == FenceState::Disconnected {
            return false;
        }
        self.state = FenceState::Disconnected;
        true
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::protocol::event::LIVE_ACK;

    const UPDATE: &str = r#"{"command":"set","group":"g","detect":"enter","key":"fleet","time":"2019-01-30T13:06:36.769273-07:00","id":"bus","object":{"type":"Point","coordinates":[-112.26,33.46]}}"#;
    const DELETE: &str = r#"{"command":"del","key":"fleet","id":"bus","time":"2019-01-30T13:06:36.769273-07:00"}"#;

    fn connected() -> FenceMachine {
        let mut machine = FenceMachine::new();
        assert!(machine.open());
        machine
    }

    #[test]
    fn test_happy_path() {
        let mut machine = connected();
        assert_eq!(machine.state(), FenceState::Connected);

        assert!(matches!(machine.receive(LIVE_ACK), Some(FenceEvent::Ready)));
        assert_eq!(machine.state(), FenceState::Ready);

        assert!(matches!(machine.receive(UPDATE), Some(FenceEvent::Updated(_))));
        assert_eq!(machine.state(), FenceState::Streaming);

        assert!(matches!(machine.receive(DELETE), Some(FenceEvent::Deleted(_))));
        assert_eq!(machine.state(), FenceState::Streaming);

        machine.begin_disconnect();
        assert_eq!(machine.state(), FenceState::Disconnecting);
        assert!(machine.close());
        assert_eq!(machine.state(), FenceState::Disconnected);
    }

    #[test]
    fn test_open_only_once() {
        let mut machine = connected();
        assert!(!machine.open());
    }

    #[test]
    fn test_decode_error_keeps_state() {
        let mut machine = connected();
        machine.receive(LIVE_ACK);

        let event = machine.receive("not json");
        assert!(matches!(event, Some(FenceEvent::DecodeError(ref e)) if e.is_decode_error()));
        assert_eq!(machine.state(), FenceState::Ready);
    }

    #[test]
    fn test_ack_with_whitespace_is_ready() {
        let mut machine = connected();
        assert!(matches!(
            machine.receive(r#"{ "live": true, "ok": true }"#),
            Some(FenceEvent::Ready)
        ));
        assert_eq!(machine.state(), FenceState::Ready);
    }

    #[test]
    fn test_close_reports_once() {
        let mut machine = connected();
        assert!(machine.close());
        assert!(!machine.close());
        machine.begin_disconnect();
        assert_eq!(machine.state(), FenceState::Disconnected);
    }

    #[test]
    fn test_errored_ignores_messages_until_disconnect() {
        let mut machine = connected();
        machine.fail();
        assert_eq!(machine.state(), FenceState::Errored);
        assert!(machine.receive(UPDATE).is_none());

        machine.begin_disconnect();
        assert!(machine.close());
    }

    #[test]
    fn test_messages_after_close_are_dropped() {
        let mut machine = connected();
        machine.begin_disconnect();
        assert!(machine.receive(UPDATE).is_none());
    }
}
