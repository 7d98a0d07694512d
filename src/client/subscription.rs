//! Pub/sub channel subscriptions over a dedicated pipe transport.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::protocol::WireValue;
use crate::protocol::response::{self, Response};
use crate::transport::PipeTransport;

// ============================================================================
// Constants
// ============================================================================

const SUBSCRIBE: &str = "SUBSCRIBE";
const UNSUBSCRIBE: &str = "UNSUBSCRIBE";

// ============================================================================
// Subscription
// ============================================================================

/// Messages published to one or more channels.
///
/// Owns its transport; it is closed by [`unsubscribe`](Self::unsubscribe)
/// or on drop.
pub struct Subscription {
    connection: ConnectionId,
    channels: Vec<String>,
    transport: Arc<dyn PipeTransport>,
    pushes: mpsc::UnboundedReceiver<WireValue>,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("connection", &self.connection)
            .field("channels", &self.channels)
            .field("connected", &self.transport.is_connected())
            .finish_non_exhaustive()
    }
}

impl Subscription {
    /// Sends `SUBSCRIBE` on `transport` and takes over its pushed frames.
    pub(crate) async fn open(
        connection: ConnectionId,
        transport: Arc<dyn PipeTransport>,
        channels: Vec<String>,
    ) -> Result<Self> {
        let Some(pushes) = transport.take_pushes() else {
            transport.close();
            return Err(Error::unexpected_state("transport pushes already taken"));
        };

        let arguments = channels.iter().map(|c| WireValue::bulk(c.clone())).collect();
        let reply = match transport.send(SUBSCRIBE, arguments).await {
            Ok(reply) => reply,
            Err(e) => {
                transport.close();
                return Err(e);
            }
        };
        if let WireValue::Error(message) = reply {
            transport.close();
            return Err(Error::bad_response(message));
        }

        debug!(connection = %connection, ?channels, "Subscribed");

        Ok(Self {
            connection,
            channels,
            transport,
            pushes,
        })
    }

    /// Returns the subscribed channel names.
    #[inline]
    #[must_use]
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    /// Waits for the next published message.
    ///
    /// Channel messages are unwrapped to their payload before decoding, so
    /// fence notifications arrive as [`Response::SubscribeEvent`].
    /// Subscription confirmations are skipped. Returns `None` once the
    /// transport closes.
    pub async fn next(&mut self) -> Option<Response> {
        loop {
            let frame = self.pushes.recv().await?;
            match payload(&frame) {
                Frame::Message(value) => return Some(response::decode(value)),
                Frame::Control(kind) => {
                    trace!(connection = %self.connection, kind, "Skipping control frame");
                }
                Frame::Other => return Some(response::decode(&frame)),
            }
        }
    }

    /// Sends `UNSUBSCRIBE` and closes the transport.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportFailure`] if the transport closed first.
    pub async fn unsubscribe(self) -> Result<()> {
        let arguments = self
            .channels
            .iter()
            .map(|c| WireValue::bulk(c.clone()))
            .collect();
        let result = self.transport.send(UNSUBSCRIBE, arguments).await;
        debug!(connection = %self.connection, "Unsubscribed");
        result.map(|_| ())
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.transport.close();
    }
}

// ============================================================================
// Frame Unwrapping
// ============================================================================

enum Frame<'a> {
    Message(&'a WireValue),
    Control(&'a str),
    Other,
}

/// Splits `["message", channel, payload]` and
/// `["pmessage", pattern, channel, payload]` from control frames.
fn payload(frame: &WireValue) -> Frame<'_> {
    let Some(items) = frame.as_array() else {
        return Frame::Other;
    };
    match (items.first().and_then(WireValue::as_str), items.len()) {
        (Some("message"), 3) => Frame::Message(&items[2]),
        (Some("pmessage"), 4) => Frame::Message(&items[3]),
        (Some(kind @ ("subscribe" | "psubscribe" | "unsubscribe" | "punsubscribe")), _) => {
            Frame::Control(kind)
        }
        _ => Frame::Other,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::transport::Handle;

    const EVENT: &str = r#"{"command":"set","group":"g1","detect":"enter","hook":"warehouse","key":"fleet","time":"2024-03-01T10:00:00.123456789-07:00","id":"truck1","object":{"type":"Point","coordinates":[-112.26,33.51]}}"#;

    struct FakePipe {
        sent: Mutex<Vec<String>>,
        pushes: Mutex<Option<mpsc::UnboundedReceiver<WireValue>>>,
        closed: Mutex<bool>,
    }

    impl FakePipe {
        fn new() -> (Arc<Self>, mpsc::UnboundedSender<WireValue>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let pipe = Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                pushes: Mutex::new(Some(rx)),
                closed: Mutex::new(false),
            });
            (pipe, tx)
        }
    }

    impl Handle for FakePipe {
        fn is_connected(&self) -> bool {
            !*self.closed.lock()
        }

        fn close(&self) {
            *self.closed.lock() = true;
        }
    }

    #[async_trait]
    impl PipeTransport for FakePipe {
        async fn send(&self, name: &str, _arguments: Vec<WireValue>) -> Result<WireValue> {
            self.sent.lock().push(name.to_string());
            Ok(WireValue::Array(vec![
                WireValue::bulk(name.to_lowercase()),
                WireValue::bulk("warehouse"),
                WireValue::Integer(1),
            ]))
        }

        fn take_pushes(&self) -> Option<mpsc::UnboundedReceiver<WireValue>> {
            self.pushes.lock().take()
        }
    }

    fn message(channel: &str, body: &str) -> WireValue {
        WireValue::Array(vec![
            WireValue::bulk("message"),
            WireValue::bulk(channel.to_string()),
            WireValue::bulk(body.to_string()),
        ])
    }

    #[tokio::test]
    async fn test_messages_decode_to_subscribe_events() {
        let (pipe, tx) = FakePipe::new();
        let mut subscription =
            Subscription::open(ConnectionId::next(), pipe.clone(), vec!["warehouse".into()])
                .await
                .expect("open");

        tx.send(WireValue::Array(vec![
            WireValue::bulk("subscribe"),
            WireValue::bulk("warehouse"),
            WireValue::Integer(1),
        ]))
        .expect("push");
        tx.send(message("warehouse", EVENT)).expect("push");

        let event = subscription
            .next()
            .await
            .expect("message")
            .expect_event()
            .expect("event");
        assert_eq!(event.id, "truck1");
        assert_eq!(event.hook.as_deref(), Some("warehouse"));
        assert_eq!(pipe.sent.lock().as_slice(), ["SUBSCRIBE"]);
    }

    #[tokio::test]
    async fn test_pattern_messages_are_unwrapped() {
        let (pipe, tx) = FakePipe::new();
        let mut subscription = Subscription::open(ConnectionId::next(), pipe, vec!["w*".into()])
            .await
            .expect("open");

        tx.send(WireValue::Array(vec![
            WireValue::bulk("pmessage"),
            WireValue::bulk("w*"),
            WireValue::bulk("warehouse"),
            WireValue::bulk(EVENT),
        ]))
        .expect("push");

        let response = subscription.next().await.expect("message");
        assert_eq!(response.kind(), "subscribe_event");
    }

    #[tokio::test]
    async fn test_next_ends_when_transport_closes() {
        let (pipe, tx) = FakePipe::new();
        let mut subscription = Subscription::open(ConnectionId::next(), pipe, vec!["a".into()])
            .await
            .expect("open");
        drop(tx);
        assert!(subscription.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unsubscribe_sends_and_closes() {
        let (pipe, _tx) = FakePipe::new();
        let subscription =
            Subscription::open(ConnectionId::next(), pipe.clone(), vec!["a".into()])
                .await
                .expect("open");

        subscription.unsubscribe().await.expect("unsubscribe");
        assert_eq!(pipe.sent.lock().as_slice(), ["SUBSCRIBE", "UNSUBSCRIBE"]);
        assert!(!pipe.is_connected());
    }

    #[tokio::test]
    async fn test_open_fails_when_pushes_taken() {
        let (pipe, _tx) = FakePipe::new();
        let _ = pipe.take_pushes();
        let err = Subscription::open(ConnectionId::next(), pipe.clone(), vec!["a".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedState { .. }));
        assert!(!pipe.is_connected());
    }
}
