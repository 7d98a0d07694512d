//! Server-pushed fence and channel messages.
//!
//! Push messages carry no discriminant tag. A message is classified by
//! trying each schema in a fixed order:
//!
//! | Order | Schema | Event |
//! |-------|--------|-------|
//! | 1 | [`FenceUpdate`] | [`FenceEvent::Updated`] |
//! | 2 | [`FenceDelete`] | [`FenceEvent::Deleted`] |
//! | 3 | [`LiveAck`] | [`FenceEvent::Ready`] |
//!
//! The first schema that parses wins. If none do, the last failure is
//! reported as [`FenceEvent::DecodeError`].
//!
//! Timestamps use `2016-05-24T09:09:49.123456-07:00`: fractional seconds and
//! a numeric UTC offset. A server running in UTC writes `Z` instead of the
//! offset, so RFC 3339 is accepted as well.

// ============================================================================
// Imports
// ============================================================================

use chrono::{DateTime, FixedOffset};
use geojson::GeoJson;
use rustc_hash::FxHashMap;
use serde::Deserialize;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Literal acknowledgement sent once a fence is live.
pub const LIVE_ACK: &str = r#"{"ok":true,"live":true}"#;

/// `chrono` format of push message timestamps.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

/// Command name of a delete notification.
const DELETE_COMMAND: &str = "del";

// ============================================================================
// Timestamp
// ============================================================================

mod timestamp {
    use chrono::{DateTime, FixedOffset};
    use serde::{Deserialize, Deserializer, de};

    use super::TIME_FORMAT;

    pub fn parse(text: &str) -> chrono::ParseResult<DateTime<FixedOffset>> {
        DateTime::parse_from_str(text, TIME_FORMAT).or_else(|_| DateTime::parse_from_rfc3339(text))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<FixedOffset>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        parse(&text).map_err(de::Error::custom)
    }
}

/// Parses a push message timestamp.
///
/// # Errors
///
/// Returns [`Error::DecodeFailure`] if `text` matches neither [`TIME_FORMAT`]
/// nor RFC 3339.
pub fn parse_time(text: &str) -> Result<DateTime<FixedOffset>> {
    timestamp::parse(text)
        .map_err(|e| Error::decode(format!("invalid timestamp {text:?}: {e}")))
}

// ============================================================================
// Schemas
// ============================================================================

/// A message published on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubscribeEvent {
    /// Triggering command, e.g. `set` or `del`.
    pub command: String,
    /// Detection group id.
    pub group: Option<String>,
    /// Detection type, e.g. `enter`.
    pub detect: Option<String>,
    /// Hook or channel name.
    pub hook: Option<String>,
    /// Collection key.
    pub key: Option<String>,
    /// Server time of the event.
    #[serde(with = "timestamp")]
    pub time: DateTime<FixedOffset>,
    /// Object id.
    pub id: String,
    /// Object geometry, absent for deletes.
    pub object: Option<GeoJson>,
}

impl SubscribeEvent {
    /// Parses a channel message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeFailure`] if the payload does not match.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::decode(format!("subscribe event: {e}")))
    }
}

/// An object entered, moved within, or left a fence.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FenceUpdate {
    /// Triggering command, usually `set`.
    pub command: String,
    /// Detection group id.
    pub group: String,
    /// Detection type.
    pub detect: String,
    /// Hook name, when delivered through a hook.
    pub hook: Option<String>,
    /// Collection key.
    pub key: String,
    /// Server time of the event.
    #[serde(with = "timestamp")]
    pub time: DateTime<FixedOffset>,
    /// Object id.
    pub id: String,
    /// Current object geometry.
    pub object: GeoJson,
    /// Field values of the object.
    pub fields: Option<FxHashMap<String, f64>>,
}

impl FenceUpdate {
    /// Parses an update message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeFailure`] if the message is not an update.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::decode(format!("fence update: {e}")))
    }
}

/// An object inside the fence was deleted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FenceDelete {
    /// Always `del`.
    pub command: String,
    /// Collection key.
    pub key: String,
    /// Object id.
    pub id: String,
    /// Server time of the event.
    #[serde(with = "timestamp")]
    pub time: DateTime<FixedOffset>,
}

impl FenceDelete {
    /// Parses a delete message.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeFailure`] if the message is not a delete.
    pub fn parse(text: &str) -> Result<Self> {
        let delete: Self = serde_json::from_str(text)
            .map_err(|e| Error::decode(format!("fence delete: {e}")))?;
        if delete.command != DELETE_COMMAND {
            return Err(Error::decode(format!(
                "fence delete: unexpected command {:?}",
                delete.command
            )));
        }
        Ok(delete)
    }
}

/// The fence is live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct LiveAck {
    /// Request succeeded.
    pub ok: bool,
    /// Fence is streaming.
    pub live: bool,
}

impl LiveAck {
    /// Parses a live acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DecodeFailure`] unless both flags are `true`.
    pub fn parse(text: &str) -> Result<Self> {
        let ack: Self =
            serde_json::from_str(text).map_err(|e| Error::decode(format!("live ack: {e}")))?;
        if !(ack.ok && ack.live) {
            return Err(Error::decode("live ack: flags not set"));
        }
        Ok(ack)
    }
}

/// Returns `true` if `text` is exactly the live acknowledgement literal.
#[inline]
#[must_use]
pub fn is_live_ack(text: &str) -> bool {
    text.trim() == LIVE_ACK
}

// ============================================================================
// FenceEvent
// ============================================================================

/// A classified fence message.
#[derive(Debug)]
pub enum FenceEvent {
    /// The fence is live.
    Ready,
    /// An object was updated.
    Updated(FenceUpdate),
    /// An object was deleted.
    Deleted(FenceDelete),
    /// The message matched no schema. Carries the last failure.
    DecodeError(Error),
}

impl FenceEvent {
    /// Classifies a text message.
    #[must_use]
    pub fn classify(text: &str) -> Self {
        if let Ok(update) = FenceUpdate::parse(text) {
            return Self::Updated(update);
        }
        if let Ok(delete) = FenceDelete::parse(text) {
            return Self::Deleted(delete);
        }
        match LiveAck::parse(text) {
            Ok(_) => Self::Ready,
            Err(e) => Self::DecodeError(e),
        }
    }

    /// Returns the variant name for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
            Self::DecodeError(_) => "decode_error",
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
