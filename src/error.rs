//! Error types for the Tile38 client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use talon::{Connection, Result};
//! use talon::protocol::command::Ping;
//!
//! async fn example(connection: &Connection) -> Result<()> {
//!     connection.send(&Ping).await?.expect_pong()?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Request | [`Error::InvalidRequest`] |
//! | Transport | [`Error::TransportFailure`], [`Error::Io`], [`Error::WebSocket`], [`Error::Http`] |
//! | Response | [`Error::BadResponse`], [`Error::DecodeFailure`], [`Error::Json`] |
//! | Internal | [`Error::UnexpectedState`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Request Errors
    // ========================================================================
    /// A well-formed request could not be constructed.
    ///
    /// Returned when URL construction fails or an operation is not available
    /// on the selected transport.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of what made the request invalid.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Connect, send or socket I/O failed.
    #[error("Transport failure: {message}")]
    TransportFailure {
        /// Description of the transport failure.
        message: String,
    },

    // ========================================================================
    // Response Errors
    // ========================================================================
    /// The server answered with something other than a successful reply.
    ///
    /// Covers non-200 HTTP status, a missing or false `ok` field, server
    /// error values on the pipe transport, and replies that did not match the
    /// variant the caller required.
    #[error("Bad response: {message}")]
    BadResponse {
        /// Description of the unexpected response.
        message: String,
    },

    /// A well-formed payload did not match the expected schema.
    #[error("Decode failure: {message}")]
    DecodeFailure {
        /// Description of the schema mismatch.
        message: String,
    },

    // ========================================================================
    // Internal Errors
    // ========================================================================
    /// An internal invariant was violated.
    #[error("Unexpected state: {message}")]
    UnexpectedState {
        /// Description of the violated invariant.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parse error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid request error.
    #[inline]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a transport failure error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    /// Creates a bad response error.
    #[inline]
    pub fn bad_response(message: impl Into<String>) -> Self {
        Self::BadResponse {
            message: message.into(),
        }
    }

    /// Creates a decode failure error.
    #[inline]
    pub fn decode(message: impl Into<String>) -> Self {
        Self::DecodeFailure {
            message: message.into(),
        }
    }

    /// Creates an unexpected state error.
    #[inline]
    pub fn unexpected_state(message: impl Into<String>) -> Self {
        Self::UnexpectedState {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a transport-level error.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::TransportFailure { .. } | Self::Io(_) | Self::WebSocket(_) | Self::Http(_)
        )
    }

    /// Returns `true` if the payload arrived but could not be decoded.
    #[inline]
    #[must_use]
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::DecodeFailure { .. } | Self::Json(_))
    }

    /// Returns `true` if the server rejected or mis-answered the request.
    #[inline]
    #[must_use]
    pub fn is_bad_response(&self) -> bool {
        matches!(self, Self::BadResponse { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
