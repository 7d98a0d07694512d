//! Talon - async Tile38 client.
//!
//! Typed commands for a Tile38 geospatial server, sent over HTTP (JSON
//! replies) or a persistent RESP pipe, plus live geofences over WebSocket.
//!
//! # Architecture
//!
//! - **Commands** are plain values. Each renders to a name plus ordered
//!   argument tokens, which become either an HTTP path or RESP bulk strings.
//! - **Replies** are decoded without a type tag: HTTP bodies into typed
//!   schemas, pipe values into a closed [`Response`] set.
//! - **Fences** turn a socket of untagged push messages into ordered
//!   observer notifications.
//!
//! Key design principles:
//!
//! - A [`Connection`] owns at most one transport handle, opened on the first
//!   command and shared by concurrent callers
//! - One event loop task per pipe transport and per fence (no polling)
//! - Transports sit behind traits, so tests drive the core with doubles
//!
//! # Quick Start
//!
//! ```no_run
//! use talon::{Connection, Result};
//! use talon::protocol::command::Set;
//! use talon::protocol::query::{Coordinate, Nearby, Options};
//! use talon::protocol::response::ListObjectsResponse;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let connection = Connection::builder().host("127.0.0.1").build()?;
//!
//!     connection
//!         .execute(&Set::point("fleet", "truck1", 33.5123, -112.2693))
//!         .await?;
//!
//!     let nearby = Nearby::new("fleet", Coordinate::new(33.462, -112.268), 6000.0)
//!         .options(Options::new().limit(10));
//!     let found: ListObjectsResponse = connection.perform(&nearby).await?;
//!     println!("{} objects", found.geojson_objects().len());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Connection`], builder, options, channel subscriptions |
//! | [`fence`] | Live fences: builder, handle, state machine, observer |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Commands, wire values, reply decoding |
//! | [`transport`] | HTTP and RESP transports, lazy handle cache |

// ============================================================================
// Modules
// ============================================================================

/// Client connection and configuration.
///
/// Use [`Connection::builder()`] to create a configured connection.
pub mod client;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Live geofence subscriptions.
pub mod fence;

/// Type-safe identifiers for connections and fences.
pub mod identifiers;

/// Command model and reply decoding.
///
/// Transport-agnostic and free of I/O.
pub mod protocol;

/// Transport layer.
///
/// Pipe, HTTP and the lazy handle cache.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Client types
pub use client::{Connection, ConnectionBuilder, ConnectionOptions, Subscription, TransportKind};

// Fence types
pub use fence::{FenceBuilder, FenceNotification, FenceObserver, FenceState, LiveFence};

// Protocol types
pub use protocol::{Command, FenceEvent, Response, ToCommand, TypedCommand, WireValue};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::{ConnectionId, FenceId};
