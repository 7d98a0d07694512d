//! Tile38 wire protocol.
//!
//! Everything here is transport-agnostic and free of I/O: commands render
//! into tokens, replies decode into typed values.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `command` | [`Command`] and single-object / key commands |
//! | `query` | List queries, [`Options`], [`Fence`] wrapping |
//! | `wire` | [`WireValue`] and the RESP codec |
//! | `response` | Reply classification and typed HTTP schemas |
//! | `event` | Fence and channel push messages |
//! | `geometry` | GeoJSON adapter |

// ============================================================================
// Submodules
// ============================================================================

/// Command model and non-list commands.
pub mod command;

/// Fence and channel push messages.
pub mod event;

/// GeoJSON adapter.
pub mod geometry;

/// List queries and fence wrapping.
pub mod query;

/// Reply decoding.
pub mod response;

/// RESP wire values and codec.
pub mod wire;

// ============================================================================
// Re-exports
// ============================================================================

pub use command::{Command, ToCommand, TypedCommand};
pub use event::{FenceDelete, FenceEvent, FenceUpdate, SubscribeEvent};
pub use query::{Detect, Fence, Format, Options, Shape, SpatialQuery};
pub use response::Response;
pub use wire::WireValue;
