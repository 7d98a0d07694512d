//! Live geofence subscriptions over WebSocket.
//!
//! A fence-wrapped spatial query is opened as a WebSocket at
//! `ws://host:port/<query path>`. The server acknowledges with
//! `{"ok":true,"live":true}` and then pushes one JSON message per
//! detection.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`FenceBuilder`] | Target, observer and seed command |
//! | [`LiveFence`] | Open subscription handle |
//! | [`FenceMachine`] | Pure lifecycle state machine |
//! | [`FenceObserver`] | Callback interface |
//! | [`FenceNotification`] | Channel form of the callbacks |

// ============================================================================
// Submodules
// ============================================================================

/// Fence builder.
pub mod builder;

/// Live fence handle and event loop.
pub mod core;

/// Lifecycle state machine.
pub mod machine;

/// Notification sinks.
pub mod observer;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::FenceBuilder;
pub use self::core::LiveFence;
pub use machine::{FenceMachine, FenceState};
pub use observer::{FenceNotification, FenceObserver};
