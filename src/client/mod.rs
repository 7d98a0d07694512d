//! Client connection to a Tile38 server.
//!
//! # Components
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Connection`] | Command dispatch with a lazily connected transport |
//! | [`ConnectionBuilder`] | Fluent configuration builder |
//! | [`ConnectionOptions`] | Host, port, TLS and transport selection |
//! | [`Subscription`] | Pub/sub channel messages |
//!
//! # Example
//!
//! ```no_run
//! use talon::{Connection, Result};
//! use talon::protocol::command::Get;
//! use talon::protocol::response::GetObjectResponse;
//!
//! # async fn example() -> Result<()> {
//! let connection = Connection::builder().host("127.0.0.1").build()?;
//! let truck: GetObjectResponse = connection.perform(&Get::new("fleet", "truck1")).await?;
//! println!("{:?}", truck.object);
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Submodules
// ============================================================================

/// Fluent builder for connection configuration.
pub mod builder;

/// Core connection implementation.
pub mod connection;

/// Connection settings.
pub mod options;

/// Channel subscriptions.
pub mod subscription;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConnectionBuilder;
pub use connection::Connection;
pub use options::{ConnectionOptions, TransportKind};
pub use subscription::Subscription;
