//! Adapters connecting the application to the outside world.
//!
//! - [`inbound`] - Driving adapters: HTTP intake and the CLI
//! - [`outbound`] - Driven adapters: broker transports and SQLite persistence

pub mod inbound;
pub mod outbound;
