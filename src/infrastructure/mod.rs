//! Infrastructure layer.
//!
//! Provides technical concerns that support the application without containing
//! business logic. This layer handles configuration, component wiring, and
//! the process runtime.
//!
//! # Submodules
//!
//! - [`bootstrap`] - Composition root for runtime wiring
//! - [`config`] - Configuration loading and validation
//! - [`runtime`] - Background loops, HTTP server and signal handling

pub mod bootstrap;
pub mod config;
pub mod runtime;
