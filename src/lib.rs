//! Eventgate - webhook event-ingestion gateway.
//!
//! Accepts marketing-funnel events from ad platforms over HTTP, validates
//! them against a provider-specific schema, persists them to SQLite and
//! republishes them to NATS JetStream. A file-backed queue and dispatcher
//! provide at-least-once delivery for the asynchronous intake path.
//!
//! # Architecture
//!
//! The crate follows a ports-and-adapters layout:
//!
//! - **`domain`** - Event model, identifiers and schema validation
//! - **`port`** - Traits the application needs from the outside world
//!   - `BrokerTransport` - publish, subscribe and connection lifecycle against a broker
//!   - `EventRepository` - transactional event and user persistence
//!   - `DependencyProbe` - readiness checks
//! - **`application`** - Ingestion, queueing, dispatch, consumption, health and shutdown
//! - **`adapter`** - HTTP and CLI intake; NATS, memory and SQLite outbound
//! - **`infrastructure`** - Configuration, composition root and runtime loops
//!
//! # Modules
//!
//! - [`domain`] - Provider-agnostic event types
//! - [`port`] - Outbound trait definitions
//! - [`application`] - Use cases built on the ports
//! - [`adapter`] - Concrete inbound and outbound adapters
//! - [`infrastructure`] - Config, bootstrap and runtime
//! - [`error`] - Error types for the crate
//!
//! # Features
//!
//! - `testkit` - Scripted doubles and fixtures for integration tests
//!
//! # Example
//!
//! ```no_run
//! use eventgate::infrastructure::config::Config;
//! use eventgate::infrastructure::runtime;
//!
//! # async fn example() -> eventgate::error::Result<()> {
//! let config = Config::from_sources(None)?;
//! config.init_logging();
//! runtime::run(config).await
//! # }
//! ```

pub mod adapter;
pub mod application;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod port;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
