//! Trait definitions (hexagonal ports). Depend only on domain.
//!
//! # Available Ports
//!
//! - [`BrokerTransport`](outbound::broker::BrokerTransport) - Message broker delivery
//! - [`EventRepository`](outbound::persistence::EventRepository) - Idempotent event storage
//! - [`DependencyProbe`](outbound::health::DependencyProbe) - Readiness checks

pub mod outbound;
