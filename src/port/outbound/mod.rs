//! Outbound ports (driven side): interfaces implemented by outbound adapters.
//!
//! These contracts describe the broker, the event store and the dependency
//! probes consulted by readiness checks.

pub mod broker;
pub mod health;
pub mod persistence;
