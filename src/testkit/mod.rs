//! Shared test utilities available to both unit and integration tests.
//!
//! Enabled via `#[cfg(test)]` (unit tests) or the `testkit` feature
//! (integration tests).
//!
//! # Modules
//!
//! - [`fixtures`]: Valid provider payloads and ready-made events.
//! - [`transport`]: Scripted [`BrokerTransport`](crate::port::outbound::broker::BrokerTransport).
//! - [`repository`]: Scripted and in-memory [`EventRepository`](crate::port::outbound::persistence::EventRepository).
//! - [`probe`]: Fixed-result [`DependencyProbe`](crate::port::outbound::health::DependencyProbe).

pub mod fixtures;
pub mod probe;
pub mod repository;
pub mod transport;

use std::sync::Arc;

use parking_lot::Mutex;

/// Ordered record of teardown calls shared between doubles.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: impl Into<String>) {
        self.0.lock().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}
