//! Broker transports.
//!
//! [`NatsTransport`] publishes to and consumes from NATS JetStream;
//! [`MemoryTransport`] keeps messages in process for `memory://` URLs.

pub mod memory;
pub mod nats;
pub mod probe;

pub use memory::{MemoryTransport, Settlement};
pub use nats::NatsTransport;
pub use probe::BrokerProbe;
