//! Readiness probe over the broker transport.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::port::outbound::broker::BrokerTransport;
use crate::port::outbound::health::DependencyProbe;

/// Reports as `nats` regardless of the transport behind it, so readiness
/// configuration does not change with `memory://`.
pub struct BrokerProbe {
    transport: Arc<dyn BrokerTransport>,
}

impl BrokerProbe {
    pub const NAME: &'static str = "nats";

    #[must_use]
    pub fn new(transport: Arc<dyn BrokerTransport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl DependencyProbe for BrokerProbe {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn check(&self) -> Result<(), String> {
        let rtt = self.transport.ping().await.map_err(|e| e.to_string())?;
        trace!(transport = self.transport.name(), rtt_us = rtt.as_micros() as u64, "Broker ping");
        Ok(())
    }
}
