//! Shared state handed to every handler.

use std::sync::Arc;

use crate::application::health::{HealthService, ReadinessState};
use crate::application::ingest::IngestionOrchestrator;
use crate::application::metrics::GatewayMetrics;
use crate::application::queue::DurableQueue;

#[derive(Clone)]
pub struct HttpState {
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub queue: Arc<DurableQueue>,
    pub health: Arc<HealthService>,
    pub readiness: Arc<ReadinessState>,
    pub metrics: Arc<GatewayMetrics>,
    pub service_name: Arc<str>,
}
