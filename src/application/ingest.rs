//! Ingestion orchestration: validate, persist, publish.
//!
//! Each call runs inside its own correlation scope and tracing span, so every
//! log line and broker message produced on its behalf carries the same
//! correlation id.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument};

use crate::application::context;
use crate::application::dead_letter::DeadLetterSink;
use crate::application::health::{InFlightTracker, ReadinessState};
use crate::application::metrics::GatewayMetrics;
use crate::application::publisher::BrokerPublisher;
use crate::application::queue::DurableQueue;
use crate::domain::{validate, CorrelationId, Event, FieldViolation, Source};
use crate::error::IngestError;
use crate::port::outbound::persistence::{EventRepository, PersistOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPolicy {
    pub chunk_size: usize,
    pub concurrency: usize,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            concurrency: 5,
        }
    }
}

/// Successful single-event ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub correlation_id: CorrelationId,
    /// The event was stored earlier; it was not published again.
    pub already_processed: bool,
}

/// Outcome of one element of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub already_processed: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub dead_lettered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldViolation>>,
}

impl BatchItemResult {
    fn ok(index: usize, event: &Event, already_processed: bool) -> Self {
        Self {
            index,
            event_id: Some(event.event_id().to_string()),
            success: true,
            already_processed,
            dead_lettered: false,
            error: None,
            details: None,
        }
    }

    fn failed(index: usize, event: &Event, error: String) -> Self {
        Self {
            index,
            event_id: Some(event.event_id().to_string()),
            success: false,
            already_processed: false,
            dead_lettered: false,
            error: Some(error),
            details: None,
        }
    }

    fn invalid(index: usize, payload: &Value, violations: Vec<FieldViolation>) -> Self {
        Self {
            index,
            event_id: payload
                .get("eventId")
                .and_then(Value::as_str)
                .map(str::to_string),
            success: false,
            already_processed: false,
            dead_lettered: false,
            error: Some("Validation error".to_string()),
            details: Some(violations),
        }
    }

    /// Whether the element passed schema validation.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.details.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub correlation_id: CorrelationId,
    /// One entry per input element, in input order.
    pub results: Vec<BatchItemResult>,
}

impl BatchOutcome {
    #[must_use]
    pub fn any_valid(&self) -> bool {
        self.results.iter().any(BatchItemResult::is_valid)
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

pub struct IngestionOrchestrator {
    repository: Arc<dyn EventRepository>,
    publisher: Arc<BrokerPublisher>,
    readiness: Arc<ReadinessState>,
    in_flight: Arc<InFlightTracker>,
    metrics: Arc<GatewayMetrics>,
    queue: Option<Arc<DurableQueue>>,
    dead_letters: Option<Arc<DeadLetterSink>>,
    batch: BatchPolicy,
}

impl IngestionOrchestrator {
    pub fn new(
        repository: Arc<dyn EventRepository>,
        publisher: Arc<BrokerPublisher>,
        readiness: Arc<ReadinessState>,
        in_flight: Arc<InFlightTracker>,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            repository,
            publisher,
            readiness,
            in_flight,
            metrics,
            queue: None,
            dead_letters: None,
            batch: BatchPolicy::default(),
        }
    }

    /// Enqueue events whose publish failed so the dispatcher redelivers them.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<DurableQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    #[must_use]
    pub fn with_dead_letters(mut self, sink: Arc<DeadLetterSink>) -> Self {
        self.dead_letters = Some(sink);
        self
    }

    #[must_use]
    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch = policy;
        self
    }

    fn resolve_id(correlation_id: Option<CorrelationId>) -> CorrelationId {
        correlation_id
            .or_else(context::current_id)
            .unwrap_or_else(CorrelationId::generate)
    }

    /// Validate, persist idempotently and publish one event.
    ///
    /// # Errors
    ///
    /// - [`IngestError::ShuttingDown`] once the readiness latch is set
    /// - [`IngestError::Validation`] for a non-conforming payload
    /// - [`IngestError::Persistence`] / [`IngestError::Publish`] for
    ///   infrastructure failures
    pub async fn process_event(
        &self,
        payload: &Value,
        correlation_id: Option<CorrelationId>,
    ) -> Result<IngestOutcome, IngestError> {
        let id = Self::resolve_id(correlation_id);
        let span = info_span!("ingest", correlation_id = %id);
        context::run_with_id(id.clone(), self.process_in_scope(payload, id).instrument(span)).await
    }

    async fn process_in_scope(
        &self,
        payload: &Value,
        id: CorrelationId,
    ) -> Result<IngestOutcome, IngestError> {
        let _guard = self.in_flight.enter();
        if self.readiness.is_shutting_down() {
            return Err(IngestError::ShuttingDown);
        }

        let started = Instant::now();
        let result = self.ingest_one(payload, id).await;
        self.metrics.observe_processing_time(started.elapsed());
        result
    }

    async fn ingest_one(
        &self,
        payload: &Value,
        id: CorrelationId,
    ) -> Result<IngestOutcome, IngestError> {
        let event = match validate(payload) {
            Ok(event) => event,
            Err(failure) => {
                self.metrics.increment_failed("validation_failed");
                warn!(violations = failure.violations().len(), error = %failure, "Validation failed");
                return Err(IngestError::Validation(failure));
            }
        };
        info!(
            event_id = event.event_id(),
            source = %event.source(),
            event_type = event.event_type(),
            "Event received"
        );

        match self.repository.save_event(&event).await {
            Ok(PersistOutcome::Duplicate) => {
                info!(event_id = event.event_id(), "Event already processed");
                return Ok(IngestOutcome {
                    correlation_id: id,
                    already_processed: true,
                });
            }
            Ok(PersistOutcome::Recorded) => {}
            Err(err) => {
                self.metrics.increment_failed("persistence_failed");
                error!(event_id = event.event_id(), error = %err, "Persistence failed");
                return Err(err.into());
            }
        }

        if let Err(err) = self
            .publisher
            .publish(event.source().as_str(), &event, Some(&id))
            .await
        {
            self.metrics.increment_failed("publish_failed");
            error!(event_id = event.event_id(), error = %err, "Publish failed");
            if let Some(queue) = &self.queue {
                match queue.enqueue_event(event).await {
                    Ok(()) => warn!("Event queued for redelivery"),
                    Err(queue_err) => {
                        error!(error = %queue_err, "Failed to queue event for redelivery");
                    }
                }
            }
            return Err(err.into());
        }

        self.metrics.increment_accepted(&event);
        Ok(IngestOutcome {
            correlation_id: id,
            already_processed: false,
        })
    }

    /// Ingest many payloads in bounded-concurrency chunks.
    ///
    /// Invalid elements are reported individually and never reach persistence.
    /// A chunk with any persistence or publish failure is written to the
    /// dead-letter file as a whole.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::ShuttingDown`] once the readiness latch is set.
    pub async fn process_batch(
        &self,
        payloads: &[Value],
        correlation_id: Option<CorrelationId>,
    ) -> Result<BatchOutcome, IngestError> {
        let id = Self::resolve_id(correlation_id);
        let span = info_span!("ingest_batch", correlation_id = %id, size = payloads.len());
        context::run_with_id(id.clone(), self.batch_in_scope(payloads, id).instrument(span)).await
    }

    async fn batch_in_scope(
        &self,
        payloads: &[Value],
        id: CorrelationId,
    ) -> Result<BatchOutcome, IngestError> {
        let _guard = self.in_flight.enter();
        if self.readiness.is_shutting_down() {
            return Err(IngestError::ShuttingDown);
        }

        let mut slots: Vec<Option<BatchItemResult>> = vec![None; payloads.len()];
        let mut valid = Vec::new();
        for (index, payload) in payloads.iter().enumerate() {
            match validate(payload) {
                Ok(event) => valid.push((index, event)),
                Err(failure) => {
                    self.metrics.increment_failed("validation_failed");
                    slots[index] = Some(BatchItemResult::invalid(
                        index,
                        payload,
                        failure.into_violations(),
                    ));
                }
            }
        }

        let chunk_size = self.batch.chunk_size.max(1);
        let semaphore = Semaphore::new(self.batch.concurrency.max(1));
        let chunk_results = join_all(valid.chunks(chunk_size).enumerate().map(|(number, chunk)| {
            let semaphore = &semaphore;
            let id = &id;
            async move {
                let _permit = semaphore.acquire().await.ok();
                self.process_chunk(number, chunk, id).await
            }
        }))
        .await;

        for result in chunk_results.into_iter().flatten() {
            let index = result.index;
            slots[index] = Some(result);
        }

        let results: Vec<BatchItemResult> = slots.into_iter().flatten().collect();
        info!(
            total = payloads.len(),
            succeeded = results.iter().filter(|r| r.success).count(),
            "Batch processed"
        );
        Ok(BatchOutcome {
            correlation_id: id,
            results,
        })
    }

    async fn process_chunk(
        &self,
        number: usize,
        chunk: &[(usize, Event)],
        id: &CorrelationId,
    ) -> Vec<BatchItemResult> {
        self.metrics.batch_started();
        let started = Instant::now();

        let mut results = Vec::with_capacity(chunk.len());
        let mut fresh: BTreeMap<Source, Vec<(usize, Event)>> = BTreeMap::new();
        let mut chunk_failed = false;

        for (index, event) in chunk {
            match self.repository.save_event(event).await {
                Ok(PersistOutcome::Duplicate) => {
                    results.push(BatchItemResult::ok(*index, event, true));
                }
                Ok(PersistOutcome::Recorded) => {
                    fresh
                        .entry(event.source())
                        .or_default()
                        .push((*index, event.clone()));
                }
                Err(err) => {
                    chunk_failed = true;
                    self.metrics.increment_failed("persistence_failed");
                    error!(chunk = number, event_id = event.event_id(), error = %err, "Persistence failed");
                    results.push(BatchItemResult::failed(*index, event, err.to_string()));
                }
            }
        }

        let groups: Vec<(Source, Vec<(usize, Event)>)> = fresh.into_iter().collect();
        let published = join_all(groups.iter().map(|(source, entries)| async move {
            let events: Vec<Event> = entries.iter().map(|(_, event)| event.clone()).collect();
            self.publisher
                .batch_publish(source.as_str(), &events, Some(id))
                .await
        }))
        .await;

        for ((_, entries), outcomes) in groups.iter().zip(published) {
            for ((index, event), outcome) in entries.iter().zip(outcomes) {
                match outcome {
                    Ok(_) => {
                        self.metrics.increment_accepted(event);
                        results.push(BatchItemResult::ok(*index, event, false));
                    }
                    Err(err) => {
                        chunk_failed = true;
                        self.metrics.increment_failed("publish_failed");
                        results.push(BatchItemResult::failed(*index, event, err.to_string()));
                    }
                }
            }
        }

        if chunk_failed {
            self.dead_letter_chunk(number, chunk, &mut results).await;
        }

        self.metrics.observe_batch_chunk(started.elapsed());
        self.metrics.batch_finished();
        results
    }

    async fn dead_letter_chunk(
        &self,
        number: usize,
        chunk: &[(usize, Event)],
        results: &mut [BatchItemResult],
    ) {
        let Some(sink) = &self.dead_letters else {
            warn!(chunk = number, "Chunk failed and no dead letter sink is configured");
            return;
        };

        let events: Vec<Event> = chunk.iter().map(|(_, event)| event.clone()).collect();
        match sink.save_chunk(&events).await {
            Ok(()) => {
                for result in results.iter_mut() {
                    result.dead_lettered = true;
                }
            }
            Err(err) => {
                error!(chunk = number, error = %err, "Failed to dead-letter chunk");
            }
        }
    }
}
