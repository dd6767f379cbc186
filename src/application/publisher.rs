//! Broker publisher with retry and bounded batch delivery.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rand::Rng;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::application::context;
use crate::domain::{CorrelationId, Event};
use crate::error::DeliveryError;
use crate::port::outbound::broker::{BrokerMessage, BrokerTransport, PublishAck, TransportError};

/// Header carrying the correlation id on every broker message.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Retry schedule for transient broker unavailability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay before retry number `retry` (0-based).
    #[must_use]
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Add up to `base` of random jitter.
fn with_jitter(base: Duration) -> Duration {
    let cap = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    if cap == 0 {
        return base;
    }
    base + Duration::from_millis(rand::thread_rng().gen_range(0..=cap))
}

/// Broker subject for an event under `topic`.
#[must_use]
pub fn subject_for(topic: &str, event: &Event) -> String {
    format!("{topic}.events.{}", event.event_type())
}

pub struct BrokerPublisher {
    transport: Arc<dyn BrokerTransport>,
    policy: RetryPolicy,
    ready: watch::Sender<bool>,
}

impl BrokerPublisher {
    pub fn new(transport: Arc<dyn BrokerTransport>, policy: RetryPolicy) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            transport,
            policy,
            ready,
        }
    }

    /// Resolve the one-time readiness signal. Idempotent.
    pub fn mark_ready(&self) {
        if !self.ready.send_replace(true) {
            info!(transport = self.transport.name(), "Broker publisher ready");
        }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Wait for [`mark_ready`](Self::mark_ready).
    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so this only returns once ready.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Publish one event to `<topic>.events.<eventType>`.
    ///
    /// Uses `correlation_id` when given, else the ambient correlation context.
    /// Waits for [`mark_ready`](Self::mark_ready) before the first attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError`] for a non-retryable failure, or a retryable
    /// one that persisted through every retry.
    pub async fn publish(
        &self,
        topic: &str,
        event: &Event,
        correlation_id: Option<&CorrelationId>,
    ) -> Result<PublishAck, DeliveryError> {
        self.wait_ready().await;

        let subject = subject_for(topic, event);
        let payload = serde_json::to_vec(event).map_err(|e| DeliveryError {
            subject: subject.clone(),
            attempts: 0,
            source: TransportError::Protocol(e.to_string()),
        })?;
        let mut headers = Vec::new();
        if let Some(id) = correlation_id.cloned().or_else(context::current_id) {
            headers.push((CORRELATION_HEADER.to_string(), id.to_string()));
        }
        let message = BrokerMessage {
            subject,
            headers,
            payload,
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.transport.publish(&message).await {
                Ok(ack) => {
                    debug!(
                        subject = %message.subject,
                        event_id = event.event_id(),
                        sequence = ack.sequence,
                        attempt,
                        "Event published"
                    );
                    return Ok(ack);
                }
                Err(err) if err.is_retryable() && attempt <= self.policy.max_retries => {
                    let delay = with_jitter(self.policy.base_delay(attempt - 1));
                    warn!(
                        subject = %message.subject,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Broker unavailable, retrying publish"
                    );
                    sleep(delay).await;
                }
                Err(err) => {
                    error!(
                        subject = %message.subject,
                        event_id = event.event_id(),
                        attempts = attempt,
                        error = %err,
                        "Publish failed"
                    );
                    return Err(DeliveryError {
                        subject: message.subject,
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }

    /// Publish every event concurrently; results are in input order.
    pub async fn batch_publish(
        &self,
        topic: &str,
        events: &[Event],
        correlation_id: Option<&CorrelationId>,
    ) -> Vec<Result<PublishAck, DeliveryError>> {
        join_all(
            events
                .iter()
                .map(|event| self.publish(topic, event, correlation_id)),
        )
        .await
    }

    /// Release the broker connection.
    ///
    /// # Errors
    ///
    /// Returns the transport's close error.
    pub async fn close(&self) -> Result<(), TransportError> {
        let result = self.transport.close().await;
        // Wake anything still waiting for readiness so it fails fast on the closed transport.
        self.ready.send_replace(true);
        match &result {
            Ok(()) => info!(transport = self.transport.name(), "Broker connection released"),
            Err(err) => warn!(error = %err, "Broker close failed"),
        }
        result
    }
}
