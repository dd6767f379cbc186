//! Durable-subscription consumer.
//!
//! Every delivery is processed inside a correlation scope taken from its
//! `x-correlation-id` header (or generated), so handler logs and any broker
//! publishes it makes carry the producer's id.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::application::context;
use crate::application::publisher::CORRELATION_HEADER;
use crate::domain::CorrelationId;
use crate::port::outbound::broker::{Delivery, DeliveryStream, TransportError};

/// Work done for one decoded event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// An `Err` asks the broker to redeliver later.
    async fn handle(&self, event: &Value) -> Result<(), String>;
}

/// Logs and accepts every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Value) -> Result<(), String> {
        debug!(event_id = ?event.get("eventId"), "Event handled");
        Ok(())
    }
}

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Acked,
    /// Payload was not JSON; never redelivered.
    Terminated,
    /// Handler failed; redelivered by the broker.
    Requeued,
}

pub struct EventConsumer {
    handler: Arc<dyn EventHandler>,
}

impl EventConsumer {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self { handler }
    }

    /// Decode, handle and settle one delivery.
    pub async fn process(&self, delivery: &dyn Delivery) -> Settled {
        let id = CorrelationId::from_header(delivery.header(CORRELATION_HEADER).as_deref());
        let span = info_span!("consume", subject = %delivery.subject(), correlation_id = %id);

        context::run_with_id(id, self.settle(delivery).instrument(span)).await
    }

    async fn settle(&self, delivery: &dyn Delivery) -> Settled {
        let event: Value = match serde_json::from_slice(delivery.payload()) {
            Ok(event) => event,
            Err(err) => {
                error!(error = %err, "Invalid event format");
                report(delivery.term().await, "term");
                return Settled::Terminated;
            }
        };

        info!(
            event_type = event.get("eventType").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            source = event.get("source").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
            "Event received"
        );

        match self.handler.handle(&event).await {
            Ok(()) => {
                report(delivery.ack().await, "ack");
                Settled::Acked
            }
            Err(reason) => {
                warn!(reason = %reason, "Event handler failed, requesting redelivery");
                report(delivery.nak().await, "nak");
                Settled::Requeued
            }
        }
    }

    /// Process `deliveries` until the stream ends or `stop` turns true.
    pub async fn run(self: Arc<Self>, mut deliveries: DeliveryStream, mut stop: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                biased;
                _ = async { stop.wait_for(|stopped| *stopped).await.map(|_| ()) } => {
                    debug!("Consumer stopping");
                    break;
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        self.process(delivery.as_ref()).await;
                    }
                    Some(Err(err)) => warn!(error = %err, "Delivery failed"),
                    None => {
                        info!("Subscription ended");
                        break;
                    }
                },
            }
        }
    }
}

fn report(result: Result<(), TransportError>, action: &'static str) {
    if let Err(err) = result {
        warn!(error = %err, action, "Failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::outbound::broker::{MemoryTransport, Settlement};
    use crate::port::outbound::broker::{BrokerMessage, BrokerTransport};
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<(Option<CorrelationId>, Value)>>,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler for Recording {
        async fn handle(&self, event: &Value) -> Result<(), String> {
            self.seen.lock().push((context::current_id(), event.clone()));
            if self.fail {
                Err("downstream busy".into())
            } else {
                Ok(())
            }
        }
    }

    fn message(payload: &[u8], correlation: Option<&str>) -> BrokerMessage {
        BrokerMessage {
            subject: "facebook.events.ad.click".into(),
            headers: correlation
                .map(|id| vec![(CORRELATION_HEADER.to_string(), id.to_string())])
                .unwrap_or_default(),
            payload: payload.to_vec(),
        }
    }

    async fn deliver(handler: Arc<Recording>, message: BrokerMessage) -> (Settled, MemoryTransport) {
        let transport = MemoryTransport::new();
        let mut deliveries = transport.subscribe("facebook.events.>", "audit").await.unwrap();
        transport.publish(&message).await.unwrap();
        let delivery = deliveries.next().await.unwrap().unwrap();

        let settled = EventConsumer::new(handler).process(delivery.as_ref()).await;
        (settled, transport)
    }

    #[tokio::test]
    async fn handler_runs_under_header_correlation_id() {
        let handler = Arc::new(Recording::default());
        let payload = br#"{"eventType":"ad.click","source":"facebook"}"#;

        let (settled, transport) = deliver(Arc::clone(&handler), message(payload, Some("corr-123"))).await;

        assert_eq!(settled, Settled::Acked);
        let seen = handler.seen.lock();
        assert_eq!(seen[0].0, Some(CorrelationId::from("corr-123")));
        assert_eq!(seen[0].1["eventType"], "ad.click");
        assert_eq!(transport.settlements()[0].1, Settlement::Ack);
    }

    #[tokio::test]
    async fn missing_header_gets_generated_id() {
        let handler = Arc::new(Recording::default());

        let (settled, _) = deliver(Arc::clone(&handler), message(b"{}", None)).await;

        assert_eq!(settled, Settled::Acked);
        let seen = handler.seen.lock();
        let id = seen[0].0.clone().unwrap();
        assert!(!id.as_str().is_empty());
    }

    #[tokio::test]
    async fn undecodable_payload_is_terminated() {
        let handler = Arc::new(Recording::default());

        let (settled, transport) = deliver(Arc::clone(&handler), message(b"not-json", Some("corr-err"))).await;

        assert_eq!(settled, Settled::Terminated);
        assert!(handler.seen.lock().is_empty());
        assert_eq!(transport.settlements()[0].1, Settlement::Term);
    }

    #[tokio::test]
    async fn handler_failure_requests_redelivery() {
        let handler = Arc::new(Recording {
            fail: true,
            ..Recording::default()
        });

        let (settled, transport) = deliver(handler, message(b"{}", None)).await;

        assert_eq!(settled, Settled::Requeued);
        assert_eq!(transport.settlements()[0].1, Settlement::Nak);
    }

    #[tokio::test]
    async fn run_processes_until_stopped() {
        let transport = MemoryTransport::new();
        let deliveries = transport.subscribe("facebook.events.>", "audit").await.unwrap();
        let handler = Arc::new(Recording::default());
        let consumer = Arc::new(EventConsumer::new(Arc::clone(&handler) as Arc<dyn EventHandler>));
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&consumer).run(deliveries, stop_rx));

        transport.publish(&message(b"{}", Some("a"))).await.unwrap();
        transport.publish(&message(b"{}", Some("b"))).await.unwrap();
        while transport.settlements().len() < 2 {
            tokio::task::yield_now().await;
        }
        stop_tx.send_replace(true);
        task.await.unwrap();

        let ids: Vec<_> = handler
            .seen
            .lock()
            .iter()
            .map(|(id, _)| id.clone().map(|id| id.to_string()))
            .collect();
        assert_eq!(ids, vec![Some("a".to_string()), Some("b".to_string())]);
    }
}
