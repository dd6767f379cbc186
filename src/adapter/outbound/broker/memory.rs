//! In-process broker used for `memory://` deployments and local runs.
//!
//! Subscriptions only see messages published after they were opened; there
//! is no stored stream to replay.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::port::outbound::broker::{
    BrokerMessage, BrokerTransport, Delivery, DeliveryStream, PublishAck, TransportError,
};

const SUBSCRIPTION_CAPACITY: usize = 1024;

/// How a delivery was settled by its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Ack,
    Term,
    Nak,
}

/// NATS subject matching: `*` matches one token, a trailing `>` the rest.
#[must_use]
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut tokens = subject.split('.');
    for expected in pattern.split('.') {
        match (expected, tokens.next()) {
            (">", Some(_)) => return true,
            ("*", Some(_)) => {}
            (expected, Some(token)) if expected == token => {}
            _ => return false,
        }
    }
    tokens.next().is_none()
}

/// Records every published message in order and fans them out to
/// subscribers.
#[derive(Debug)]
pub struct MemoryTransport {
    messages: Mutex<Vec<BrokerMessage>>,
    settlements: Arc<Mutex<Vec<(String, Settlement)>>>,
    fanout: Mutex<Option<broadcast::Sender<BrokerMessage>>>,
    connected: AtomicBool,
    closed: AtomicBool,
    sequence: AtomicU64,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIPTION_CAPACITY);
        Self {
            messages: Mutex::default(),
            settlements: Arc::default(),
            fanout: Mutex::new(Some(sender)),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            sequence: AtomicU64::new(0),
        }
    }
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far.
    #[must_use]
    pub fn messages(&self) -> Vec<BrokerMessage> {
        self.messages.lock().clone()
    }

    /// Messages published to exactly `subject`.
    #[must_use]
    pub fn messages_for(&self, subject: &str) -> Vec<BrokerMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Settled deliveries as `(subject, settlement)`, in settlement order.
    #[must_use]
    pub fn settlements(&self) -> Vec<(String, Settlement)> {
        self.settlements.lock().clone()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BrokerTransport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    async fn publish(&self, message: &BrokerMessage) -> Result<PublishAck, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.messages.lock().push(message.clone());
        let sequence = self.sequence.fetch_add(1, Ordering::AcqRel) + 1;
        if let Some(sender) = self.fanout.lock().as_ref() {
            // No receivers is fine.
            let _ = sender.send(message.clone());
        }
        debug!(subject = %message.subject, sequence, "Published to memory broker");
        Ok(PublishAck { sequence })
    }

    async fn ping(&self) -> Result<Duration, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(Duration::ZERO)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        self.connected.store(false, Ordering::Release);
        // Dropping the sender ends every open subscription.
        self.fanout.lock().take();
        Ok(())
    }

    async fn subscribe(&self, subject: &str, durable: &str) -> Result<DeliveryStream, TransportError> {
        let receiver = self
            .fanout
            .lock()
            .as_ref()
            .map(broadcast::Sender::subscribe)
            .ok_or(TransportError::Closed)?;
        debug!(subject, durable, "Subscribed to memory broker");

        let pattern = subject.to_string();
        let settlements = Arc::clone(&self.settlements);
        let deliveries = stream::unfold(receiver, move |mut receiver| {
            let pattern = pattern.clone();
            let settlements = Arc::clone(&settlements);
            async move {
                loop {
                    match receiver.recv().await {
                        Ok(message) if subject_matches(&pattern, &message.subject) => {
                            let delivery: Box<dyn Delivery> = Box::new(MemoryDelivery {
                                message,
                                settlements,
                            });
                            return Some((Ok(delivery), receiver));
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, subject = %pattern, "Memory subscription lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });
        Ok(deliveries.boxed())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryDelivery {
    message: BrokerMessage,
    settlements: Arc<Mutex<Vec<(String, Settlement)>>>,
}

impl MemoryDelivery {
    fn settle(&self, settlement: Settlement) {
        self.settlements
            .lock()
            .push((self.message.subject.clone(), settlement));
    }
}

#[async_trait]
impl Delivery for MemoryDelivery {
    fn subject(&self) -> &str {
        &self.message.subject
    }

    fn header(&self, name: &str) -> Option<String> {
        self.message.header(name).map(str::to_string)
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> Result<(), TransportError> {
        self.settle(Settlement::Ack);
        Ok(())
    }

    async fn term(&self) -> Result<(), TransportError> {
        self.settle(Settlement::Term);
        Ok(())
    }

    async fn nak(&self) -> Result<(), TransportError> {
        self.settle(Settlement::Nak);
        Ok(())
    }
}
