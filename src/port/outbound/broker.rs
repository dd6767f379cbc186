//! Broker port for at-least-once event delivery.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

/// Errors reported by a broker transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Broker could not be reached or the connection dropped.
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    /// Broker answered the publish with an error.
    #[error("broker rejected message: {0}")]
    Rejected(String),

    /// Request could not be encoded or the reply was not understood.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport was closed by this process.
    #[error("transport is closed")]
    Closed,
}

impl TransportError {
    /// Whether retrying the same operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    /// Short label used for failure metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Rejected(_) => "rejected",
            Self::Protocol(_) => "protocol",
            Self::Closed => "closed",
        }
    }
}

/// One message bound for a broker subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub subject: String,
    pub headers: Vec<(String, String)>,
    pub payload: Vec<u8>,
}

impl BrokerMessage {
    /// Look up a header value by name (case-insensitive).
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Broker acknowledgement of a publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishAck {
    /// Sequence the broker assigned to the stored message.
    pub sequence: u64,
}

/// One message received from a durable subscription.
///
/// Exactly one of [`ack`](Delivery::ack), [`term`](Delivery::term) or
/// [`nak`](Delivery::nak) settles it.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn subject(&self) -> &str;

    /// Header value by name.
    fn header(&self, name: &str) -> Option<String>;

    fn payload(&self) -> &[u8];

    /// Processed; do not redeliver.
    async fn ack(&self) -> Result<(), TransportError>;

    /// Unprocessable; never redeliver.
    async fn term(&self) -> Result<(), TransportError>;

    /// Failed for now; redeliver later.
    async fn nak(&self) -> Result<(), TransportError>;
}

/// Deliveries of one subscription, in broker order.
pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>, TransportError>>;

/// Connection to a message broker.
///
/// Implementations must be safe to share across tasks; the gateway holds a
/// single `Arc<dyn BrokerTransport>` after startup.
#[async_trait]
pub trait BrokerTransport: Send + Sync {
    /// Establish the connection. Calling this on a connected transport is a no-op.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Publish one message and wait for the broker to acknowledge it.
    async fn publish(&self, message: &BrokerMessage) -> Result<PublishAck, TransportError>;

    /// Round-trip a ping; returns the observed latency.
    async fn ping(&self) -> Result<Duration, TransportError>;

    /// Release the connection. Further publishes fail with [`TransportError::Closed`].
    async fn close(&self) -> Result<(), TransportError>;

    /// Bind the durable consumer `durable` to `subject` and stream its
    /// deliveries.
    async fn subscribe(&self, subject: &str, durable: &str) -> Result<DeliveryStream, TransportError> {
        let _ = (subject, durable);
        Err(TransportError::Rejected(format!(
            "{} transport does not support subscriptions",
            self.name()
        )))
    }

    /// Transport name for logging.
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_is_retryable() {
        assert!(TransportError::Unavailable("refused".into()).is_retryable());
        assert!(!TransportError::Rejected("permissions".into()).is_retryable());
        assert!(!TransportError::Protocol("garbage".into()).is_retryable());
        assert!(!TransportError::Closed.is_retryable());
    }

    #[test]
    fn header_lookup_ignores_case() {
        let message = BrokerMessage {
            subject: "gateway.events.like".into(),
            headers: vec![("x-correlation-id".into(), "c-1".into())],
            payload: Vec::new(),
        };

        assert_eq!(message.header("X-Correlation-Id"), Some("c-1"));
        assert_eq!(message.header("missing"), None);
    }
}
