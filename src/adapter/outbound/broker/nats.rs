//! NATS JetStream transport built on `async-nats`.
//!
//! The client connects lazily on the first call and reconnects on its own
//! after that. Publishes go through JetStream, so an acknowledgement means a
//! stream stored the message and the returned sequence is the stream's.
//!
//! Error mapping: connection failures, publish timeouts and "no responders"
//! (no stream bound to the subject) are retryable
//! [`TransportError::Unavailable`]; anything else the server answers with is
//! [`TransportError::Rejected`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_nats::connection::State;
use async_nats::jetstream::consumer::{pull, AckPolicy};
use async_nats::jetstream::context::{PublishError, PublishErrorKind};
use async_nats::jetstream::stream::{self, DiscardPolicy, RetentionPolicy, StorageType};
use async_nats::jetstream::{self, AckKind};
use async_nats::{ConnectOptions, HeaderMap};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::port::outbound::broker::{
    BrokerMessage, BrokerTransport, Delivery, DeliveryStream, PublishAck, TransportError,
};

const MAX_MESSAGES_PER_SUBJECT: i64 = 1_000_000;
const MAX_MESSAGES: i64 = 10_000_000;
const MAX_BYTES: i64 = 10 * 1024 * 1024 * 1024;
const MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const DUPLICATE_WINDOW: Duration = Duration::from_secs(120);

/// Limits-retention file stream capturing `<name>.events.>`.
#[must_use]
pub fn stream_config(name: &str) -> stream::Config {
    stream::Config {
        name: name.to_string(),
        subjects: vec![format!("{name}.events.>")],
        retention: RetentionPolicy::Limits,
        max_messages_per_subject: MAX_MESSAGES_PER_SUBJECT,
        max_messages: MAX_MESSAGES,
        max_bytes: MAX_BYTES,
        discard: DiscardPolicy::Old,
        max_age: MAX_AGE,
        storage: StorageType::File,
        num_replicas: 1,
        duplicate_window: DUPLICATE_WINDOW,
        allow_direct: true,
        ..Default::default()
    }
}

fn unavailable(err: impl std::fmt::Display) -> TransportError {
    TransportError::Unavailable(err.to_string())
}

fn classify_publish(kind: PublishErrorKind, message: String) -> TransportError {
    match kind {
        PublishErrorKind::StreamNotFound
        | PublishErrorKind::TimedOut
        | PublishErrorKind::BrokenPipe => TransportError::Unavailable(message),
        _ => TransportError::Rejected(message),
    }
}

fn publish_error(err: PublishError) -> TransportError {
    classify_publish(err.kind(), err.to_string())
}

fn headers_for(message: &BrokerMessage) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in &message.headers {
        headers.insert(name.as_str(), value.as_str());
    }
    headers
}

/// Stream a subscription subject belongs to: its first token.
fn stream_of(subject: &str) -> Result<&str, TransportError> {
    subject
        .split('.')
        .next()
        .filter(|token| !token.is_empty() && !matches!(*token, "*" | ">"))
        .ok_or_else(|| TransportError::Protocol(format!("no stream for subject {subject}")))
}

#[derive(Clone)]
struct Session {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

/// NATS JetStream [`BrokerTransport`].
pub struct NatsTransport {
    url: String,
    client_name: String,
    timeout: Duration,
    streams: Vec<String>,
    ensure_streams: bool,
    session: Mutex<Option<Session>>,
    closed: AtomicBool,
}

impl NatsTransport {
    /// Build a transport for `nats://[user:pass@]host[:port]`. Does not connect.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Protocol`] if the URL has no host or an
    /// unsupported scheme.
    pub fn new(url: &str, client_name: &str, timeout: Duration) -> Result<Self, TransportError> {
        let parsed = Url::parse(url).map_err(|e| TransportError::Protocol(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "nats" | "tcp") {
            return Err(TransportError::Protocol(format!(
                "unsupported scheme {}",
                parsed.scheme()
            )));
        }
        if parsed.host_str().is_none() {
            return Err(TransportError::Protocol(format!("{url}: missing host")));
        }

        Ok(Self {
            url: url.to_string(),
            client_name: client_name.to_string(),
            timeout,
            streams: Vec::new(),
            ensure_streams: false,
            session: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Streams to create on connect when missing. The first one is also
    /// what [`ping`](BrokerTransport::ping) looks up.
    #[must_use]
    pub fn with_streams(mut self, streams: Vec<String>, ensure: bool) -> Self {
        self.streams = streams;
        self.ensure_streams = ensure;
        self
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn open(&self) -> Result<Session, TransportError> {
        let client = ConnectOptions::new()
            .name(&self.client_name)
            .connection_timeout(self.timeout)
            .request_timeout(Some(self.timeout))
            .connect(self.url.as_str())
            .await
            .map_err(unavailable)?;
        let mut jetstream = jetstream::new(client.clone());
        jetstream.set_timeout(self.timeout);

        if self.ensure_streams {
            for name in &self.streams {
                let stream = jetstream
                    .get_or_create_stream(stream_config(name))
                    .await
                    .map_err(unavailable)?;
                debug!(stream = %stream.cached_info().config.name, "JetStream stream ready");
            }
        }

        info!(url = %self.url, streams = self.streams.len(), "Connected to NATS JetStream");
        Ok(Session { client, jetstream })
    }

    async fn session(&self) -> Result<Session, TransportError> {
        self.ensure_open()?;
        let mut guard = self.session.lock().await;
        // Re-check under the lock: close() may have won the race.
        self.ensure_open()?;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = self.open().await?;
        *guard = Some(session.clone());
        Ok(session)
    }
}

#[async_trait]
impl BrokerTransport for NatsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.session().await.map(drop)
    }

    async fn publish(&self, message: &BrokerMessage) -> Result<PublishAck, TransportError> {
        let session = self.session().await?;
        let ack = session
            .jetstream
            .publish_with_headers(
                message.subject.clone(),
                headers_for(message),
                message.payload.clone().into(),
            )
            .await
            .map_err(publish_error)?
            .await
            .map_err(publish_error)?;

        trace!(
            subject = %message.subject,
            stream = %ack.stream,
            sequence = ack.sequence,
            duplicate = ack.duplicate,
            "Published"
        );
        Ok(PublishAck {
            sequence: ack.sequence,
        })
    }

    async fn ping(&self) -> Result<Duration, TransportError> {
        let session = self.session().await?;
        if !matches!(session.client.connection_state(), State::Connected) {
            return Err(TransportError::Unavailable("not connected".into()));
        }

        let started = Instant::now();
        match self.streams.first() {
            Some(name) => {
                session.jetstream.get_stream(name).await.map_err(unavailable)?;
            }
            None => session.client.flush().await.map_err(unavailable)?,
        }
        Ok(started.elapsed())
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            // Best effort; the connection is dropped either way.
            if let Err(err) = session.client.flush().await {
                debug!(error = %err, "NATS flush on close failed");
            }
        }
        info!("NATS connection closed");
        Ok(())
    }

    async fn subscribe(&self, subject: &str, durable: &str) -> Result<DeliveryStream, TransportError> {
        let session = self.session().await?;
        let stream = session
            .jetstream
            .get_stream(stream_of(subject)?)
            .await
            .map_err(unavailable)?;
        let consumer = stream
            .get_or_create_consumer(
                durable,
                pull::Config {
                    durable_name: Some(durable.to_string()),
                    filter_subject: subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(unavailable)?;
        let messages = consumer.messages().await.map_err(unavailable)?;
        info!(subject, durable, "Subscribed to JetStream consumer");

        Ok(messages
            .map(|item| match item {
                Ok(message) => Ok(Box::new(NatsDelivery { message }) as Box<dyn Delivery>),
                Err(err) => {
                    warn!(error = %err, "JetStream delivery failed");
                    Err(unavailable(err))
                }
            })
            .boxed())
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

struct NatsDelivery {
    message: jetstream::Message,
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn subject(&self) -> &str {
        self.message.subject.as_str()
    }

    fn header(&self, name: &str) -> Option<String> {
        self.message
            .headers
            .as_ref()?
            .get(name)
            .map(|value| value.as_str().to_string())
    }

    fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    async fn ack(&self) -> Result<(), TransportError> {
        self.message.ack().await.map_err(unavailable)
    }

    async fn term(&self) -> Result<(), TransportError> {
        self.message.ack_with(AckKind::Term).await.map_err(unavailable)
    }

    async fn nak(&self) -> Result<(), TransportError> {
        self.message.ack_with(AckKind::Nak(None)).await.map_err(unavailable)
    }
}
