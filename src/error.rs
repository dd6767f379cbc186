use thiserror::Error;

use crate::domain::validation::ValidationFailure;
use crate::port::outbound::broker::TransportError;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// Persistence failures. Duplicates are not errors; see
/// [`PersistOutcome`](crate::port::outbound::persistence::PersistOutcome).
#[derive(Error, Debug, Clone)]
pub enum PersistenceError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("repository is closed")]
    Closed,
}

/// Terminal failure to hand one event to the broker.
#[derive(Error, Debug, Clone)]
#[error("failed to publish to {subject} after {attempts} attempt(s): {source}")]
pub struct DeliveryError {
    pub subject: String,
    pub attempts: u32,
    #[source]
    pub source: TransportError,
}

/// Durable queue and dead-letter file errors.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("invalid event: {0}")]
    InvalidEvent(ValidationFailure),

    #[error("queue file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outcome errors surfaced by the ingestion orchestrator.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("validation error")]
    Validation(ValidationFailure),

    #[error("service is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Publish(#[from] DeliveryError),
}

/// Failures collected while tearing the gateway down.
#[derive(Error, Debug)]
pub enum ShutdownError {
    #[error("in-flight work did not drain within {timeout_ms}ms ({remaining} remaining)")]
    DrainTimeout { timeout_ms: u64, remaining: usize },

    #[error("failed to close durable queue: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to release persistence: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("failed to release broker: {0}")]
    Broker(#[from] TransportError),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Shutdown(#[from] ShutdownError),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, Error>;
