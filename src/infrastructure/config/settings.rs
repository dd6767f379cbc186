//! Application configuration loading and validation.
//!
//! Provides the main [`Config`] struct that aggregates all gateway settings.
//! Configuration is read from an optional TOML file, then overridden by
//! environment variables (`.env` is loaded by the binary beforehand), then
//! validated.
//!
//! # Example
//!
//! ```no_run
//! use eventgate::infrastructure::config::settings::Config;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_sources(Some("config.toml".as_ref()))?;
//!     config.init_logging();
//!     Ok(())
//! }
//! ```

use std::fmt::Display;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use url::Url;

use super::logging::LoggingConfig;
use super::pipeline::{BatchConfig, DeadLetterConfig, DispatcherConfig, PublisherConfig, QueueConfig};
use super::pool::ReconnectionConfig;
use super::service::{BrokerConfig, ConsumerConfig, HealthConfig, ServerConfig, ShutdownConfig};
use crate::error::{ConfigError, Result};

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Reported by health endpoints and log lines.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub dead_letter: DeadLetterConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub publisher: PublisherConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    /// Backoff for the initial broker connection.
    #[serde(default)]
    pub reconnection: ReconnectionConfig,

    /// Durable broker subscriptions; off unless enabled.
    #[serde(default)]
    pub consumer: ConsumerConfig,

    /// Path to SQLite database file.
    ///
    /// Defaults to "eventgate.db" in the current directory.
    #[serde(default = "default_database_path")]
    pub database: String,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_service_name() -> String {
    "eventgate".to_string()
}

fn default_database_path() -> String {
    "eventgate.db".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            server: ServerConfig::default(),
            queue: QueueConfig::default(),
            dead_letter: DeadLetterConfig::default(),
            dispatcher: DispatcherConfig::default(),
            publisher: PublisherConfig::default(),
            batch: BatchConfig::default(),
            broker: BrokerConfig::default(),
            reconnection: ReconnectionConfig::default(),
            consumer: ConsumerConfig::default(),
            database: default_database_path(),
            health: HealthConfig::default(),
            shutdown: ShutdownConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn override_string<F>(lookup: &F, key: &str, target: &mut String)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        *target = value;
    }
}

fn override_parsed<F, T>(lookup: &F, key: &'static str, target: &mut T) -> std::result::Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = lookup(key) {
        *target = raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            field: key,
            reason: format!("{raw:?}: {e}"),
        })?;
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stream and durable names: no whitespace, dots or wildcards.
fn is_broker_name(name: &str) -> bool {
    !name.is_empty()
        && !name
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '.' | '*' | '>'))
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

impl Config {
    /// Parse and validate configuration from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, the TOML is malformed or
    /// validation fails.
    #[allow(clippy::result_large_err)]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
        Self::parse_toml(&content)
    }

    /// File (if any), then process environment, then validation.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, an environment
    /// value is malformed, or validation fails.
    #[allow(clippy::result_large_err)]
    pub fn from_sources(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(ConfigError::ReadFile)?;
                toml::from_str(&content).map_err(ConfigError::Parse)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (normally the process environment).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when a numeric value does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> std::result::Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_string(&lookup, "SERVICE_NAME", &mut self.service_name);
        override_string(&lookup, "HTTP_ADDR", &mut self.server.bind);

        override_string(&lookup, "EVENTS_FILE_PATH", &mut self.queue.path);
        override_string(&lookup, "EVENTS_BACKUP_PATH", &mut self.queue.backup_path);
        override_parsed(&lookup, "EVENTS_FLUSH_INTERVAL_MS", &mut self.queue.flush_interval_ms)?;
        override_parsed(&lookup, "EVENTS_BACKUP_INTERVAL_MS", &mut self.queue.backup_interval_ms)?;
        override_string(&lookup, "DLQ_PATH", &mut self.dead_letter.path);

        override_parsed(&lookup, "EVENTS_DISPATCH_INTERVAL_MS", &mut self.dispatcher.poll_interval_ms)?;
        override_parsed(&lookup, "EVENTS_DISPATCH_MAX_ATTEMPTS", &mut self.dispatcher.max_attempts)?;
        override_parsed(&lookup, "EVENTS_DISPATCH_MAX_DELAY_MS", &mut self.dispatcher.max_delay_ms)?;
        override_string(&lookup, "NATS_BASE_TOPIC", &mut self.dispatcher.base_topic);

        override_parsed(&lookup, "NATS_PUBLISH_MAX_RETRIES", &mut self.publisher.max_retries)?;
        override_parsed(&lookup, "NATS_PUBLISH_MAX_DELAY_MS", &mut self.publisher.max_delay_ms)?;

        override_parsed(&lookup, "EVENTS_BATCH_CHUNK_SIZE", &mut self.batch.chunk_size)?;
        override_parsed(&lookup, "EVENTS_BATCH_CONCURRENCY", &mut self.batch.concurrency)?;

        override_string(&lookup, "NATS_URL", &mut self.broker.url);
        if let Some(raw) = lookup("NATS_STREAMS") {
            self.broker.streams = split_list(&raw);
        }
        override_parsed(&lookup, "NATS_ENSURE_STREAMS", &mut self.broker.ensure_streams)?;
        override_parsed(&lookup, "NATS_CONSUMER_ENABLED", &mut self.consumer.enabled)?;
        override_string(&lookup, "DATABASE_URL", &mut self.database);

        if let Some(raw) = lookup("HEALTH_DEPENDENCIES") {
            self.health.dependencies = split_list(&raw);
        }
        override_parsed(&lookup, "SHUTDOWN_DRAIN_TIMEOUT_MS", &mut self.shutdown.drain_timeout_ms)?;

        override_string(&lookup, "LOG_LEVEL", &mut self.logging.level);
        override_string(&lookup, "LOG_FORMAT", &mut self.logging.format);
        Ok(())
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.service_name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "service_name",
            });
        }
        if self.server.bind.parse::<SocketAddr>().is_err() {
            return Err(invalid("server.bind", "must be a socket address like 0.0.0.0:3000"));
        }

        for (field, value) in [
            ("queue.path", &self.queue.path),
            ("queue.backup_path", &self.queue.backup_path),
            ("dead_letter.path", &self.dead_letter.path),
            ("database", &self.database),
            ("dispatcher.base_topic", &self.dispatcher.base_topic),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingField { field });
            }
        }

        for (field, value) in [
            ("queue.flush_interval_ms", self.queue.flush_interval_ms),
            ("queue.backup_interval_ms", self.queue.backup_interval_ms),
            ("dispatcher.poll_interval_ms", self.dispatcher.poll_interval_ms),
            ("dispatcher.max_delay_ms", self.dispatcher.max_delay_ms),
            ("publisher.initial_delay_ms", self.publisher.initial_delay_ms),
            ("reconnection.initial_delay_ms", self.reconnection.initial_delay_ms),
        ] {
            if value == 0 {
                return Err(invalid(field, "must be greater than 0"));
            }
        }

        if self.dispatcher.max_attempts == 0 {
            return Err(invalid("dispatcher.max_attempts", "must be greater than 0"));
        }
        if self.batch.chunk_size == 0 {
            return Err(invalid("batch.chunk_size", "must be greater than 0"));
        }
        if self.batch.concurrency == 0 {
            return Err(invalid("batch.concurrency", "must be greater than 0"));
        }
        if self.publisher.max_delay_ms < self.publisher.initial_delay_ms {
            return Err(invalid("publisher.max_delay_ms", "must be >= initial_delay_ms"));
        }
        if self.reconnection.max_delay_ms < self.reconnection.initial_delay_ms {
            return Err(invalid("reconnection.max_delay_ms", "must be >= initial_delay_ms"));
        }
        if self.reconnection.backoff_multiplier < 1.0 {
            return Err(invalid("reconnection.backoff_multiplier", "must be >= 1.0"));
        }

        if !self.broker.is_memory() {
            let url = Url::parse(&self.broker.url)
                .map_err(|e| invalid("broker.url", &e.to_string()))?;
            if !matches!(url.scheme(), "nats" | "tcp") {
                return Err(invalid("broker.url", "scheme must be nats://, tcp:// or memory://"));
            }
            if url.host_str().is_none() {
                return Err(invalid("broker.url", "missing host"));
            }
        }
        if !self.broker.streams.iter().all(|name| is_broker_name(name)) {
            return Err(invalid("broker.streams", "names must not contain whitespace, '.', '*' or '>'"));
        }

        if self.consumer.enabled {
            if self.consumer.subscriptions.is_empty() {
                return Err(invalid("consumer.subscriptions", "must not be empty when enabled"));
            }
            for subscription in &self.consumer.subscriptions {
                if subscription.subject.trim().is_empty() {
                    return Err(ConfigError::MissingField {
                        field: "consumer.subscriptions.subject",
                    });
                }
                if !is_broker_name(&subscription.durable) {
                    return Err(invalid(
                        "consumer.subscriptions.durable",
                        "must not contain whitespace, '.', '*' or '>'",
                    ));
                }
            }
        }

        Ok(())
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self) {
        self.logging.init();
    }
}
