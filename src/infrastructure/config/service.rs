//! HTTP server, broker, health and shutdown configuration.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "0.0.0.0:3000".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Broker connection and stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerConfig {
    /// `nats://host:port`, or `memory://` for the in-process broker.
    #[serde(default = "default_broker_url")]
    pub url: String,
    /// Client name announced on CONNECT.
    #[serde(default = "default_client_name")]
    pub client_name: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// JetStream streams, each capturing `<name>.events.>`.
    #[serde(default = "default_streams")]
    pub streams: Vec<String>,
    /// Create missing streams on connect.
    #[serde(default = "default_ensure_streams")]
    pub ensure_streams: bool,
}

fn default_broker_url() -> String {
    "nats://localhost:4222".into()
}

fn default_client_name() -> String {
    "eventgate".into()
}

const fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_streams() -> Vec<String> {
    vec!["gateway".into(), "facebook".into(), "tiktok".into()]
}

const fn default_ensure_streams() -> bool {
    true
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: default_broker_url(),
            client_name: default_client_name(),
            request_timeout_ms: default_request_timeout_ms(),
            streams: default_streams(),
            ensure_streams: default_ensure_streams(),
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.url.starts_with("memory://")
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthConfig {
    /// Dependency names checked by readiness, in order.
    #[serde(default = "default_dependencies")]
    pub dependencies: Vec<String>,
}

fn default_dependencies() -> Vec<String> {
    vec!["sqlite".into()]
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            dependencies: default_dependencies(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ShutdownConfig {
    /// 0 waits for in-flight work without a limit.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
}

const fn default_drain_timeout_ms() -> u64 {
    30000
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout_ms: default_drain_timeout_ms(),
        }
    }
}

impl ShutdownConfig {
    #[must_use]
    pub fn drain_timeout(&self) -> Option<Duration> {
        (self.drain_timeout_ms > 0).then(|| Duration::from_millis(self.drain_timeout_ms))
    }
}

/// One durable subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SubscriptionConfig {
    /// Subject filter, wildcards allowed.
    pub subject: String,
    /// Durable consumer name.
    pub durable: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct ConsumerConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}
