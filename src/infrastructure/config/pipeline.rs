//! Durable queue, dispatcher, publisher and batch settings.

use std::time::Duration;

use serde::Deserialize;

use crate::application::dispatcher::DispatchPolicy;
use crate::application::ingest::BatchPolicy;
use crate::application::publisher::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct QueueConfig {
    /// NDJSON queue file.
    #[serde(default = "default_queue_path")]
    pub path: String,
    #[serde(default = "default_backup_path")]
    pub backup_path: String,
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_backup_interval_ms")]
    pub backup_interval_ms: u64,
}

fn default_queue_path() -> String {
    "data/events.jsonl".into()
}

fn default_backup_path() -> String {
    "data/events_backup.jsonl".into()
}

const fn default_flush_interval_ms() -> u64 {
    1000
}

const fn default_backup_interval_ms() -> u64 {
    60000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            backup_path: default_backup_path(),
            flush_interval_ms: default_flush_interval_ms(),
            backup_interval_ms: default_backup_interval_ms(),
        }
    }
}

impl QueueConfig {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn backup_interval(&self) -> Duration {
        Duration::from_millis(self.backup_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeadLetterConfig {
    #[serde(default = "default_dead_letter_path")]
    pub path: String,
}

fn default_dead_letter_path() -> String {
    "data/dead_letter_queue.jsonl".into()
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            path: default_dead_letter_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_dispatch_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Subject prefix for redelivered events.
    #[serde(default = "default_base_topic")]
    pub base_topic: String,
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_max_attempts() -> u32 {
    8
}

const fn default_dispatch_max_delay_ms() -> u64 {
    32000
}

fn default_base_topic() -> String {
    "gateway".into()
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            max_delay_ms: default_dispatch_max_delay_ms(),
            base_topic: default_base_topic(),
        }
    }
}

impl From<&DispatcherConfig> for DispatchPolicy {
    fn from(config: &DispatcherConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_attempts: config.max_attempts,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_publish_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_initial_delay_ms() -> u64 {
    200
}

const fn default_publish_max_delay_ms() -> u64 {
    5000
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_publish_max_delay_ms(),
        }
    }
}

impl From<&PublisherConfig> for RetryPolicy {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

const fn default_chunk_size() -> usize {
    100
}

const fn default_concurrency() -> usize {
    5
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            concurrency: default_concurrency(),
        }
    }
}

impl From<&BatchConfig> for BatchPolicy {
    fn from(config: &BatchConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            concurrency: config.concurrency,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policies() {
        assert_eq!(DispatchPolicy::from(&DispatcherConfig::default()), DispatchPolicy::default());
        assert_eq!(RetryPolicy::from(&PublisherConfig::default()), RetryPolicy::default());
        assert_eq!(BatchPolicy::from(&BatchConfig::default()), BatchPolicy::default());
    }

    #[test]
    fn partial_table_fills_defaults() {
        let config: DispatcherConfig = toml::from_str("max_attempts = 3").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_topic, "gateway");
        assert_eq!(config.poll_interval_ms, 1000);
    }
}
