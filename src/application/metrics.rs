//! In-process gateway metrics.
//!
//! Counters and gauges are plain atomics; labelled counters live in
//! `DashMap`s. Every update also emits a `debug` event on the
//! `eventgate::metrics` target so a log pipeline can pick them up.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use crate::domain::Event;

/// Shared metrics registry. Cheap to update from any task.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    accepted: DashMap<String, u64>,
    failed: DashMap<String, u64>,
    processed: AtomicU64,
    processing_micros: AtomicU64,
    batch_concurrency: AtomicI64,
    batch_chunks: AtomicU64,
    batch_chunk_micros: AtomicU64,
    dead_lettered: AtomicU64,
    dispatch_delivered: AtomicU64,
    dispatch_failed: AtomicU64,
    dispatch_evicted: AtomicU64,
    queue_depth: AtomicU64,
    queue_write_errors: AtomicU64,
    queue_read_errors: AtomicU64,
}

/// Point-in-time copy of every metric.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub accepted_total: u64,
    pub failed: Vec<(String, u64)>,
    pub processed: u64,
    pub processing_micros: u64,
    pub batch_concurrency: i64,
    pub batch_chunks: u64,
    pub dead_lettered: u64,
    pub dispatch_delivered: u64,
    pub dispatch_failed: u64,
    pub dispatch_evicted: u64,
    pub queue_depth: u64,
    pub queue_write_errors: u64,
    pub queue_read_errors: u64,
}

impl MetricsSnapshot {
    /// Failure count for one reason label.
    #[must_use]
    pub fn failed_for(&self, reason: &str) -> u64 {
        self.failed
            .iter()
            .find(|(label, _)| label == reason)
            .map_or(0, |(_, count)| *count)
    }
}

impl GatewayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_accepted(&self, event: &Event) {
        let key = format!(
            "{}/{}/{}",
            event.source(),
            event.funnel_stage(),
            event.event_type()
        );
        debug!(target: "eventgate::metrics", metric = "events_accepted", labels = %key);
        *self.accepted.entry(key).or_insert(0) += 1;
    }

    /// Accepted count for one `source/stage/type` label.
    #[must_use]
    pub fn accepted(&self, source: &str, stage: &str, event_type: &str) -> u64 {
        self.accepted
            .get(&format!("{source}/{stage}/{event_type}"))
            .map_or(0, |count| *count)
    }

    pub fn increment_failed(&self, reason: &str) {
        debug!(target: "eventgate::metrics", metric = "events_failed", reason);
        *self.failed.entry(reason.to_string()).or_insert(0) += 1;
    }

    pub fn observe_processing_time(&self, elapsed: Duration) {
        let micros = duration_micros(elapsed);
        debug!(target: "eventgate::metrics", metric = "event_processing_time", micros);
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.processing_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn batch_started(&self) {
        let now = self.batch_concurrency.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(target: "eventgate::metrics", metric = "batch_concurrency", value = now);
    }

    pub fn batch_finished(&self) {
        let now = self.batch_concurrency.fetch_sub(1, Ordering::Relaxed) - 1;
        debug!(target: "eventgate::metrics", metric = "batch_concurrency", value = now);
    }

    pub fn observe_batch_chunk(&self, elapsed: Duration) {
        let micros = duration_micros(elapsed);
        debug!(target: "eventgate::metrics", metric = "batch_chunk_time", micros);
        self.batch_chunks.fetch_add(1, Ordering::Relaxed);
        self.batch_chunk_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn add_dead_lettered(&self, count: usize) {
        debug!(target: "eventgate::metrics", metric = "events_dead_lettered", count);
        self.dead_lettered.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn increment_dispatch_delivered(&self) {
        debug!(target: "eventgate::metrics", metric = "dispatch_delivered");
        self.dispatch_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dispatch_failed(&self) {
        debug!(target: "eventgate::metrics", metric = "dispatch_failed");
        self.dispatch_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dispatch_evicted(&self) {
        debug!(target: "eventgate::metrics", metric = "dispatch_evicted");
        self.dispatch_evicted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_queue_depth(&self, depth: usize) {
        debug!(target: "eventgate::metrics", metric = "queue_depth", depth);
        self.queue_depth.store(depth as u64, Ordering::Relaxed);
    }

    pub fn increment_queue_write_errors(&self) {
        debug!(target: "eventgate::metrics", metric = "queue_write_errors");
        self.queue_write_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_queue_read_errors(&self) {
        debug!(target: "eventgate::metrics", metric = "queue_read_errors");
        self.queue_read_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut failed: Vec<(String, u64)> = self
            .failed
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        failed.sort();

        MetricsSnapshot {
            accepted_total: self.accepted.iter().map(|entry| *entry.value()).sum(),
            failed,
            processed: self.processed.load(Ordering::Relaxed),
            processing_micros: self.processing_micros.load(Ordering::Relaxed),
            batch_concurrency: self.batch_concurrency.load(Ordering::Relaxed),
            batch_chunks: self.batch_chunks.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            dispatch_delivered: self.dispatch_delivered.load(Ordering::Relaxed),
            dispatch_failed: self.dispatch_failed.load(Ordering::Relaxed),
            dispatch_evicted: self.dispatch_evicted.load(Ordering::Relaxed),
            queue_depth: self.queue_depth.load(Ordering::Relaxed),
            queue_write_errors: self.queue_write_errors.load(Ordering::Relaxed),
            queue_read_errors: self.queue_read_errors.load(Ordering::Relaxed),
        }
    }
}

fn duration_micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_counters_are_labelled() {
        let metrics = GatewayMetrics::new();
        metrics.increment_failed("validation");
        metrics.increment_failed("validation");
        metrics.increment_failed("publish");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.failed_for("validation"), 2);
        assert_eq!(snapshot.failed_for("publish"), 1);
        assert_eq!(snapshot.failed_for("persistence"), 0);
    }

    #[test]
    fn batch_gauge_returns_to_zero() {
        let metrics = GatewayMetrics::new();
        metrics.batch_started();
        metrics.batch_started();
        assert_eq!(metrics.snapshot().batch_concurrency, 2);

        metrics.batch_finished();
        metrics.batch_finished();
        assert_eq!(metrics.snapshot().batch_concurrency, 0);
    }

    #[test]
    fn processing_time_accumulates() {
        let metrics = GatewayMetrics::new();
        metrics.observe_processing_time(Duration::from_millis(2));
        metrics.observe_processing_time(Duration::from_millis(3));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.processed, 2);
        assert_eq!(snapshot.processing_micros, 5_000);
    }

    #[test]
    fn queue_depth_is_a_gauge() {
        let metrics = GatewayMetrics::new();
        metrics.set_queue_depth(7);
        metrics.set_queue_depth(3);
        assert_eq!(metrics.snapshot().queue_depth, 3);
    }
}
