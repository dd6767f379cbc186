//! Background delivery of durably queued events.
//!
//! The dispatcher owns the set of flushed-but-undelivered events. Each
//! [`tick`](Dispatcher::tick) publishes every due entry; failures are
//! rescheduled with capped exponential backoff and evicted from the active
//! set once they reach the attempt ceiling. Evicted events stay in the queue
//! file and are picked up again by [`load`](Dispatcher::load) after a restart.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::application::metrics::GatewayMetrics;
use crate::application::publisher::BrokerPublisher;
use crate::application::queue::DurableQueue;
use crate::domain::Event;
use crate::error::QueueError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchPolicy {
    pub poll_interval: Duration,
    pub max_attempts: u32,
    pub max_delay: Duration,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            max_attempts: 8,
            max_delay: Duration::from_millis(32_000),
        }
    }
}

impl DispatchPolicy {
    /// `min(poll_interval * 2^attempt, max_delay)`, saturating.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.poll_interval.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

#[derive(Debug, Clone)]
struct QueueEntry {
    event: Event,
    attempt: u32,
    next_attempt_at: Instant,
}

/// Outcome counts of one tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    pub delivered: usize,
    pub failed: usize,
    pub evicted: usize,
}

impl DispatchSummary {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.failed == 0 && self.evicted == 0
    }
}

/// Clears the processing flag when a tick ends, unwinding included.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Dispatcher {
    queue: Arc<DurableQueue>,
    publisher: Arc<BrokerPublisher>,
    metrics: Arc<GatewayMetrics>,
    topic: String,
    policy: DispatchPolicy,
    entries: Mutex<Vec<QueueEntry>>,
    processing: AtomicBool,
}

impl Dispatcher {
    pub fn new(
        queue: Arc<DurableQueue>,
        publisher: Arc<BrokerPublisher>,
        metrics: Arc<GatewayMetrics>,
        topic: impl Into<String>,
        policy: DispatchPolicy,
    ) -> Self {
        Self {
            queue,
            publisher,
            metrics,
            topic: topic.into(),
            policy,
            entries: Mutex::new(Vec::new()),
            processing: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn policy(&self) -> DispatchPolicy {
        self.policy
    }

    /// Restore entries from the queue file. Returns how many were added.
    ///
    /// # Errors
    ///
    /// Returns an error when the queue file cannot be read.
    pub async fn load(&self) -> Result<usize, QueueError> {
        let events = self.queue.load_all().await?;
        let added = self.track(events);
        if added > 0 {
            info!(count = added, "Restored queued events for dispatch");
        }
        Ok(added)
    }

    /// Register freshly flushed events, due immediately. Ids already tracked
    /// are skipped.
    pub fn track(&self, events: Vec<Event>) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let mut known: HashSet<String> = entries
            .iter()
            .map(|entry| entry.event.event_id().to_string())
            .collect();

        let before = entries.len();
        for event in events {
            if known.insert(event.event_id().to_string()) {
                entries.push(QueueEntry {
                    event,
                    attempt: 0,
                    next_attempt_at: now,
                });
            }
        }
        entries.len() - before
    }

    /// Number of entries in the active set.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.entries.lock().len()
    }

    /// Attempt delivery of every due entry. A tick already running makes this
    /// a no-op.
    pub async fn tick(&self) -> DispatchSummary {
        if self.processing.swap(true, Ordering::AcqRel) {
            return DispatchSummary::default();
        }
        let _busy = BusyGuard(&self.processing);
        self.dispatch_due().await
    }

    /// Whether a tick is running right now.
    #[must_use]
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    async fn dispatch_due(&self) -> DispatchSummary {
        let now = Instant::now();
        // Entries stay in the active set until their attempt settles.
        let due: Vec<Event> = self
            .entries
            .lock()
            .iter()
            .filter(|entry| entry.next_attempt_at <= now)
            .map(|entry| entry.event.clone())
            .collect();

        let mut summary = DispatchSummary::default();
        for event in due {
            let event_id = event.event_id().to_string();
            match self.publisher.publish(&self.topic, &event, None).await {
                Ok(_) => {
                    self.entries.lock().retain(|entry| entry.event.event_id() != event_id);
                    self.queue.remove_by_id(&event_id).await;
                    self.metrics.increment_dispatch_delivered();
                    summary.delivered += 1;
                }
                Err(err) => {
                    self.metrics.increment_dispatch_failed();
                    summary.failed += 1;

                    let mut entries = self.entries.lock();
                    let Some(index) = entries
                        .iter()
                        .position(|entry| entry.event.event_id() == event_id)
                    else {
                        continue;
                    };
                    let entry = &mut entries[index];
                    entry.attempt += 1;

                    if entry.attempt >= self.policy.max_attempts {
                        let attempts = entry.attempt;
                        entries.remove(index);
                        self.metrics.increment_dispatch_evicted();
                        summary.evicted += 1;
                        warn!(
                            event_id = %event_id,
                            attempts,
                            error = %err,
                            "Dispatch attempts exhausted, evicting event"
                        );
                        continue;
                    }

                    let delay = self.policy.backoff(entry.attempt);
                    entry.next_attempt_at = Instant::now() + delay;
                    debug!(
                        event_id = %event_id,
                        attempt = entry.attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Dispatch failed, rescheduled"
                    );
                }
            }
        }

        summary
    }

    /// Tick every poll interval until `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.policy.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        info!("Dispatcher stopping");
                        break;
                    }
                }
                _ = interval.tick() => {
                    let summary = self.tick().await;
                    if !summary.is_empty() {
                        debug!(
                            delivered = summary.delivered,
                            failed = summary.failed,
                            evicted = summary.evicted,
                            "Dispatch tick complete"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::publisher::RetryPolicy;
    use crate::port::outbound::broker::TransportError;
    use crate::testkit::fixtures::tiktok_event;
    use crate::testkit::transport::ScriptedTransport;
    use tempfile::TempDir;

    fn rejected() -> TransportError {
        TransportError::Rejected("nope".into())
    }

    fn dispatcher(
        dir: &TempDir,
        transport: Arc<ScriptedTransport>,
        policy: DispatchPolicy,
    ) -> (Dispatcher, Arc<DurableQueue>, Arc<GatewayMetrics>) {
        let metrics = Arc::new(GatewayMetrics::new());
        let queue = Arc::new(DurableQueue::new(
            dir.path().join("events.jsonl"),
            dir.path().join("backup.jsonl"),
            Arc::clone(&metrics),
        ));
        let publisher = Arc::new(BrokerPublisher::new(transport, RetryPolicy::default()));
        publisher.mark_ready();
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            publisher,
            Arc::clone(&metrics),
            "gateway",
            policy,
        );
        (dispatcher, queue, metrics)
    }

    #[test]
    fn backoff_is_capped_and_saturating() {
        let policy = DispatchPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(5), Duration::from_secs(32));
        assert_eq!(policy.backoff(6), Duration::from_secs(32));
        assert_eq!(policy.backoff(64), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn track_skips_known_ids() {
        let dir = TempDir::new().unwrap();
        let (dispatcher, _, _) =
            dispatcher(&dir, Arc::new(ScriptedTransport::new()), DispatchPolicy::default());

        assert_eq!(dispatcher.track(vec![tiktok_event("a"), tiktok_event("b")]), 2);
        assert_eq!(dispatcher.track(vec![tiktok_event("a"), tiktok_event("c")]), 1);
        assert_eq!(dispatcher.tracked(), 3);
    }

    #[tokio::test]
    async fn delivered_entries_leave_file_and_active_set() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new());
        let (dispatcher, queue, metrics) =
            dispatcher(&dir, Arc::clone(&transport), DispatchPolicy::default());

        queue.enqueue_event(tiktok_event("a")).await.unwrap();
        queue.enqueue_event(tiktok_event("b")).await.unwrap();
        dispatcher.track(queue.flush().await.unwrap());

        let summary = dispatcher.tick().await;

        assert_eq!(summary.delivered, 2);
        assert_eq!(dispatcher.tracked(), 0);
        assert!(queue.load_all().await.unwrap().is_empty());
        assert_eq!(metrics.snapshot().dispatch_delivered, 2);
        assert_eq!(transport.published()[0].subject, "gateway.events.video.view");
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_rescheduled_with_backoff() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new().with_publish_results(vec![Err(rejected())]));
        let (dispatcher, queue, _) =
            dispatcher(&dir, Arc::clone(&transport), DispatchPolicy::default());

        queue.enqueue_event(tiktok_event("a")).await.unwrap();
        dispatcher.track(queue.flush().await.unwrap());

        assert_eq!(dispatcher.tick().await.failed, 1);
        // Not due yet: backoff after the first failure is 2s.
        assert!(dispatcher.tick().await.is_empty());

        tokio::time::advance(Duration::from_millis(2001)).await;
        assert_eq!(dispatcher.tick().await.delivered, 1);
        assert_eq!(transport.publish_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_at_exactly_max_attempts_and_keeps_file_record() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(ScriptedTransport::new().with_failing_event("a", rejected()));
        let policy = DispatchPolicy {
            poll_interval: Duration::from_millis(10),
            max_attempts: 3,
            max_delay: Duration::from_millis(100),
        };
        let (dispatcher, queue, metrics) = dispatcher(&dir, Arc::clone(&transport), policy);

        queue.enqueue_event(tiktok_event("a")).await.unwrap();
        dispatcher.track(queue.flush().await.unwrap());

        let mut evicted = 0;
        for _ in 0..10 {
            evicted += dispatcher.tick().await.evicted;
            tokio::time::advance(Duration::from_millis(200)).await;
        }

        assert_eq!(evicted, 1);
        assert_eq!(transport.publish_count(), 3);
        assert_eq!(dispatcher.tracked(), 0);
        assert_eq!(metrics.snapshot().dispatch_evicted, 1);
        assert_eq!(queue.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_n_failures() {
        let dir = TempDir::new().unwrap();
        let transport = Arc::new(
            ScriptedTransport::new().with_publish_results(vec![Err(rejected()); 4]),
        );
        let (dispatcher, queue, _) =
            dispatcher(&dir, Arc::clone(&transport), DispatchPolicy::default());

        queue.enqueue_event(tiktok_event("a")).await.unwrap();
        dispatcher.track(queue.flush().await.unwrap());

        let mut delivered = 0;
        for _ in 0..10 {
            delivered += dispatcher.tick().await.delivered;
            tokio::time::advance(Duration::from_secs(32)).await;
        }

        assert_eq!(delivered, 1);
        assert_eq!(transport.publish_count(), 5);
        assert!(queue.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn load_restores_from_file() {
        let dir = TempDir::new().unwrap();
        let (dispatcher, queue, _) =
            dispatcher(&dir, Arc::new(ScriptedTransport::new()), DispatchPolicy::default());

        queue.enqueue_event(tiktok_event("a")).await.unwrap();
        queue.enqueue_event(tiktok_event("b")).await.unwrap();
        queue.flush().await.unwrap();

        assert_eq!(dispatcher.load().await.unwrap(), 2);
        assert_eq!(dispatcher.load().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown_signal() {
        let dir = TempDir::new().unwrap();
        let (dispatcher, _, _) =
            dispatcher(&dir, Arc::new(ScriptedTransport::new()), DispatchPolicy::default());
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(Arc::new(dispatcher).run(rx));
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_tick_releases_flag_and_keeps_entries() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(GatewayMetrics::new());
        let queue = Arc::new(DurableQueue::new(
            dir.path().join("events.jsonl"),
            dir.path().join("backup.jsonl"),
            Arc::clone(&metrics),
        ));
        // Never marked ready until later, so the first tick parks on publish.
        let publisher = Arc::new(BrokerPublisher::new(
            Arc::new(ScriptedTransport::new()),
            RetryPolicy::default(),
        ));
        let dispatcher = Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&publisher),
            metrics,
            "gateway",
            DispatchPolicy::default(),
        );
        queue.enqueue_event(tiktok_event("a")).await.unwrap();
        dispatcher.track(queue.flush().await.unwrap());

        let abandoned = tokio::time::timeout(Duration::from_millis(50), dispatcher.tick()).await;
        assert!(abandoned.is_err());
        assert!(!dispatcher.is_processing());
        assert_eq!(dispatcher.tracked(), 1);

        publisher.mark_ready();
        assert_eq!(dispatcher.tick().await.delivered, 1);
        assert_eq!(dispatcher.tracked(), 0);
    }
}
