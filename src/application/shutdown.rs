//! Coordinated graceful shutdown.
//!
//! Order: readiness latch, drain in-flight work, stop background loops and
//! close the durable queue, release persistence, release the broker. Every
//! step runs even when an earlier one fails; the first failure is returned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::application::health::{InFlightTracker, ReadinessState};
use crate::application::publisher::BrokerPublisher;
use crate::application::queue::DurableQueue;
use crate::error::ShutdownError;
use crate::port::outbound::persistence::EventRepository;

pub struct ShutdownCoordinator {
    readiness: Arc<ReadinessState>,
    in_flight: Arc<InFlightTracker>,
    queue: Option<Arc<DurableQueue>>,
    repository: Arc<dyn EventRepository>,
    publisher: Arc<BrokerPublisher>,
    drain_timeout: Option<Duration>,
    stop: watch::Sender<bool>,
    started: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(
        readiness: Arc<ReadinessState>,
        in_flight: Arc<InFlightTracker>,
        repository: Arc<dyn EventRepository>,
        publisher: Arc<BrokerPublisher>,
    ) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            readiness,
            in_flight,
            queue: None,
            repository,
            publisher,
            drain_timeout: None,
            stop,
            started: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn with_queue(mut self, queue: Arc<DurableQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Bound the in-flight drain. Without one, shutdown waits indefinitely.
    #[must_use]
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = Some(timeout);
        self
    }

    /// Receiver that flips to `true` when background loops should stop.
    #[must_use]
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop.subscribe()
    }

    /// Run the shutdown sequence. A second call is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the first failure after every step has been attempted.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.started.swap(true, Ordering::AcqRel) {
            warn!("Shutdown already in progress");
            return Ok(());
        }

        info!(in_flight = self.in_flight.count(), "Shutting down");
        self.readiness.set_readiness(false);

        let mut failures: Vec<ShutdownError> = Vec::new();

        match self.drain_timeout {
            Some(limit) => {
                if tokio::time::timeout(limit, self.in_flight.wait_idle())
                    .await
                    .is_err()
                {
                    failures.push(ShutdownError::DrainTimeout {
                        timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                        remaining: self.in_flight.count(),
                    });
                }
            }
            None => self.in_flight.wait_idle().await,
        }

        self.stop.send_replace(true);

        if let Some(queue) = &self.queue {
            if let Err(err) = queue.close().await {
                failures.push(err.into());
            }
        }
        if let Err(err) = self.repository.close().await {
            failures.push(err.into());
        }
        if let Err(err) = self.publisher.close().await {
            failures.push(err.into());
        }

        let mut failures = failures.into_iter();
        let Some(first) = failures.next() else {
            info!("Shutdown complete");
            return Ok(());
        };
        for other in failures {
            error!(error = %other, "Additional shutdown failure");
        }
        error!(error = %first, "Shutdown finished with errors");
        Err(first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::publisher::RetryPolicy;
    use crate::error::PersistenceError;
    use crate::port::outbound::broker::{BrokerTransport, TransportError};
    use crate::testkit::repository::ScriptedRepository;
    use crate::testkit::transport::ScriptedTransport;
    use crate::testkit::CallLog;

    struct Harness {
        coordinator: ShutdownCoordinator,
        readiness: Arc<ReadinessState>,
        in_flight: Arc<InFlightTracker>,
        transport: Arc<ScriptedTransport>,
    }

    fn harness(transport: ScriptedTransport, repository: ScriptedRepository) -> Harness {
        let transport = Arc::new(transport);
        let readiness = Arc::new(ReadinessState::new());
        let in_flight = Arc::new(InFlightTracker::new());
        let publisher = Arc::new(BrokerPublisher::new(
            Arc::clone(&transport) as Arc<dyn BrokerTransport>,
            RetryPolicy::default(),
        ));
        let coordinator = ShutdownCoordinator::new(
            Arc::clone(&readiness),
            Arc::clone(&in_flight),
            Arc::new(repository),
            publisher,
        );
        Harness {
            coordinator,
            readiness,
            in_flight,
            transport,
        }
    }

    #[tokio::test]
    async fn releases_persistence_before_broker() {
        let log = CallLog::new();
        let h = harness(
            ScriptedTransport::new().with_call_log(log.clone()),
            ScriptedRepository::new().with_call_log(log.clone()),
        );

        h.coordinator.shutdown().await.unwrap();

        assert_eq!(log.calls(), vec!["repository.close", "broker.close"]);
        assert!(!h.readiness.is_ready());
    }

    #[tokio::test]
    async fn first_failure_returned_after_all_steps() {
        let h = harness(
            ScriptedTransport::new()
                .with_close_result(Err(TransportError::Unavailable("gone".into()))),
            ScriptedRepository::new()
                .with_close_result(Err(PersistenceError::Connection("pool poisoned".into()))),
        );

        let err = h.coordinator.shutdown().await.unwrap_err();

        assert!(matches!(err, ShutdownError::Persistence(_)));
        assert!(h.transport.is_closed());
    }

    #[tokio::test]
    async fn broker_failure_alone_is_returned() {
        let h = harness(
            ScriptedTransport::new().with_close_result(Err(TransportError::Closed)),
            ScriptedRepository::new(),
        );

        let err = h.coordinator.shutdown().await.unwrap_err();
        assert!(matches!(err, ShutdownError::Broker(TransportError::Closed)));
    }

    #[tokio::test]
    async fn waits_for_in_flight_work() {
        let log = CallLog::new();
        let h = harness(
            ScriptedTransport::new().with_call_log(log.clone()),
            ScriptedRepository::new().with_call_log(log.clone()),
        );
        let in_flight = Arc::clone(&h.in_flight);
        let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        let worker = tokio::spawn(async move {
            let _guard = in_flight.enter();
            let _ = entered_tx.send(());
            let _ = release_rx.await;
        });
        entered_rx.await.unwrap();

        let coordinator = Arc::new(h.coordinator);
        let shutdown = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.shutdown().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(log.calls().is_empty());
        assert!(!h.readiness.is_ready());

        release_tx.send(()).unwrap();
        worker.await.unwrap();
        shutdown.await.unwrap().unwrap();
        assert_eq!(log.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_timeout_is_reported_but_teardown_continues() {
        let h = harness(ScriptedTransport::new(), ScriptedRepository::new());
        let _stuck = h.in_flight.enter();
        let coordinator = h.coordinator.with_drain_timeout(Duration::from_millis(100));

        let err = coordinator.shutdown().await.unwrap_err();

        assert!(matches!(
            err,
            ShutdownError::DrainTimeout {
                timeout_ms: 100,
                remaining: 1
            }
        ));
        assert!(h.transport.is_closed());
    }

    #[tokio::test]
    async fn stop_signal_flips_and_second_call_is_noop() {
        let h = harness(ScriptedTransport::new(), ScriptedRepository::new());
        let mut stop = h.coordinator.stop_signal();

        h.coordinator.shutdown().await.unwrap();
        assert!(*stop.borrow_and_update());

        h.coordinator.shutdown().await.unwrap();
    }
}
