//! Readiness latch, in-flight accounting and dependency health checks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::port::outbound::health::DependencyProbe;

/// Ready flag with a one-way shutdown latch.
#[derive(Debug)]
pub struct ReadinessState {
    ready: AtomicBool,
    latched: AtomicBool,
}

impl Default for ReadinessState {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            latched: AtomicBool::new(false),
        }
    }
}

impl ReadinessState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set readiness. `false` latches: every later call is ignored.
    pub fn set_readiness(&self, ready: bool) {
        if self.latched.load(Ordering::Acquire) {
            if ready {
                debug!("Ignoring readiness=true after shutdown latch");
            }
            return;
        }
        if !ready {
            self.latched.store(true, Ordering::Release);
            info!("Readiness latched to false");
        }
        self.ready.store(ready, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.latched.load(Ordering::Acquire)
    }
}

/// Counts orchestrations between validation and settlement.
#[derive(Debug, Default)]
pub struct InFlightTracker {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the tracker when dropped, on every exit path.
#[must_use = "the in-flight count drops as soon as the guard does"]
pub struct InFlightGuard<'a> {
    tracker: &'a InFlightTracker,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.tracker.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.tracker.idle.notify_waiters();
        }
    }
}

impl InFlightTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&self) -> InFlightGuard<'_> {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard { tracker: self }
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Resolve once the count is zero.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Error,
}

/// Result of probing one dependency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCheck {
    name: String,
    status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    duration_ms: u64,
}

impl DependencyCheck {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> CheckStatus {
        self.status
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn is_ok(&self) -> bool {
        self.status == CheckStatus::Ok
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessReport {
    ready: bool,
    checks: Vec<DependencyCheck>,
}

impl ReadinessReport {
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn checks(&self) -> &[DependencyCheck] {
        &self.checks
    }
}

pub struct HealthService {
    readiness: Arc<ReadinessState>,
    dependencies: Vec<String>,
    probes: Vec<Arc<dyn DependencyProbe>>,
}

impl HealthService {
    pub fn new(
        readiness: Arc<ReadinessState>,
        dependencies: Vec<String>,
        probes: Vec<Arc<dyn DependencyProbe>>,
    ) -> Self {
        Self {
            readiness,
            dependencies,
            probes,
        }
    }

    /// The process is up; liveness never consults dependencies.
    #[must_use]
    pub fn check_liveness(&self) -> bool {
        true
    }

    /// Probe the configured dependencies concurrently, reporting in
    /// configured order. After the shutdown latch this is always not-ready
    /// with no checks.
    pub async fn check_readiness(&self) -> ReadinessReport {
        if !self.readiness.is_ready() {
            return ReadinessReport {
                ready: false,
                checks: Vec::new(),
            };
        }

        let selected: Vec<(&str, &Arc<dyn DependencyProbe>)> = self
            .dependencies
            .iter()
            .filter_map(|name| {
                let probe = self.probes.iter().find(|probe| probe.answers_to(name));
                if probe.is_none() {
                    warn!(dependency = %name, "Unknown health dependency, skipping");
                }
                probe.map(|probe| (name.as_str(), probe))
            })
            .collect();

        // Checks carry the configured name, which may be an alias.
        let checks = join_all(selected.into_iter().map(|(name, probe)| async move {
            let started = Instant::now();
            let result = probe.check().await;
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            match result {
                Ok(()) => DependencyCheck {
                    name: name.to_string(),
                    status: CheckStatus::Ok,
                    message: None,
                    duration_ms,
                },
                Err(message) => {
                    debug!(dependency = name, error = %message, "Dependency check failed");
                    DependencyCheck {
                        name: name.to_string(),
                        status: CheckStatus::Error,
                        message: Some(message),
                        duration_ms,
                    }
                }
            }
        }))
        .await;

        ReadinessReport {
            ready: checks.iter().all(DependencyCheck::is_ok),
            checks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::probe::StaticProbe;
    use std::time::Duration;

    fn service(deps: &[&str], probes: Vec<Arc<dyn DependencyProbe>>) -> (HealthService, Arc<ReadinessState>) {
        let readiness = Arc::new(ReadinessState::new());
        let service = HealthService::new(
            Arc::clone(&readiness),
            deps.iter().map(|d| d.to_string()).collect(),
            probes,
        );
        (service, readiness)
    }

    #[test]
    fn readiness_latch_is_one_way() {
        let state = ReadinessState::new();
        assert!(state.is_ready());

        state.set_readiness(false);
        state.set_readiness(true);

        assert!(!state.is_ready());
        assert!(state.is_shutting_down());
    }

    #[test]
    fn setting_true_before_latch_is_allowed() {
        let state = ReadinessState::new();
        state.set_readiness(true);
        assert!(state.is_ready());
        assert!(!state.is_shutting_down());
    }

    #[test]
    fn guard_decrements_on_drop() {
        let tracker = InFlightTracker::new();
        let a = tracker.enter();
        let b = tracker.enter();
        assert_eq!(tracker.count(), 2);

        drop(a);
        assert_eq!(tracker.count(), 1);
        drop(b);
        assert_eq!(tracker.count(), 0);
    }

    #[tokio::test]
    async fn wait_idle_returns_immediately_when_idle() {
        let tracker = InFlightTracker::new();
        tokio::time::timeout(Duration::from_millis(50), tracker.wait_idle())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_last_guard_drops() {
        let tracker = Arc::new(InFlightTracker::new());

        let worker = {
            let tracker = Arc::clone(&tracker);
            let (started_tx, started_rx) = tokio::sync::oneshot::channel();
            let handle = tokio::spawn(async move {
                let _guard = tracker.enter();
                let _ = started_tx.send(());
                tokio::time::sleep(Duration::from_millis(20)).await;
            });
            started_rx.await.unwrap();
            handle
        };

        assert_eq!(tracker.count(), 1);
        tokio::time::timeout(Duration::from_secs(1), tracker.wait_idle())
            .await
            .unwrap();
        worker.await.unwrap();
    }

    #[test]
    fn liveness_is_always_true() {
        let (service, readiness) = service(&[], Vec::new());
        readiness.set_readiness(false);
        assert!(service.check_liveness());
    }

    #[tokio::test]
    async fn readiness_checks_follow_configured_order() {
        let (service, _) = service(
            &["sqlite", "nats"],
            vec![
                Arc::new(StaticProbe::healthy("nats")),
                Arc::new(StaticProbe::healthy("sqlite")),
            ],
        );

        let report = service.check_readiness().await;

        assert!(report.is_ready());
        let names: Vec<_> = report.checks().iter().map(DependencyCheck::name).collect();
        assert_eq!(names, vec!["sqlite", "nats"]);
    }

    #[tokio::test]
    async fn failing_dependency_makes_service_not_ready() {
        let (service, _) = service(
            &["nats"],
            vec![Arc::new(StaticProbe::failing("nats", "connection refused"))],
        );

        let report = service.check_readiness().await;

        assert!(!report.is_ready());
        assert_eq!(report.checks()[0].status(), CheckStatus::Error);
        assert_eq!(report.checks()[0].message(), Some("connection refused"));
    }

    #[tokio::test]
    async fn unknown_dependencies_are_skipped() {
        let (service, _) = service(
            &["nats", "redis"],
            vec![Arc::new(StaticProbe::healthy("nats"))],
        );

        let report = service.check_readiness().await;

        assert!(report.is_ready());
        assert_eq!(report.checks().len(), 1);
    }

    #[tokio::test]
    async fn alias_selects_check_and_keeps_configured_name() {
        let (service, _) = service(
            &["nats", "postgres"],
            vec![
                Arc::new(StaticProbe::failing("nats", "no responders")),
                Arc::new(StaticProbe::healthy("sqlite").with_alias("postgres")),
            ],
        );

        let report = service.check_readiness().await;

        assert!(!report.is_ready());
        let names: Vec<_> = report.checks().iter().map(DependencyCheck::name).collect();
        assert_eq!(names, vec!["nats", "postgres"]);
        assert_eq!(report.checks()[0].status(), CheckStatus::Error);
        assert_eq!(report.checks()[1].status(), CheckStatus::Ok);
    }

    #[tokio::test]
    async fn latched_readiness_skips_dependency_checks() {
        let (service, readiness) = service(&["nats"], vec![Arc::new(StaticProbe::healthy("nats"))]);
        readiness.set_readiness(false);

        let report = service.check_readiness().await;

        assert!(!report.is_ready());
        assert!(report.checks().is_empty());
    }

    #[test]
    fn check_serializes_camel_case_without_empty_message() {
        let check = DependencyCheck {
            name: "nats".into(),
            status: CheckStatus::Ok,
            message: None,
            duration_ms: 3,
        };

        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json, serde_json::json!({ "name": "nats", "status": "ok", "durationMs": 3 }));
    }
}
