//! Infrastructure bootstrap helpers for runtime wiring.
//!
//! [`build`] is the composition root: it turns a validated [`Config`] into a
//! [`Gateway`] holding every shared component. [`build_with`] takes the two
//! external adapters ready-made so tests can substitute doubles.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapter::inbound::http::HttpState;
use crate::adapter::outbound::broker::{BrokerProbe, MemoryTransport, NatsTransport};
use crate::adapter::outbound::sqlite::database::connection::{create_pool, run_migrations};
use crate::adapter::outbound::sqlite::{DatabaseProbe, SqliteEventRepository};
use crate::application::consumer::{EventConsumer, LoggingHandler};
use crate::application::dead_letter::DeadLetterSink;
use crate::application::dispatcher::{DispatchPolicy, Dispatcher};
use crate::application::health::{HealthService, InFlightTracker, ReadinessState};
use crate::application::ingest::{BatchPolicy, IngestionOrchestrator};
use crate::application::metrics::GatewayMetrics;
use crate::application::publisher::{BrokerPublisher, RetryPolicy};
use crate::application::queue::DurableQueue;
use crate::application::shutdown::ShutdownCoordinator;
use crate::error::Result;
use crate::infrastructure::config::pool::ReconnectionConfig;
use crate::infrastructure::config::service::BrokerConfig;
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::broker::BrokerTransport;
use crate::port::outbound::health::DependencyProbe;
use crate::port::outbound::persistence::EventRepository;

/// Every long-lived component of a running gateway.
pub struct Gateway {
    pub config: Config,
    pub metrics: Arc<GatewayMetrics>,
    pub readiness: Arc<ReadinessState>,
    pub in_flight: Arc<InFlightTracker>,
    pub transport: Arc<dyn BrokerTransport>,
    pub publisher: Arc<BrokerPublisher>,
    pub repository: Arc<dyn EventRepository>,
    pub queue: Arc<DurableQueue>,
    pub dead_letters: Arc<DeadLetterSink>,
    pub dispatcher: Arc<Dispatcher>,
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub health: Arc<HealthService>,
    pub consumer: Arc<EventConsumer>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl Gateway {
    /// State for the HTTP router.
    #[must_use]
    pub fn http_state(&self) -> HttpState {
        HttpState {
            orchestrator: Arc::clone(&self.orchestrator),
            queue: Arc::clone(&self.queue),
            health: Arc::clone(&self.health),
            readiness: Arc::clone(&self.readiness),
            metrics: Arc::clone(&self.metrics),
            service_name: Arc::from(self.config.service_name.as_str()),
        }
    }
}

/// Select the broker transport for `config.url`. Does not connect.
///
/// # Errors
/// Returns an error if the broker URL is unusable.
pub fn build_transport(config: &BrokerConfig) -> Result<Arc<dyn BrokerTransport>> {
    if config.is_memory() {
        info!("Using in-process memory broker");
        return Ok(Arc::new(MemoryTransport::new()));
    }
    let transport = NatsTransport::new(&config.url, &config.client_name, config.request_timeout())?
        .with_streams(config.streams.clone(), config.ensure_streams);
    Ok(Arc::new(transport))
}

/// Open the SQLite database, creating its directory and running migrations.
///
/// # Errors
/// Returns an error if the directory, pool or migrations fail.
pub fn build_repository(database: &str) -> Result<Arc<SqliteEventRepository>> {
    let path = database.strip_prefix("sqlite://").unwrap_or(database);
    if let Some(parent) = Path::new(path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)?;
    }

    let pool = create_pool(path)?;
    run_migrations(&pool)?;
    info!(database = %path, "Database ready");
    Ok(Arc::new(SqliteEventRepository::new(pool)))
}

/// Build a gateway from configuration using the real adapters.
///
/// # Errors
/// Returns an error if the broker URL or the database cannot be set up.
pub fn build(config: Config) -> Result<Gateway> {
    let transport = build_transport(&config.broker)?;
    let repository: Arc<dyn EventRepository> = build_repository(&config.database)?;
    Ok(build_with(config, transport, repository))
}

/// Wire every component around the given adapters.
#[must_use]
pub fn build_with(
    config: Config,
    transport: Arc<dyn BrokerTransport>,
    repository: Arc<dyn EventRepository>,
) -> Gateway {
    let metrics = Arc::new(GatewayMetrics::new());
    let readiness = Arc::new(ReadinessState::new());
    let in_flight = Arc::new(InFlightTracker::new());

    let publisher = Arc::new(BrokerPublisher::new(
        Arc::clone(&transport),
        RetryPolicy::from(&config.publisher),
    ));
    let queue = Arc::new(DurableQueue::new(
        &config.queue.path,
        &config.queue.backup_path,
        Arc::clone(&metrics),
    ));
    let dead_letters = Arc::new(DeadLetterSink::new(
        &config.dead_letter.path,
        Arc::clone(&metrics),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&queue),
        Arc::clone(&publisher),
        Arc::clone(&metrics),
        config.dispatcher.base_topic.clone(),
        DispatchPolicy::from(&config.dispatcher),
    ));

    let orchestrator = Arc::new(
        IngestionOrchestrator::new(
            Arc::clone(&repository),
            Arc::clone(&publisher),
            Arc::clone(&readiness),
            Arc::clone(&in_flight),
            Arc::clone(&metrics),
        )
        .with_queue(Arc::clone(&queue))
        .with_dead_letters(Arc::clone(&dead_letters))
        .with_batch_policy(BatchPolicy::from(&config.batch)),
    );

    let probes: Vec<Arc<dyn DependencyProbe>> = vec![
        Arc::new(BrokerProbe::new(Arc::clone(&transport))),
        Arc::new(DatabaseProbe::new(Arc::clone(&repository))),
    ];
    let health = Arc::new(HealthService::new(
        Arc::clone(&readiness),
        config.health.dependencies.clone(),
        probes,
    ));

    let consumer = Arc::new(EventConsumer::new(Arc::new(LoggingHandler)));

    let mut shutdown = ShutdownCoordinator::new(
        Arc::clone(&readiness),
        Arc::clone(&in_flight),
        Arc::clone(&repository),
        Arc::clone(&publisher),
    )
    .with_queue(Arc::clone(&queue));
    if let Some(timeout) = config.shutdown.drain_timeout() {
        shutdown = shutdown.with_drain_timeout(timeout);
    }

    Gateway {
        config,
        metrics,
        readiness,
        in_flight,
        transport,
        publisher,
        repository,
        queue,
        dead_letters,
        dispatcher,
        orchestrator,
        health,
        consumer,
        shutdown: Arc::new(shutdown),
    }
}

/// Connect the broker with backoff, then open the publisher gate.
///
/// Gives up only when `stop` flips; publishes wait on the gate meanwhile.
pub async fn connect_broker(
    transport: Arc<dyn BrokerTransport>,
    publisher: Arc<BrokerPublisher>,
    backoff: ReconnectionConfig,
    mut stop: watch::Receiver<bool>,
) {
    let mut failures: u32 = 0;
    loop {
        match transport.connect().await {
            Ok(()) => {
                info!(
                    transport = transport.name(),
                    attempts = failures + 1,
                    "Broker connected"
                );
                publisher.mark_ready();
                return;
            }
            Err(err) => {
                let delay = backoff.delay_after(failures);
                failures = failures.saturating_add(1);
                warn!(
                    error = %err,
                    retryable = err.is_retryable(),
                    attempt = failures,
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    "Broker connection failed"
                );
                tokio::select! {
                    result = stop.changed() => {
                        if result.is_err() || *stop.borrow() {
                            info!("Broker connect loop stopped");
                            return;
                        }
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
}
