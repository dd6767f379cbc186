//! Gateway runtime: background loops, HTTP server and signal handling.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::adapter::inbound::http;
use crate::application::consumer::EventConsumer;
use crate::application::dispatcher::Dispatcher;
use crate::application::publisher::BrokerPublisher;
use crate::application::queue::DurableQueue;
use crate::error::Result;
use crate::infrastructure::bootstrap::{self, Gateway};
use crate::infrastructure::config::service::SubscriptionConfig;
use crate::infrastructure::config::settings::Config;
use crate::port::outbound::broker::BrokerTransport;

/// Flush buffered events every `every` and hand them to the dispatcher.
pub async fn flush_loop(
    queue: Arc<DurableQueue>,
    dispatcher: Arc<Dispatcher>,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = stop.changed() => {
                if result.is_err() || *stop.borrow() {
                    debug!("Flush loop stopping");
                    break;
                }
            }
            _ = interval.tick() => {
                match queue.flush().await {
                    Ok(events) if !events.is_empty() => {
                        let tracked = dispatcher.track(events);
                        debug!(tracked, "Flushed events handed to dispatcher");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "Queue flush failed"),
                }
            }
        }
    }
}

/// Copy the queue file to its backup every `every`.
pub async fn backup_loop(queue: Arc<DurableQueue>, every: Duration, mut stop: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately; there is nothing to back up yet.
    interval.tick().await;

    loop {
        tokio::select! {
            result = stop.changed() => {
                if result.is_err() || *stop.borrow() {
                    debug!("Backup loop stopping");
                    break;
                }
            }
            _ = interval.tick() => {
                if let Err(err) = queue.snapshot().await {
                    warn!(error = %err, "Queue backup failed");
                }
            }
        }
    }
}

/// Once the broker is connected, bind `subscription` and consume it until
/// `stop` turns true.
pub async fn consume_loop(
    transport: Arc<dyn BrokerTransport>,
    publisher: Arc<BrokerPublisher>,
    consumer: Arc<EventConsumer>,
    subscription: SubscriptionConfig,
    mut stop: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = stop.wait_for(|stopped| *stopped) => return,
        () = publisher.wait_ready() => {}
    }

    match transport
        .subscribe(&subscription.subject, &subscription.durable)
        .await
    {
        Ok(deliveries) => consumer.run(deliveries, stop).await,
        Err(err) => error!(
            error = %err,
            subject = %subscription.subject,
            durable = %subscription.durable,
            "Subscription failed"
        ),
    }
}

/// Spawn every background loop of `gateway`.
pub fn spawn_background(gateway: &Gateway) -> Vec<tokio::task::JoinHandle<()>> {
    let stop = gateway.shutdown.stop_signal();
    let config = &gateway.config;

    let mut tasks = vec![
        tokio::spawn(bootstrap::connect_broker(
            Arc::clone(&gateway.transport),
            Arc::clone(&gateway.publisher),
            config.reconnection.clone(),
            stop.clone(),
        )),
        tokio::spawn(flush_loop(
            Arc::clone(&gateway.queue),
            Arc::clone(&gateway.dispatcher),
            config.queue.flush_interval(),
            stop.clone(),
        )),
        tokio::spawn(backup_loop(
            Arc::clone(&gateway.queue),
            config.queue.backup_interval(),
            stop.clone(),
        )),
        tokio::spawn(Arc::clone(&gateway.dispatcher).run(stop.clone())),
    ];

    if config.consumer.enabled {
        for subscription in &config.consumer.subscriptions {
            tasks.push(tokio::spawn(consume_loop(
                Arc::clone(&gateway.transport),
                Arc::clone(&gateway.publisher),
                Arc::clone(&gateway.consumer),
                subscription.clone(),
                stop.clone(),
            )));
        }
    }
    tasks
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

/// Run the gateway until a shutdown signal, then tear it down in order.
///
/// # Errors
///
/// Returns an error if startup fails, the listener cannot bind, the server
/// exits unexpectedly, or the shutdown sequence reports a failure.
pub async fn run(config: Config) -> Result<()> {
    let bind = config.server.bind.clone();
    let gateway = bootstrap::build(config)?;

    let restored = gateway.dispatcher.load().await?;
    info!(restored, "Dispatcher state restored");

    let tasks = spawn_background(&gateway);

    let listener = TcpListener::bind(&bind).await?;
    info!(addr = %bind, service = %gateway.config.service_name, "HTTP server listening");

    let app = http::router(gateway.http_state());
    let stop = gateway.shutdown.stop_signal();
    let mut server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(stopped(stop))
            .await
    });

    let mut server_result = None;
    tokio::select! {
        () = shutdown_signal() => info!("Shutdown signal received"),
        joined = &mut server => {
            error!("HTTP server exited before shutdown");
            server_result = Some(joined);
        }
    }

    let shutdown_result = gateway.shutdown.shutdown().await;

    let server_result = match server_result {
        Some(joined) => joined,
        None => server.await,
    };
    join_all(tasks).await;

    match server_result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err.into()),
        Err(err) => return Err(std::io::Error::other(err).into()),
    }
    shutdown_result?;

    info!("eventgate stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::fixtures;

    #[tokio::test]
    async fn flush_loop_tracks_flushed_events_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.queue.path = dir.path().join("q.jsonl").display().to_string();
        config.queue.backup_path = dir.path().join("b.jsonl").display().to_string();
        let gateway = bootstrap::build_with(
            config,
            Arc::new(crate::testkit::transport::ScriptedTransport::new()),
            Arc::new(crate::testkit::repository::ScriptedRepository::new()),
        );
        gateway.queue.enqueue_event(fixtures::tiktok_event("a")).await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(flush_loop(
            Arc::clone(&gateway.queue),
            Arc::clone(&gateway.dispatcher),
            Duration::from_millis(20),
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(gateway.dispatcher.tracked(), 1);
        assert_eq!(gateway.queue.pending_len(), 0);

        stop_tx.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn consume_loop_waits_for_broker_then_settles_deliveries() {
        use crate::adapter::outbound::broker::{MemoryTransport, Settlement};
        use crate::application::consumer::LoggingHandler;
        use crate::application::publisher::RetryPolicy;
        use crate::port::outbound::broker::BrokerMessage;

        let memory = Arc::new(MemoryTransport::new());
        let transport: Arc<dyn BrokerTransport> = memory.clone();
        let publisher = Arc::new(BrokerPublisher::new(Arc::clone(&transport), RetryPolicy::default()));
        let consumer = Arc::new(EventConsumer::new(Arc::new(LoggingHandler)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(consume_loop(
            transport,
            Arc::clone(&publisher),
            consumer,
            SubscriptionConfig {
                subject: "tiktok.events.>".into(),
                durable: "audit".into(),
            },
            stop_rx,
        ));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        publisher.mark_ready();
        tokio::time::sleep(Duration::from_millis(20)).await;

        memory
            .publish(&BrokerMessage {
                subject: "tiktok.events.video.view".into(),
                headers: Vec::new(),
                payload: br#"{"eventType":"video.view","source":"tiktok"}"#.to_vec(),
            })
            .await
            .unwrap();
        while memory.settlements().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(memory.settlements()[0].1, Settlement::Ack);

        stop_tx.send_replace(true);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn consume_loop_exits_when_stopped_before_ready() {
        let transport: Arc<dyn BrokerTransport> =
            Arc::new(crate::adapter::outbound::broker::MemoryTransport::new());
        let publisher = Arc::new(BrokerPublisher::new(
            Arc::clone(&transport),
            crate::application::publisher::RetryPolicy::default(),
        ));
        let consumer = Arc::new(EventConsumer::new(Arc::new(
            crate::application::consumer::LoggingHandler,
        )));
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(consume_loop(
            transport,
            publisher,
            consumer,
            SubscriptionConfig {
                subject: "gateway.events.>".into(),
                durable: "audit".into(),
            },
            stop_rx,
        ));

        stop_tx.send_replace(true);
        handle.await.unwrap();
    }
}
