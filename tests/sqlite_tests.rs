mod support;

use std::sync::Arc;

use eventgate::adapter::outbound::broker::MemoryTransport;
use eventgate::domain::Source;
use eventgate::infrastructure::bootstrap;
use eventgate::port::outbound::broker::BrokerTransport;
use eventgate::port::outbound::persistence::EventRepository;
use eventgate::testkit::fixtures;

use support::config_in;

#[tokio::test]
async fn events_and_users_are_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let repository = bootstrap::build_repository(&config.database).unwrap();
    let broker = Arc::new(MemoryTransport::new());
    let gateway = bootstrap::build_with(
        config,
        Arc::clone(&broker) as Arc<dyn BrokerTransport>,
        Arc::clone(&repository) as Arc<dyn EventRepository>,
    );
    broker.connect().await.unwrap();
    gateway.publisher.mark_ready();

    let payload = fixtures::facebook_payload("fb-42");
    let first = gateway.orchestrator.process_event(&payload, None).await.unwrap();
    let second = gateway.orchestrator.process_event(&payload, None).await.unwrap();

    assert!(!first.already_processed);
    assert!(second.already_processed);
    assert_eq!(broker.messages_for("facebook.events.ad.click").len(), 1);

    let row = repository.find_event("fb-42").unwrap().expect("stored event");
    assert_eq!(row.source, "facebook");
    assert_eq!(row.funnel_stage, "bottom");
    assert_eq!(row.campaign_id.as_deref(), Some("camp-1"));
    let user = repository.find_user(Source::Facebook, "fb-u1").unwrap().expect("stored user");
    assert_eq!(user.city.as_deref(), Some("Porto"));
}

#[tokio::test]
async fn full_build_uses_sqlite_and_memory_broker() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.broker.url = "memory://".into();
    config.health.dependencies = vec!["nats".into(), "sqlite".into()];

    let gateway = bootstrap::build(config).unwrap();
    gateway.transport.connect().await.unwrap();

    let report = gateway.health.check_readiness().await;
    assert!(report.is_ready());
    assert_eq!(report.checks().len(), 2);

    gateway.shutdown.shutdown().await.unwrap();
    assert!(gateway.repository.ping().await.is_err());
}
