#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use eventgate::adapter::inbound::http;
use eventgate::infrastructure::bootstrap::{self, Gateway};
use eventgate::infrastructure::config::Config;
use eventgate::port::outbound::broker::BrokerTransport;
use eventgate::port::outbound::persistence::EventRepository;
use eventgate::testkit::repository::ScriptedRepository;
use eventgate::testkit::transport::ScriptedTransport;

/// Configuration with every file path inside `dir`.
pub fn config_in(dir: &Path) -> Config {
    let mut config = Config::default();
    config.queue.path = dir.join("events.jsonl").display().to_string();
    config.queue.backup_path = dir.join("events_backup.jsonl").display().to_string();
    config.dead_letter.path = dir.join("dead_letter.jsonl").display().to_string();
    config.database = dir.join("events.db").display().to_string();
    config
}

/// A wired gateway around scripted adapters with its broker already connected.
pub struct TestGateway {
    pub gateway: Gateway,
    pub transport: Arc<ScriptedTransport>,
    pub repository: Arc<ScriptedRepository>,
    pub router: Router,
    pub dir: TempDir,
}

pub fn gateway(transport: ScriptedTransport, repository: ScriptedRepository) -> TestGateway {
    gateway_with(transport, repository, |_| {})
}

pub fn gateway_with(
    transport: ScriptedTransport,
    repository: ScriptedRepository,
    tweak: impl FnOnce(&mut Config),
) -> TestGateway {
    let t = assemble(transport, repository, tweak);
    t.gateway.publisher.mark_ready();
    t
}

/// Like [`gateway_with`], but the broker never reports connected, so every
/// publish parks on the readiness gate.
pub fn gateway_offline(
    transport: ScriptedTransport,
    repository: ScriptedRepository,
    tweak: impl FnOnce(&mut Config),
) -> TestGateway {
    assemble(transport, repository, tweak)
}

fn assemble(
    transport: ScriptedTransport,
    repository: ScriptedRepository,
    tweak: impl FnOnce(&mut Config),
) -> TestGateway {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    tweak(&mut config);

    let transport = Arc::new(transport);
    let repository = Arc::new(repository);
    let gateway = bootstrap::build_with(
        config,
        Arc::clone(&transport) as Arc<dyn BrokerTransport>,
        Arc::clone(&repository) as Arc<dyn EventRepository>,
    );
    let router = http::router(gateway.http_state());

    TestGateway {
        gateway,
        transport,
        repository,
        router,
        dir,
    }
}

pub struct Reply {
    pub status: StatusCode,
    pub correlation_id: Option<String>,
    pub body: Value,
}

async fn send(router: &Router, request: Request<Body>) -> Reply {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let correlation_id = response
        .headers()
        .get("x-correlation-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    Reply {
        status,
        correlation_id,
        body,
    }
}

pub async fn post_json(router: &Router, uri: &str, body: &Value, correlation: Option<&str>) -> Reply {
    post_raw(router, uri, body.to_string(), correlation).await
}

pub async fn post_raw(router: &Router, uri: &str, body: String, correlation: Option<&str>) -> Reply {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(id) = correlation {
        builder = builder.header("x-correlation-id", id);
    }
    send(router, builder.body(Body::from(body)).unwrap()).await
}

pub async fn get(router: &Router, uri: &str) -> Reply {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    send(router, request).await
}
