//! Liveness and readiness endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::state::HttpState;
use crate::application::health::DependencyCheck;

#[derive(Debug, Serialize)]
struct HealthBody<'a> {
    status: &'static str,
    service: &'a str,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    checks: Option<&'a [DependencyCheck]>,
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn status_of(ok: bool) -> (StatusCode, &'static str) {
    if ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "error")
    }
}

/// `GET /health/liveness` and `/health/live`.
pub async fn liveness(State(state): State<HttpState>) -> Response {
    let (code, status) = status_of(state.health.check_liveness());
    let body = HealthBody {
        status,
        service: &state.service_name,
        timestamp: now(),
        checks: None,
    };
    (code, Json(body)).into_response()
}

/// `GET /health/readiness` and `/health/ready`.
pub async fn readiness(State(state): State<HttpState>) -> Response {
    let report = state.health.check_readiness().await;
    let (code, status) = status_of(report.is_ready());
    let body = HealthBody {
        status,
        service: &state.service_name,
        timestamp: now(),
        checks: Some(report.checks()),
    };
    (code, Json(body)).into_response()
}
