//! Event intake handlers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::error::ApiError;
use super::state::HttpState;
use crate::application::publisher::CORRELATION_HEADER;
use crate::domain::{CorrelationId, FieldViolation};
use crate::error::QueueError;

/// Per-element result of queue-first intake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItemResult {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<FieldViolation>>,
}

fn correlation_id(headers: &HeaderMap) -> CorrelationId {
    CorrelationId::from_header(
        headers
            .get(CORRELATION_HEADER)
            .and_then(|value| value.to_str().ok()),
    )
}

/// Echo the correlation id on every response, errors included.
fn respond(id: &CorrelationId, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Ok(value) = HeaderValue::from_str(id.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))
}

/// `POST /events`: one event object or an array of them.
pub async fn ingest(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let id = correlation_id(&headers);
    let result = ingest_payload(&state, &id, &body).await;
    respond(&id, result)
}

async fn ingest_payload(
    state: &HttpState,
    id: &CorrelationId,
    body: &Bytes,
) -> Result<Response, ApiError> {
    if state.readiness.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }
    let payload = parse_body(body)?;

    match payload {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(ApiError::bad_request("Event batch is empty"));
            }
            let outcome = state.orchestrator.process_batch(&items, Some(id.clone())).await?;
            if !outcome.any_valid() {
                return Err(ApiError::validation(&outcome.results));
            }
            info!(
                correlation_id = %id,
                size = items.len(),
                succeeded = outcome.succeeded(),
                "Webhook batch processed"
            );
            Ok((StatusCode::OK, Json(outcome.results)).into_response())
        }
        single => {
            let outcome = state.orchestrator.process_event(&single, Some(id.clone())).await?;
            info!(correlation_id = %outcome.correlation_id, "Webhook processed successfully");

            let mut body = json!({
                "success": true,
                "correlationId": outcome.correlation_id,
            });
            if outcome.already_processed {
                body["alreadyProcessed"] = Value::Bool(true);
            }
            Ok((StatusCode::OK, Json(body)).into_response())
        }
    }
}

/// `POST /events/queue`: validate and buffer for the dispatcher.
pub async fn enqueue(State(state): State<HttpState>, headers: HeaderMap, body: Bytes) -> Response {
    let id = correlation_id(&headers);
    let result = enqueue_payload(&state, &body).await;
    respond(&id, result)
}

async fn enqueue_item(state: &HttpState, index: usize, payload: &Value) -> QueuedItemResult {
    match state.queue.enqueue(payload).await {
        Ok(event) => {
            state.metrics.increment_accepted(&event);
            QueuedItemResult {
                index,
                event_id: Some(event.event_id().to_string()),
                success: true,
                error: None,
                details: None,
            }
        }
        Err(QueueError::InvalidEvent(failure)) => {
            state.metrics.increment_failed("validation_failed");
            QueuedItemResult {
                index,
                event_id: payload
                    .get("eventId")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                success: false,
                error: Some("Validation error".to_string()),
                details: Some(failure.into_violations()),
            }
        }
        Err(err) => {
            state.metrics.increment_failed("storage_failed");
            warn!(error = %err, "Failed to queue event");
            QueuedItemResult {
                index,
                event_id: None,
                success: false,
                error: Some(err.to_string()),
                details: None,
            }
        }
    }
}

async fn enqueue_payload(state: &HttpState, body: &Bytes) -> Result<Response, ApiError> {
    if state.readiness.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }
    let items = match parse_body(body)? {
        Value::Array(items) => items,
        single => vec![single],
    };
    if items.is_empty() {
        return Err(ApiError::bad_request("Event batch is empty"));
    }

    let mut results = Vec::with_capacity(items.len());
    for (index, payload) in items.iter().enumerate() {
        results.push(enqueue_item(state, index, payload).await);
    }

    if results.iter().all(|r| r.details.is_some()) {
        return Err(ApiError::validation(&results));
    }
    info!(count = results.len(), "Webhook batch queued");
    Ok((StatusCode::ACCEPTED, Json(results)).into_response())
}
