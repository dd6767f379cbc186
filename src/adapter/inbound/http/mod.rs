//! HTTP intake and health surface.

pub mod error;
pub mod events;
pub mod health;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::http::Uri;
use axum::routing::{get, post};
use axum::Router;

pub use error::{ApiError, ApiErrorBody};
pub use state::HttpState;

/// Largest accepted request body.
pub const BODY_LIMIT: usize = 10 * 1024 * 1024;

/// Build the gateway router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/events", post(events::ingest))
        .route("/events/queue", post(events::enqueue))
        .route("/health/liveness", get(health::liveness))
        .route("/health/live", get(health::liveness))
        .route("/health/readiness", get(health::readiness))
        .route("/health/ready", get(health::readiness))
        .fallback(not_found)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound {
        path: uri.path().to_string(),
    }
}
