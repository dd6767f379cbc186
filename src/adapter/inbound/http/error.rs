//! HTTP error responses.
//!
//! Every failure leaves the gateway as `{statusCode, message, details?}`.
//! Infrastructure errors are logged where they happen and collapse to a
//! generic 500 here.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::error::IngestError;

/// Error response payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    pub status_code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{message}")]
    BadRequest {
        message: String,
        details: Option<Value>,
    },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("Service is shutting down")]
    ShuttingDown,

    #[error("Internal server error")]
    Internal,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            details: None,
        }
    }

    /// A 400 carrying per-field or per-event details.
    pub fn validation(details: impl Serialize) -> Self {
        Self::BadRequest {
            message: "Validation error".to_string(),
            details: serde_json::to_value(details).ok(),
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub fn body(&self) -> ApiErrorBody {
        let details = match self {
            Self::BadRequest { details, .. } => details.clone(),
            _ => None,
        };
        ApiErrorBody {
            status_code: self.status().as_u16(),
            message: self.to_string(),
            details,
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(failure) => Self::validation(failure.violations()),
            IngestError::ShuttingDown => Self::ShuttingDown,
            IngestError::Persistence(_) | IngestError::Publish(_) => Self::Internal,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PersistenceError;

    #[test]
    fn infrastructure_failures_hide_their_cause() {
        let err: ApiError = IngestError::Persistence(PersistenceError::Database("disk I/O".into())).into();

        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            serde_json::to_value(err.body()).unwrap(),
            serde_json::json!({ "statusCode": 500, "message": "Internal server error" })
        );
    }

    #[test]
    fn shutting_down_maps_to_503() {
        let response = ApiError::from(IngestError::ShuttingDown).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn validation_carries_details() {
        let body = ApiError::validation(vec!["a", "b"]).body();
        assert_eq!(body.status_code, 400);
        assert_eq!(body.message, "Validation error");
        assert_eq!(body.details, Some(serde_json::json!(["a", "b"])));
    }
}
