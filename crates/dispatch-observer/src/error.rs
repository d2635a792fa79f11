//! Error types for the Observer API server.
//!
//! [`ObserverError`] unifies all failure modes into a single enum that
//! can be converted into an Axum HTTP response via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dispatch_core::DispatchError;

/// Errors that can occur in the Observer API layer.
#[derive(Debug, thiserror::Error)]
pub enum ObserverError {
    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An invalid query parameter was provided.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A UUID could not be parsed from the request path.
    #[error("invalid UUID: {0}")]
    InvalidUuid(String),

    /// The request body failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The request conflicts with the record's current state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backing store did not answer in time.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<DispatchError> for ObserverError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound(key) => Self::NotFound(key.to_string()),
            DispatchError::Validation(msg) => Self::Validation(msg),
            DispatchError::StoreUnavailable(msg) => Self::Unavailable(msg),
            e @ (DispatchError::InvalidTransition(_)
            | DispatchError::NotPending { .. }
            | DispatchError::AmbulanceNotAvailable { .. }
            | DispatchError::AmbulanceInUse { .. }
            | DispatchError::AssignmentFailed { .. }
            | DispatchError::Contended { .. }) => Self::Conflict(e.to_string()),
            e if e.is_conflict() => Self::Conflict(e.to_string()),
            e @ DispatchError::Store(_) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for ObserverError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::Serialization(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("JSON error: {e}"))
            }
            Self::InvalidQuery(msg) | Self::InvalidUuid(msg) | Self::Validation(msg) => {
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %message, "Request failed");
        }

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
