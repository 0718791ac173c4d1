//! Error types for the HTTP layer.
//!
//! Every failure leaves as `{"error": <message>, "code": <machine code>}`.
//! Storage details are logged here and never reach the client.

use axum::extract::rejection::JsonRejection;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

use taskflow_sync::SyncError;

/// Seconds a client should wait before resending after a 503.
const RETRY_AFTER_UNAVAILABLE_SECS: u64 = 1;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Rate limited: {0}")]
    TooManyRequests(String, u64),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Internal server error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn too_many_requests(message: impl Into<String>, retry_after_secs: u64) -> Self {
        Self::TooManyRequests(message.into(), retry_after_secs)
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Gone(_) => "undo_expired",
            Self::TooManyRequests(..) => "rate_limited",
            Self::Unavailable(_) => "retry",
            Self::Internal => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Gone(_) => StatusCode::GONE,
            Self::TooManyRequests(..) => StatusCode::TOO_MANY_REQUESTS,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = match &self {
            Self::TooManyRequests(_, secs) => Some(*secs),
            Self::Unavailable(_) => Some(RETRY_AFTER_UNAVAILABLE_SECS),
            _ => None,
        };
        let status = self.status();
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::InvalidRequest(e) => ApiError::BadRequest(e.to_string()),
            e @ (SyncError::NotFound { .. } | SyncError::UnknownLocalId { .. }) => {
                ApiError::NotFound(e.to_string())
            }
            e @ SyncError::TaskDeleted { .. } => ApiError::Conflict(e.to_string()),
            e @ SyncError::UndoExpired { .. } => ApiError::Gone(e.to_string()),
            e if e.is_retryable() => {
                warn!(error = %e, "Request aborted, client should retry");
                ApiError::Unavailable("storage is busy, resend the request".to_string())
            }
            e => {
                error!(error = %e, "Request failed");
                ApiError::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_db::DbError;

    #[test]
    fn test_sync_errors_map_to_status() {
        let cases = [
            (
                SyncError::UndoExpired {
                    task_id: 1,
                    window_secs: 30,
                },
                StatusCode::GONE,
            ),
            (SyncError::not_found("Undo snapshot", 1), StatusCode::NOT_FOUND),
            (
                SyncError::Database(DbError::Busy("locked".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                SyncError::Database(DbError::Internal("corrupt".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn test_retry_after_header() {
        let response = ApiError::too_many_requests("slow down", 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");

        let response = ApiError::Unavailable("busy".into()).into_response();
        assert!(response.headers().contains_key(header::RETRY_AFTER));
    }

    #[test]
    fn test_internal_error_hides_detail() {
        let err = ApiError::from(SyncError::Internal("secret path /var/db".into()));
        assert_eq!(err.to_string(), "Internal server error");
    }
}
