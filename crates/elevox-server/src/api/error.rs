//! API error types and response handling.
//!
//! Every handler failure becomes an [`ApiError`], which renders as a
//! consistent JSON [`ErrorResponse`].

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use elevox_core::ElevoxError;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Result type alias for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type.
#[derive(Debug, Clone)]
pub enum ApiError {
    /// 404 Not Found - Nothing has been produced yet.
    NotFound {
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },

    /// A core failure, carrying the status and code it maps to.
    Core {
        /// HTTP status for the failure.
        status: StatusCode,
        /// Machine-readable error code.
        error_code: String,
        /// Human-readable error message.
        message: String,
    },
}

impl ApiError {
    /// 404 for a value that has not been produced yet.
    pub fn not_found(error_code: &str, message: impl Into<String>) -> Self {
        Self::NotFound {
            error_code: error_code.to_string(),
            message: message.into(),
        }
    }
}

impl From<ElevoxError> for ApiError {
    fn from(err: ElevoxError) -> Self {
        Self::Core {
            status: StatusCode::from_u16(err.http_status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            error_code: err.error_code().to_ascii_lowercase(),
            message: err.to_string(),
        }
    }
}

/// Standard JSON error response body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "no_reading",
    "message": "No floor has been detected yet",
    "details": null
}))]
pub struct ErrorResponse {
    /// Machine-readable error code (e.g., "no_reading").
    #[schema(example = "no_reading")]
    pub error: String,

    /// Human-readable error message.
    #[schema(example = "No floor has been detected yet")]
    pub message: String,

    /// Optional additional details for debugging.
    #[schema(nullable)]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_response) = match self {
            Self::NotFound {
                error_code,
                message,
            } => (
                StatusCode::NOT_FOUND,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),
            Self::Core {
                status,
                error_code,
                message,
            } => (
                status,
                ErrorResponse {
                    error: error_code,
                    message,
                    details: None,
                },
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { message, .. } => write!(f, "Not Found: {message}"),
            Self::Core {
                status, message, ..
            } => write!(f, "{status}: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

#[cfg(test)]
mod tests {
    use super::*;
    use elevox_core::ScanError;

    #[test]
    fn test_not_found_error() {
        let err = ApiError::not_found("no_reading", "No floor has been detected yet");
        assert!(err.to_string().contains("Not Found"));
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_core_error_keeps_status_and_code() {
        let err = ApiError::from(ElevoxError::from(ScanError::AdapterUnavailable));
        match &err {
            ApiError::Core {
                status, error_code, ..
            } => {
                assert_eq!(*status, StatusCode::SERVICE_UNAVAILABLE);
                assert_eq!(error_code, "adapter_unavailable");
            }
            ApiError::NotFound { .. } => panic!("expected a core error"),
        }
        assert_eq!(
            err.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_error_response_serialization() {
        let response = ErrorResponse {
            error: "no_reading".to_string(),
            message: "No floor has been detected yet".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"error\":\"no_reading\""));
    }
}
