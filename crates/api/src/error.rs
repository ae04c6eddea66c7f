//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::mcp::McpClientError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Server not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),

    // Backend failures on passthrough calls
    #[error("{0}")]
    BadGateway(String),

    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::NotFound => (StatusCode::NOT_FOUND, json!({ "error": self.to_string() })),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, json!({ "error": msg })),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Unhandled request failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": self.to_string(), "message": msg }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<McpClientError> for ApiError {
    fn from(err: McpClientError) -> Self {
        match err {
            McpClientError::NotConnected => ApiError::NotFound,
            other => ApiError::BadGateway(other.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
