//! Mapping of application errors to HTTP responses

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{error, warn};

use crate::core::error_handling::{classify, ErrorCategory};
use crate::core::models::{AppError, ErrorResponse};

/// Status code and client-facing message for an error
pub fn status_and_message(err: &AppError) -> (StatusCode, String) {
    let category = classify(err);
    let status = match (err, category) {
        (AppError::Parse(_), _) => StatusCode::INTERNAL_SERVER_ERROR,
        (AppError::Io(_), _) | (AppError::Download(_), _) => StatusCode::INTERNAL_SERVER_ERROR,
        (_, ErrorCategory::Configuration) => StatusCode::BAD_REQUEST,
        (_, ErrorCategory::Unsupported) | (_, ErrorCategory::Extractor) => StatusCode::BAD_REQUEST,
        (_, ErrorCategory::Unavailable) => StatusCode::NOT_FOUND,
        (_, ErrorCategory::RateLimited) => StatusCode::TOO_MANY_REQUESTS,
        (_, ErrorCategory::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        (_, ErrorCategory::Tool) => StatusCode::SERVICE_UNAVAILABLE,
        (_, ErrorCategory::Network) | (_, ErrorCategory::Parse) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };

    let message = match err {
        AppError::Parse(_) => "Failed to parse video information".to_string(),
        AppError::InvalidRequest(message) => message.clone(),
        other => other.to_string(),
    };

    (status, message)
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = status_and_message(&self);
        if status.is_server_error() {
            error!("Request failed with {}: {}", status, self);
        } else {
            warn!("Request rejected with {}: {}", status, self);
        }

        let details = match &self {
            AppError::Parse(detail) => Some(detail.clone()),
            _ => None,
        };

        let body = ErrorResponse {
            error: message,
            details,
            platform: None,
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidRequest(rejection.body_text())
    }
}
