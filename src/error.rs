//! # Error Handling
//!
//! This module defines the error types used across the backend and how the HTTP-facing
//! ones are converted to responses.
//!
//! ## Error Families:
//! - **AppError**: returned from HTTP handlers, rendered as JSON error bodies
//! - **ServiceError**: a call to an external collaborator (generation, classification,
//!   synthesis) failed
//! - **PipelineError**: a turn could not be completed (generation failed, a viewer never
//!   acknowledged playback, the pipeline shut down)
//!
//! ## Why plain enums:
//! Each failure the pipeline reacts to is a variant the caller can `match` on. A gate timeout
//! is a value the sequencer inspects, not a panic or an exception unwinding through layers.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the HTTP layer.
///
/// ## Error Categories:
/// - **Internal**: Server-side problems (500 errors)
/// - **BadRequest**: Client sent invalid data (400 errors)
/// - **ConfigError**: Configuration problems (500 errors)
/// - **ValidationError**: Data validation failed (400 errors)
/// - **ServiceUnavailable**: The pipeline is shutting down or a collaborator is down (503 errors)
/// - **Timeout**: No viewer acknowledged playback in time (504 errors)
///
/// ## Usage Example:
/// ```rust,ignore
/// return Err(AppError::BadRequest("text must not be empty".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// User input failed validation rules
    ValidationError(String),

    /// The delivery pipeline cannot take the request right now
    ServiceUnavailable(String),

    /// A speak-and-wait request was abandoned because playback was never confirmed
    Timeout(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Timeout(msg) => write!(f, "Timed out: {}", msg),
        }
    }
}

/// Converts errors into HTTP responses.
///
/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "timeout",
///     "message": "playback of sentence 4 was not confirmed within 30s",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "internal_error",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "bad_request",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,  // 500
                "config_error",
                msg.clone(),
            ),
            AppError::ValidationError(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,  // 400
                "validation_error",
                msg.clone(),
            ),
            AppError::ServiceUnavailable(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,  // 503
                "service_unavailable",
                msg.clone(),
            ),
            AppError::Timeout(msg) => (
                actix_web::http::StatusCode::GATEWAY_TIMEOUT,  // 504
                "timeout",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// When you use `?` with an anyhow::Error inside a handler, it becomes an AppError::Internal.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing errors are almost always due to the client sending malformed data,
/// so they map to 400 rather than 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<::config::ConfigError> for AppError {
    fn from(err: ::config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Turn failures surfaced to HTTP callers (speak-and-wait).
impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::PlaybackTimeout { .. } => AppError::Timeout(err.to_string()),
            PipelineError::Closed | PipelineError::Cancelled => {
                AppError::ServiceUnavailable(err.to_string())
            }
            PipelineError::Generation(_) => AppError::Internal(err.to_string()),
        }
    }
}

/// Type alias for handler results.
pub type AppResult<T> = Result<T, AppError>;

/// Failure of one call to an external collaborator.
#[derive(Debug)]
pub enum ServiceError {
    /// Connection refused, reset, timed out, or the body stream broke
    Transport(String),

    /// The service answered with a non-success status
    Status { code: u16, body: String },

    /// The service answered 2xx but the body was not what we expected
    Decode(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Transport(msg) => write!(f, "transport error: {}", msg),
            ServiceError::Status { code, body } => {
                write!(f, "service returned status {}: {}", code, body)
            }
            ServiceError::Decode(msg) => write!(f, "unexpected response: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ServiceError::Decode(err.to_string())
        } else {
            ServiceError::Transport(err.to_string())
        }
    }
}

/// Why a turn ended without being fully delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The language-generation call failed (before or during streaming)
    Generation(String),

    /// No viewer confirmed playback of the given sentence within the configured timeout
    PlaybackTimeout { sequence: u64 },

    /// A pipeline worker is gone and the channel to it is closed
    Closed,

    /// The pipeline is shutting down
    Cancelled,
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Generation(msg) => write!(f, "generation failed: {}", msg),
            PipelineError::PlaybackTimeout { sequence } => {
                write!(f, "playback of sentence {} was not confirmed in time", sequence)
            }
            PipelineError::Closed => write!(f, "delivery pipeline is not running"),
            PipelineError::Cancelled => write!(f, "delivery pipeline is shutting down"),
        }
    }
}

impl std::error::Error for PipelineError {}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::StatusCode;

    #[test]
    fn test_pipeline_errors_map_to_http_status() {
        let timeout: AppError = PipelineError::PlaybackTimeout { sequence: 3 }.into();
        assert_eq!(timeout.error_response().status(), StatusCode::GATEWAY_TIMEOUT);

        let closed: AppError = PipelineError::Closed.into();
        assert_eq!(closed.error_response().status(), StatusCode::SERVICE_UNAVAILABLE);

        let failed: AppError = PipelineError::Generation("boom".to_string()).into();
        assert_eq!(failed.error_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_service_error_display() {
        let err = ServiceError::Status { code: 502, body: "bad gateway".to_string() };
        assert_eq!(err.to_string(), "service returned status 502: bad gateway");
    }
}
