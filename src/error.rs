//! # Error Handling
//!
//! Custom error types and their conversion to HTTP responses.
//!
//! ## Error Categories:
//! - **Internal**: Server-side problems (500 errors)
//! - **BadRequest**: Client sent invalid data (400 errors)
//! - **PayloadTooLarge**: Upload exceeded the size limit (413 errors)
//! - **UnsupportedMedia**: Upload is not audio (415 errors)
//! - **Upstream**: The transcription provider reported a failure; the upstream
//!   HTTP status is carried through when known
//! - **Timeout**: A batch job never reached a terminal state within the poll budget
//! - **ConfigError**: Configuration problems (500 errors)
//!
//! All batch-path failures are converted into an HTTP error response with a
//! `{error, details}` body; nothing is allowed to crash the owning process.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Uploaded file exceeded the size limit
    PayloadTooLarge(String),

    /// Uploaded file is not an audio content type
    UnsupportedMedia(String),

    /// The upstream provider reported a failure. Carries the upstream HTTP
    /// status when available so it can be passed through to the caller.
    Upstream {
        status: u16,
        message: String,
        details: String,
    },

    /// A batch job did not reach done/rejected within the poll budget
    Timeout(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::UnsupportedMedia(msg) => write!(f, "Unsupported media type: {}", msg),
            AppError::Upstream { status, message, details } => {
                write!(f, "Upstream error ({}): {} - {}", status, message, details)
            }
            AppError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedMedia(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::Upstream { status, .. } => {
                // Pass the upstream status through when it is a valid code,
                // otherwise fall back to 500.
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            AppError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error, details) = match self {
            AppError::Internal(msg) => ("Internal server error".to_string(), msg.clone()),
            AppError::BadRequest(msg) => ("Bad request".to_string(), msg.clone()),
            AppError::PayloadTooLarge(msg) => ("Payload too large".to_string(), msg.clone()),
            AppError::UnsupportedMedia(msg) => ("Unsupported media type".to_string(), msg.clone()),
            AppError::Upstream { message, details, .. } => (message.clone(), details.clone()),
            AppError::Timeout(msg) => ("Transcription timed out".to_string(), msg.clone()),
            AppError::ConfigError(msg) => ("Configuration error".to_string(), msg.clone()),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": error,
            "details": details,
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Multipart decoding problems are the client's fault.
impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart payload: {}", err))
    }
}

/// Outbound HTTP failures carry the upstream status when one was received.
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AppError::Upstream {
                status: status.as_u16(),
                message: "Upstream request failed".to_string(),
                details: err.to_string(),
            },
            None => AppError::Internal(format!("Upstream request failed: {}", err)),
        }
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_passes_status_through() {
        let err = AppError::Upstream {
            status: 403,
            message: "Forbidden".to_string(),
            details: "bad key".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_invalid_upstream_status_falls_back_to_500() {
        let err = AppError::Upstream {
            status: 42,
            message: "weird".to_string(),
            details: String::new(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = AppError::Timeout("job never completed".to_string());
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }
}
