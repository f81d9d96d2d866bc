//! # Error Handling
//!
//! `AppError` is the error type every HTTP handler returns. It converts itself
//! into a JSON response with a consistent shape:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "not_found",
//!     "message": "Recording 3f0c... not found",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! Domain errors (`SubmitError`, `StoreError`, multipart errors) convert into
//! `AppError` via `From`, so handlers can use `?` throughout.
//!
//! ## Key Rust Concepts for Error Handling:
//!
//! ### Two layers of error types
//! - **Domain errors** (`QueueError`, `StoreError`, `SubmitError`) derive
//!   `thiserror::Error` and know nothing about HTTP
//! - **AppError** is the HTTP edge: it picks a status code and a JSON body
//!
//! ### Traits for Error Conversion
//! - **From trait**: lets `?` turn a domain error into an `AppError`
//! - **ResponseError trait**: actix calls it to render the error response
//! - **Display trait**: the human-readable form used in logs

use crate::queue::QueueError;                   // Full queue -> 503
use crate::recording::service::SubmitError;
use crate::recording::store::StoreError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};  // Web framework error handling
use serde_json::json;                          // For creating JSON error responses
use std::fmt;                                  // For implementing Display trait

/// Errors returned by HTTP handlers.
///
/// ## Error Categories:
/// - **Internal**: storage or I/O failure (500)
/// - **BadRequest**: malformed upload or input (400)
/// - **NotFound**: missing, or owned by someone else (404)
/// - **Unauthorized**: no owner identity on the request (401)
/// - **Unavailable**: queue at capacity (503)
///
/// ## Usage Example:
/// ```ignore
/// return Err(AppError::BadRequest("Recording is empty".to_string()));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Server-side failures (storage, I/O)
    Internal(String),

    /// Client sent invalid or malformed data
    BadRequest(String),

    /// Requested resource does not exist or is not visible to the caller
    NotFound(String),

    /// No authenticated principal on the request
    Unauthorized(String),

    /// The service cannot take more work right now
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

impl AppError {
    /// Status code, machine-readable `type`, and message for one variant.
    fn parts(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.as_str()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg.as_str()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.as_str()),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.parts().0
    }

    /// Render `{"error": {"type", "message", "timestamp"}}`.
    ///
    /// ## Rust Concepts:
    /// - **Tuple destructuring**: `let (a, b, c) = ...` unpacks `parts()`
    /// - **json! macro**: builds a `serde_json::Value` inline
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.parts();

        // 4xx are the client's problem; only log our own failures
        if status.is_server_error() {
            tracing::error!(error_type, detail = message, "Request failed");
        }

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// A full queue maps to 503; every other submit failure is ours (500).
impl From<SubmitError> for AppError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Queue(QueueError::Full { .. }) => AppError::Unavailable(err.to_string()),
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl From<actix_multipart::MultipartError> for AppError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        AppError::BadRequest(format!("Invalid multipart upload: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
