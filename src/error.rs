//! Error taxonomy for the scraping engine.
//!
//! Every failure that can cross a component boundary is classified into one
//! of the variants below. The classification drives both retry behavior
//! (see [`EngineError::retry_class`]) and the HTTP status the Control API
//! maps it to (see [`EngineError::status_code`]).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// How a failed operation should be treated by a caller deciding whether to
/// retry it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Safe to retry with backoff (timeouts, connection resets, 429/5xx).
    Retryable,
    /// Retrying will not help; the caller should fail fast.
    Fatal,
}

/// The crate-wide error type.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Timeouts, connection resets, DNS failures, 429/5xx responses.
    #[error("transient network error: {0}")]
    Transient(String),

    /// Selector missed, malformed HTML/JSON/RSS.
    #[error("parse error: {0}")]
    Parse(String),

    /// Bad API payload, bad cron expression, bad URL.
    #[error("validation error: {0}")]
    Validation(String),

    /// Compare-and-set failure, duplicate unique key.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing or invalid bearer token.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A required downstream dependency (store, fetcher subsystem) is down.
    #[error("dependency unavailable: {0}")]
    DependencyDown(String),

    /// Anything unexpected. Logged with full detail; never shown to callers.
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Classifies this error for retry purposes.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            EngineError::Transient(_) => RetryClass::Retryable,
            _ => RetryClass::Fatal,
        }
    }

    /// The machine-readable error code surfaced on the API boundary.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Transient(_) => "transient",
            EngineError::Parse(_) => "parse_error",
            EngineError::Validation(_) => "validation_error",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::DependencyDown(_) => "dependency_down",
            EngineError::Internal(_) => "internal_error",
        }
    }

    /// The HTTP status this error maps to on the Control API.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::Conflict(_) => StatusCode::CONFLICT,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            EngineError::DependencyDown(_) => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Creates a validation error.
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Creates a not-found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a conflict error.
    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    /// Creates a transient error.
    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }

    /// Creates an internal error, logging the full detail at the call site
    /// is the caller's responsibility.
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            EngineError::Transient(err.to_string())
        } else {
            EngineError::Internal(err.to_string())
        }
    }
}

impl From<reqwest_middleware::Error> for EngineError {
    fn from(err: reqwest_middleware::Error) -> Self {
        EngineError::Transient(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Parse(err.to_string())
    }
}

impl From<url::ParseError> for EngineError {
    fn from(err: url::ParseError) -> Self {
        EngineError::Validation(err.to_string())
    }
}

/// JSON body shape for every error response on the Control API.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
    correlation_id: Option<String>,
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        if matches!(self, EngineError::Internal(_)) {
            tracing::error!(error = %self, "internal error");
        }
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            correlation_id: crate::api::middleware::current_correlation_id(),
        };
        (self.status_code(), axum::Json(body)).into_response()
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => EngineError::NotFound("row not found".to_string()),
            other => EngineError::DependencyDown(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_is_retryable() {
        assert_eq!(
            EngineError::transient("timeout").retry_class(),
            RetryClass::Retryable
        );
    }

    #[test]
    fn validation_is_fatal_and_maps_to_400() {
        let err = EngineError::validation("bad cron");
        assert_eq!(err.retry_class(), RetryClass::Fatal);
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn conflict_maps_to_409() {
        assert_eq!(
            EngineError::conflict("duplicate").status_code(),
            StatusCode::CONFLICT
        );
    }
}
