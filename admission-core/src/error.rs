use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::rate_limiting::RateLimitResource;

#[derive(Clone, Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
#[error(transparent)]
// As long as the struct member is private, we force people to use the `new` method and log the error.
// We arc `ErrorDetails` per the `clippy::result_large_err` lint, as well as to make it cloneable
pub struct Error(Arc<ErrorDetails>);

impl Error {
    pub fn new(details: ErrorDetails) -> Self {
        details.log();
        Error(Arc::new(details))
    }

    pub fn status_code(&self) -> StatusCode {
        self.0.status_code()
    }

    pub fn get_details(&self) -> &ErrorDetails {
        &self.0
    }

    /// Whether the caller may try the same operation again later and expect a different outcome.
    pub fn is_retryable(&self) -> bool {
        self.0.is_retryable()
    }
}

impl From<ErrorDetails> for Error {
    fn from(details: ErrorDetails) -> Self {
        Error::new(details)
    }
}

#[derive(Debug, Error, Serialize)]
#[cfg_attr(test, derive(PartialEq))]
pub enum ErrorDetails {
    #[error("Request `{id}` left the wait queue without being admitted")]
    AdmissionCancelled { id: String },
    #[error("Admission wait for `{id}` exceeded the maximum wait of {waited:?}")]
    AdmissionTimeout { id: String, waited: Duration },
    #[error("Error in configuration: {message}")]
    Config { message: String },
    #[error("Internal error: {message}")]
    InternalError { message: String },
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("Error setting up observability: {message}")]
    Observability { message: String },
    #[error("Route not found: {method} {path}")]
    RouteNotFound { path: String, method: String },
    #[error(
        "Request for {requested} {resource} can never be admitted: the configured limit is {limit} per window"
    )]
    Unsatisfiable {
        resource: RateLimitResource,
        requested: u64,
        limit: u64,
    },
}

impl ErrorDetails {
    /// Defines the error level for logging this error
    fn level(&self) -> tracing::Level {
        match self {
            ErrorDetails::AdmissionCancelled { .. } => tracing::Level::INFO,
            ErrorDetails::AdmissionTimeout { .. } => tracing::Level::WARN,
            ErrorDetails::Config { .. } => tracing::Level::ERROR,
            ErrorDetails::InternalError { .. } => tracing::Level::ERROR,
            ErrorDetails::InvalidArgument { .. } => tracing::Level::WARN,
            ErrorDetails::Observability { .. } => tracing::Level::ERROR,
            ErrorDetails::RouteNotFound { .. } => tracing::Level::WARN,
            ErrorDetails::Unsatisfiable { .. } => tracing::Level::WARN,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorDetails::AdmissionCancelled { .. } => StatusCode::CONFLICT,
            ErrorDetails::AdmissionTimeout { .. } => StatusCode::TOO_MANY_REQUESTS,
            ErrorDetails::Config { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InternalError { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
            ErrorDetails::Observability { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorDetails::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ErrorDetails::Unsatisfiable { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        }
    }

    pub fn log_at_level(&self, prefix: &str, level: tracing::Level) {
        match level {
            tracing::Level::ERROR => tracing::error!("{prefix}{self}"),
            tracing::Level::WARN => tracing::warn!("{prefix}{self}"),
            tracing::Level::INFO => tracing::info!("{prefix}{self}"),
            tracing::Level::DEBUG => tracing::debug!("{prefix}{self}"),
            tracing::Level::TRACE => tracing::trace!("{prefix}{self}"),
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        self.log_at_level("", self.level());
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            // Waiting longer will not make the budget any bigger.
            ErrorDetails::Unsatisfiable { .. } | ErrorDetails::InvalidArgument { .. } => false,
            ErrorDetails::AdmissionTimeout { .. } => true,
            ErrorDetails::AdmissionCancelled { .. }
            | ErrorDetails::Config { .. }
            | ErrorDetails::InternalError { .. }
            | ErrorDetails::Observability { .. }
            | ErrorDetails::RouteNotFound { .. } => false,
        }
    }
}

impl IntoResponse for Error {
    /// Convert the error into an Axum response.
    /// The error was already logged when it was constructed.
    fn into_response(self) -> Response {
        let body = json!({
            "error": self.to_string(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}
