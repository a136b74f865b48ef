//! Error types for LoreForge services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error kinds for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    ParseFailure,

    // Resource errors (4xxx)
    NotFound,

    // Rate limiting (6xxx)
    RateLimited,

    // External service errors (8xxx)
    RemoteUnavailable,
    RemoteBadResponse,

    // Internal errors (9xxx)
    InternalError,
    ConfigMissing,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            ErrorCode::ValidationError => 1001,
            ErrorCode::ParseFailure => 1002,
            ErrorCode::NotFound => 4001,
            ErrorCode::RateLimited => 6001,
            ErrorCode::RemoteUnavailable => 8001,
            ErrorCode::RemoteBadResponse => 8002,
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigMissing => 9002,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// A required configuration value was absent at the point of use
    #[error("Missing configuration: {key}")]
    ConfigMissing { key: String },

    /// A remote dependency timed out or refused the connection
    #[error("{service} unavailable: {message}")]
    RemoteUnavailable { service: String, message: String },

    /// A remote dependency answered with a non-2xx status or a malformed body
    #[error("Bad response from {service}: {message}")]
    RemoteBadResponse { service: String, message: String },

    /// Local or upstream rate limit exceeded
    #[error("Rate limit exceeded for {identifier}")]
    RateLimited { identifier: String },

    /// Bad tool parameters or a bad request body
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        details: Vec<String>,
    },

    /// Malformed Markdown, front matter, or JSON-from-LLM
    #[error("Parse failure: {message}")]
    ParseFailure { message: String },

    /// Unknown tool, command, or resource
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Internal server error
    #[error("Internal error: {message}")]
    Internal { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a validation error without itemized details
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Shorthand for an unavailable remote dependency
    pub fn unavailable(service: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AppError::RemoteUnavailable {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a bad remote response
    pub fn bad_response(service: impl Into<String>, message: impl std::fmt::Display) -> Self {
        AppError::RemoteBadResponse {
            service: service.into(),
            message: message.to_string(),
        }
    }

    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::ConfigMissing { .. } => ErrorCode::ConfigMissing,
            AppError::RemoteUnavailable { .. } => ErrorCode::RemoteUnavailable,
            AppError::RemoteBadResponse { .. } => ErrorCode::RemoteBadResponse,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::ParseFailure { .. } => ErrorCode::ParseFailure,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::Internal { .. } | AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound { .. } => StatusCode::NOT_FOUND,
            AppError::ParseFailure { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::RemoteBadResponse { .. } => StatusCode::BAD_GATEWAY,
            AppError::RemoteUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ConfigMissing { .. } | AppError::Internal { .. } | AppError::Other(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for the API
///
/// Flat shape: `{error, code, details?}`. Tool and search endpoints rely on
/// `details` carrying one entry per offending parameter.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let details = match self {
            AppError::Validation { details, .. } if !details.is_empty() => Some(details),
            _ => None,
        };

        let body = ErrorResponse {
            error: message,
            code,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::RemoteUnavailable {
            service: "cache".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<neo4rs::Error> for AppError {
    fn from(err: neo4rs::Error) -> Self {
        AppError::RemoteUnavailable {
            service: "graph store".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<neo4rs::DeError> for AppError {
    fn from(err: neo4rs::DeError) -> Self {
        AppError::ParseFailure {
            message: format!("graph row: {}", err),
        }
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        let service = err
            .url()
            .and_then(|u| u.host_str().map(|h| h.to_string()))
            .unwrap_or_else(|| "remote".to_string());
        if err.is_timeout() || err.is_connect() {
            AppError::RemoteUnavailable {
                service,
                message: err.to_string(),
            }
        } else {
            AppError::RemoteBadResponse {
                service,
                message: err.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ParseFailure {
            message: err.to_string(),
        }
    }
}
