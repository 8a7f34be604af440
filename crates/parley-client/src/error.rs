//! Error types for the client library.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Error body returned by OpenAI-compatible endpoints.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ClientError {
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Middleware error: {0}")]
    MiddlewareError(#[from] reqwest_middleware::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("EventSource error: {0}")]
    EventSourceError(#[from] reqwest_eventsource::Error),

    #[error("Rate limit exceeded: {retry_after:?}")]
    RateLimitError { retry_after: Option<Duration> },

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Request failed with status {status}: {message}")]
    RequestError { status: u16, message: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Tool execution not supported")]
    ToolsNotSupported,

    #[error("Streaming not supported")]
    StreamingNotSupported,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ClientError {
    /// Maps a non-2xx status and its extracted message to an error.
    #[must_use]
    pub fn from_status(status: u16, message: String, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimitError { retry_after },
            500..=599 => Self::ServiceUnavailable(message),
            _ => Self::RequestError { status, message },
        }
    }

    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::MiddlewareError(_)
                | Self::RateLimitError { .. }
                | Self::ServiceUnavailable(_)
        )
    }

    #[must_use]
    pub const fn is_authentication_error(&self) -> bool {
        matches!(self, Self::AuthenticationError(_))
    }

    #[must_use]
    pub const fn is_configuration_error(&self) -> bool {
        matches!(self, Self::ConfigurationError(_))
    }

    /// True for failures of the connection itself rather than an answer
    /// the provider chose to send.
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::NetworkError(_)
                | Self::MiddlewareError(_)
                | Self::EventSourceError(
                    reqwest_eventsource::Error::Transport(_)
                        | reqwest_eventsource::Error::StreamEnded
                )
        )
    }

    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitError { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Pulls the human-readable message out of an error body, falling back to
/// the raw text.
#[must_use]
pub fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body).map_or_else(
        |_| body.trim().to_string(),
        |parsed| parsed.error.message,
    )
}
