//! Provider error types and handling

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type for provider operations
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Errors that can occur when calling an LLM provider
///
/// Every variant counts against the provider's circuit breaker; the
/// dispatch engine treats them uniformly and moves to the next candidate.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
pub enum ProviderError {
    /// Rate limit exceeded
    #[error("Rate limit exceeded{}", .retry_after.map(|d| format!(", retry after {:?}", d)).unwrap_or_default())]
    RateLimit { retry_after: Option<Duration> },

    /// Request timeout
    #[error("Request timed out after {}ms", .after.as_millis())]
    Timeout { after: Duration },

    /// The caller went away before the provider answered
    #[error("Request cancelled before the provider responded")]
    Cancelled,

    /// Temporary server error (5xx)
    #[error("Server error ({status_code}): {message}")]
    ServerError { status_code: u16, message: String },

    /// Invalid request (4xx)
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    /// Authentication failure
    #[error("Authentication failed")]
    AuthenticationError,

    /// Model not available or unsupported
    #[error("Model '{model}' not available")]
    ModelNotAvailable { model: String },

    /// Generic network error
    #[error("Network error: {message}")]
    NetworkError { message: String },

    /// Response body could not be understood
    #[error("Failed to parse response: {message}")]
    ParseError { message: String },

    /// The client does not implement this operation
    #[error("Operation '{operation}' is not supported by this provider")]
    Unsupported { operation: String },

    /// Provider-specific error
    #[error("Error [{code}]: {message}")]
    Custom { code: String, message: String },
}

impl ProviderError {
    /// Stable machine-readable code, used in streamed error frames
    pub fn code(&self) -> &str {
        match self {
            Self::RateLimit { .. } => "rate_limit",
            Self::Timeout { .. } => "timeout",
            Self::Cancelled => "cancelled",
            Self::ServerError { .. } => "server_error",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::AuthenticationError => "authentication_error",
            Self::ModelNotAvailable { .. } => "model_not_available",
            Self::NetworkError { .. } => "network_error",
            Self::ParseError { .. } => "parse_error",
            Self::Unsupported { .. } => "unsupported",
            Self::Custom { code, .. } => code,
        }
    }

    /// Shorthand for a timeout error
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout { after }
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(err: serde_json::Error) -> Self {
        ProviderError::ParseError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = ProviderError::RateLimit {
            retry_after: Some(Duration::from_secs(5)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded, retry after 5s");

        let err = ProviderError::RateLimit { retry_after: None };
        assert_eq!(err.to_string(), "Rate limit exceeded");

        let err = ProviderError::timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Request timed out after 1500ms");
    }

    #[test]
    fn test_codes() {
        assert_eq!(ProviderError::Cancelled.code(), "cancelled");
        let custom = ProviderError::Custom {
            code: "quota".to_string(),
            message: "out of credits".to_string(),
        };
        assert_eq!(custom.code(), "quota");
    }

    #[test]
    fn test_from_serde_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(ProviderError::from(err), ProviderError::ParseError { .. }));
    }
}
