//! Error types for GateClaw
//!
//! This module defines all error types used throughout the engine.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use thiserror::Error;

// ============================================================================
// Provider Error Classification
// ============================================================================

/// Structured inference gateway error classification.
///
/// The engine never retries inference internally; the classification exists
/// so callers can decide whether resubmitting the query makes sense.
#[derive(Debug)]
pub enum ProviderError {
    /// 401: Invalid API key or authentication failure
    Auth(String),
    /// 429: Rate limit or quota exceeded
    RateLimit(String),
    /// 500/502/503/504: Server-side errors
    ServerError(String),
    /// 400: Bad request, invalid JSON, malformed parameters
    InvalidRequest(String),
    /// 404: Model not found or endpoint not available
    ModelNotFound(String),
    /// Connection or read timeout
    Timeout(String),
    /// Catch-all for unrecognized errors
    Unknown(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ProviderError::RateLimit(msg) => write!(f, "Rate limit error: {}", msg),
            ProviderError::ServerError(msg) => write!(f, "Server error: {}", msg),
            ProviderError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ProviderError::ModelNotFound(msg) => write!(f, "Model not found: {}", msg),
            ProviderError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            ProviderError::Unknown(msg) => write!(f, "Unknown provider error: {}", msg),
        }
    }
}

impl ProviderError {
    /// Returns `true` if a later resubmission of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit(_) | ProviderError::ServerError(_) | ProviderError::Timeout(_)
        )
    }

    /// Returns the HTTP status code associated with this error, if applicable.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ProviderError::Auth(_) => Some(401),
            ProviderError::RateLimit(_) => Some(429),
            ProviderError::ServerError(_) => Some(500),
            ProviderError::InvalidRequest(_) => Some(400),
            ProviderError::ModelNotFound(_) => Some(404),
            ProviderError::Timeout(_) | ProviderError::Unknown(_) => None,
        }
    }
}

/// Map an HTTP status code and response body to a [`ProviderError`].
pub fn parse_provider_error(status: u16, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(body.to_string()),
        404 => ProviderError::ModelNotFound(body.to_string()),
        408 => ProviderError::Timeout(body.to_string()),
        429 => ProviderError::RateLimit(body.to_string()),
        400 | 422 => ProviderError::InvalidRequest(body.to_string()),
        500..=599 => ProviderError::ServerError(body.to_string()),
        _ => ProviderError::Unknown(format!("HTTP {}: {}", status, body)),
    }
}

impl From<ProviderError> for GateError {
    fn from(err: ProviderError) -> Self {
        GateError::ProviderTyped(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for GateClaw operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inference gateway failures without an HTTP classification.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Structured inference gateway error.
    #[error("Provider error: {0}")]
    ProviderTyped(ProviderError),

    /// Tool execution errors (invalid parameters, execution failures, etc.)
    #[error("Tool error: {0}")]
    Tool(String),

    /// Session management errors
    #[error("Session error: {0}")]
    Session(String),

    /// A checkpoint exists but cannot be read back.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Resource not found errors
    #[error("Not found: {0}")]
    NotFound(String),

    /// The session is not in a state that allows the requested operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// An approval decision does not match the session's pending action.
    #[error("Approval mismatch: {0}")]
    ApprovalMismatch(String),

    /// Generated tool failed static validation.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Tool registry persistence or loading failures.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Parse or runtime errors from the sandboxed script evaluator.
    #[error("Script error: {0}")]
    Script(String),

    /// External governance authority unreachable or refused to countersign.
    #[error("Governance error: {0}")]
    Governance(String),

    /// Security violations (path traversal, blocked constructs, etc.)
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// I/O errors (file operations, network I/O, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized Result type for GateClaw operations.
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GateError::Config("missing api key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing api key");

        let err = GateError::NotFound("session abc".to_string());
        assert_eq!(err.to_string(), "Not found: session abc");

        let err = GateError::InvalidState("session is COMPLETED".to_string());
        assert_eq!(err.to_string(), "Invalid state: session is COMPLETED");

        let err = GateError::Validation("dynamic evaluation".to_string());
        assert_eq!(err.to_string(), "Validation failed: dynamic evaluation");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: GateError = io_err.into();
        assert!(matches!(err, GateError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ invalid").unwrap_err();
        let err: GateError = json_err.into();
        assert!(matches!(err, GateError::Json(_)));
    }

    #[test]
    fn test_parse_provider_error() {
        assert!(matches!(parse_provider_error(401, "bad key"), ProviderError::Auth(_)));
        assert!(matches!(parse_provider_error(404, "nope"), ProviderError::ModelNotFound(_)));
        assert!(matches!(parse_provider_error(429, "slow"), ProviderError::RateLimit(_)));
        assert!(matches!(parse_provider_error(400, "bad"), ProviderError::InvalidRequest(_)));
        assert!(matches!(parse_provider_error(503, "down"), ProviderError::ServerError(_)));
        assert!(matches!(parse_provider_error(418, "teapot"), ProviderError::Unknown(_)));
    }

    #[test]
    fn test_provider_error_transient() {
        assert!(ProviderError::RateLimit("x".into()).is_transient());
        assert!(ProviderError::ServerError("x".into()).is_transient());
        assert!(ProviderError::Timeout("x".into()).is_transient());
        assert!(!ProviderError::Auth("x".into()).is_transient());
        assert!(!ProviderError::InvalidRequest("x".into()).is_transient());
    }

    #[test]
    fn test_provider_typed_display() {
        let err: GateError = ProviderError::Timeout("30s elapsed".into()).into();
        assert_eq!(err.to_string(), "Provider error: Timeout: 30s elapsed");
        assert_eq!(ProviderError::Auth("k".into()).status_code(), Some(401));
    }
}
