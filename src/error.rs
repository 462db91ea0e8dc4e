//! Client-visible error classes.
//!
//! Every failure that crosses the call boundary is a [`FlightError`]. The
//! variant decides the status code the transport reports; the message is
//! carried through untouched so callers see the original text.

use thiserror::Error;

use crate::auth::AuthError;
use crate::engine::EngineError;

/// Status codes understood by transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Unauthenticated,
    PermissionDenied,
    NotFound,
    InvalidArgument,
    InvalidOperation,
    Unavailable,
    DeadlineExceeded,
    Cancelled,
    Upstream,
    Internal,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found",
            Self::InvalidArgument => "invalid_argument",
            Self::InvalidOperation => "invalid_operation",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Cancelled => "cancelled",
            Self::Upstream => "upstream",
            Self::Internal => "internal",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlightError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    InvalidOperation(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    DeadlineExceeded(String),

    #[error("{0}")]
    Cancelled(String),

    /// Failure reported by the tabular engine, wrapped with call context.
    #[error("{context}: {message}")]
    Upstream { context: String, message: String },

    #[error("{0}")]
    Internal(String),
}

impl FlightError {
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) => StatusCode::Unauthenticated,
            Self::PermissionDenied(_) => StatusCode::PermissionDenied,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::InvalidOperation(_) => StatusCode::InvalidOperation,
            Self::Unavailable(_) => StatusCode::Unavailable,
            Self::DeadlineExceeded(_) => StatusCode::DeadlineExceeded,
            Self::Cancelled(_) => StatusCode::Cancelled,
            Self::Upstream { .. } => StatusCode::Upstream,
            Self::Internal(_) => StatusCode::Internal,
        }
    }

    /// Wrap an engine failure with the operation that triggered it.
    pub fn upstream(context: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Upstream {
            context: context.into(),
            message: err.to_string(),
        }
    }

    /// True for the connectivity classes the startup health-check loop retries.
    pub fn is_retryable_connectivity(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::DeadlineExceeded(_))
    }
}

impl From<AuthError> for FlightError {
    fn from(err: AuthError) -> Self {
        Self::Unauthenticated(err.to_string())
    }
}

impl From<EngineError> for FlightError {
    fn from(err: EngineError) -> Self {
        Self::upstream("error executing query", err)
    }
}

impl From<serde_json::Error> for FlightError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArgument(format!("malformed body: {}", err))
    }
}

impl From<arrow::error::ArrowError> for FlightError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upstream_message_keeps_original_text() {
        let err = FlightError::upstream("error executing query", "table users not found");
        assert_eq!(err.to_string(), "error executing query: table users not found");
        assert_eq!(err.code(), StatusCode::Upstream);
    }

    #[test]
    fn only_connectivity_errors_are_retryable() {
        assert!(FlightError::Unavailable("down".into()).is_retryable_connectivity());
        assert!(FlightError::DeadlineExceeded("slow".into()).is_retryable_connectivity());
        assert!(!FlightError::Unauthenticated("no".into()).is_retryable_connectivity());
        assert!(!FlightError::NotFound("x".into()).is_retryable_connectivity());
    }

    #[test]
    fn auth_errors_become_unauthenticated() {
        let err: FlightError = AuthError::InvalidToken.into();
        assert_eq!(err, FlightError::Unauthenticated("Invalid token".into()));
    }
}
