//! Security audit logging.
//!
//! SECURITY: authentication and authorization outcomes are logged as
//! structured events so rejected logins and token probing stay visible.
//! Callers must pass token fingerprints, never raw tokens or passwords.

/// Security event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Failed password login or malformed credentials.
    AuthFailure,
    /// Bearer token minted after a successful login.
    TokenIssued,
    /// Unknown bearer token presented.
    InvalidToken,
    /// Authenticated caller attempted a privileged operation.
    PermissionDenied,
    /// A handler was installed at runtime from a caller-supplied definition.
    HandlerRegistered,
    /// Shutdown requested by a caller.
    ShutdownRequested,
}

impl SecurityEvent {
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::AuthFailure => SecuritySeverity::Warning,
            Self::TokenIssued => SecuritySeverity::Info,
            Self::InvalidToken => SecuritySeverity::Warning,
            Self::PermissionDenied => SecuritySeverity::Warning,
            Self::HandlerRegistered => SecuritySeverity::Info,
            Self::ShutdownRequested => SecuritySeverity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::TokenIssued => "token_issued",
            Self::InvalidToken => "invalid_token",
            Self::PermissionDenied => "permission_denied",
            Self::HandlerRegistered => "handler_registered",
            Self::ShutdownRequested => "shutdown_requested",
        }
    }
}

/// Severity levels for security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
        }
    }
}

/// Log a security event with structured details.
///
/// ```
/// use flight_core::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::AuthFailure,
///     "Unknown user or invalid password",
///     &[("user", "mallory")],
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let details_str = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");

    let event_type = event.as_str();
    match event.severity() {
        SecuritySeverity::Debug => {
            tracing::debug!(security_event = event_type, details = %details_str, "{}", message)
        }
        SecuritySeverity::Info => {
            tracing::info!(security_event = event_type, details = %details_str, "{}", message)
        }
        SecuritySeverity::Warning => {
            tracing::warn!(security_event = event_type, details = %details_str, "{}", message)
        }
    }
}
