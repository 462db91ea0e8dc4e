//! Span helpers for action and exchange calls.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Span for one dispatched action.
pub struct ActionSpan;

impl ActionSpan {
    pub fn new(action: &str, user: &str) -> Span {
        info_span!(
            "flight_action",
            action = %action,
            user = %user,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}

/// Span for one exchange session.
pub struct ExchangeSpan;

impl ExchangeSpan {
    /// Fields `writes` and `reads` are filled in when the session finishes.
    pub fn new(session_id: &str, command: &str) -> Span {
        info_span!(
            "exchange_session",
            session_id = %session_id,
            command = %command,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            writes = tracing::field::Empty,
            reads = tracing::field::Empty,
        )
    }
}
