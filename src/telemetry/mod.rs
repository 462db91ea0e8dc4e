//! Telemetry for flight-core.
//!
//! Structured logging, call spans, security audit events and metric
//! counters. Exporters are left to the embedding process; this module only
//! emits through the `tracing` and `metrics` facades.

mod counters;
mod logging;
pub mod security_log;
mod spans;

pub use counters::{
    describe_metrics, record_action, record_exchange_batches, record_exchange_outcome, record_login,
};
pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{ActionSpan, ExchangeSpan, SpanExt};
