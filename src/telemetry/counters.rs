//! Metric counters emitted through the `metrics` facade.
//!
//! Nothing is exported unless the embedding process installs a recorder.

use metrics::{counter, describe_counter};

use crate::error::FlightError;

/// Register descriptions for every counter this crate emits.
pub fn describe_metrics() {
    describe_counter!("flight_core_logins_total", "Basic logins by outcome");
    describe_counter!("flight_core_actions_total", "Dispatched actions by name and outcome");
    describe_counter!(
        "flight_core_exchange_batches_total",
        "Batches moved by exchange sessions, by direction"
    );
    describe_counter!("flight_core_exchanges_total", "Finished exchange sessions by outcome");
}

/// `outcome` is `accepted` or `rejected`.
pub fn record_login(outcome: &'static str) {
    counter!("flight_core_logins_total", "outcome" => outcome).increment(1);
}

pub fn record_action<T>(action: &str, result: &Result<T, FlightError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(e) => e.code().as_str(),
    };
    counter!(
        "flight_core_actions_total",
        "action" => action.to_string(),
        "outcome" => outcome,
    )
    .increment(1);
}

pub fn record_exchange_batches(direction: &'static str, count: u64) {
    counter!("flight_core_exchange_batches_total", "direction" => direction).increment(count);
}

pub fn record_exchange_outcome<T>(result: &Result<T, FlightError>) {
    let outcome = match result {
        Ok(_) => "completed",
        Err(e) => e.code().as_str(),
    };
    counter!("flight_core_exchanges_total", "outcome" => outcome).increment(1);
}
