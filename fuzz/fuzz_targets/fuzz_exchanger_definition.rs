//! Fuzz target for `add-exchange` bodies and schema negotiation.

#![no_main]

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema};
use flight_core::{Exchanger, ExchangerDefinition};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(definition) = serde_json::from_slice::<ExchangerDefinition>(data) else {
        return;
    };
    let Ok(exchanger) = definition.build() else {
        return;
    };
    let input = Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, false),
        Field::new("b", DataType::Int64, false),
    ]));
    let _ = exchanger.output_schema(&input);
});
