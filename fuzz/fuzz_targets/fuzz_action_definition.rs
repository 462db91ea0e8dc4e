//! Fuzz target for `add-action` bodies.
//!
//! Arbitrary bytes must decode to an error or to a definition whose build
//! never panics.

#![no_main]

use flight_core::ActionDefinition;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(definition) = serde_json::from_slice::<ActionDefinition>(data) {
        let _ = definition.build();
    }
});
