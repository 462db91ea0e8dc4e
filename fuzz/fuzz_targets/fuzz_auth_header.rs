//! Fuzz target for authorization header handling.
//!
//! No header value may panic the authenticator or be accepted without a
//! matching password or issued token.

#![no_main]

use flight_core::auth::AUTHORIZATION;
use flight_core::{CallHeaders, Credential, TokenAuthenticator};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = std::str::from_utf8(data) else {
        return;
    };
    let auth = TokenAuthenticator::new([Credential::new("test", "password")]);
    let mut headers = CallHeaders::new();
    headers.insert(AUTHORIZATION, value);
    if let Ok(identity) = auth.start_call(&headers) {
        assert_eq!(identity.username(), "test");
    }
});
