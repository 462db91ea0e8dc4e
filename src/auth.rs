//! Password login and bearer-token validation.
//!
//! SECURITY: the full password check runs once per connection. A successful
//! `Basic` login mints a random bearer token; every later call presents the
//! token instead of the password. Tokens are never logged, only their
//! fingerprints.

use std::collections::HashMap;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::telemetry::{self, SecurityEvent};

/// Header carrying `Basic` credentials or a `Bearer` token.
pub const AUTHORIZATION: &str = "authorization";

const TOKEN_BYTES: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("No credentials supplied")]
    NoCredentials,

    #[error("Unknown user or invalid password")]
    InvalidPassword,

    #[error("Malformed basic credentials")]
    Malformed,

    #[error("Invalid token")]
    InvalidToken,
}

/// Call metadata. Names are compared case-insensitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallHeaders {
    entries: Vec<(String, String)>,
}

impl CallHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a header, replacing any existing value under the same name.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        self.entries.retain(|(k, _)| *k != name);
        self.entries.push((name, value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn authorization(&self) -> Option<&str> {
        self.get(AUTHORIZATION)
    }

    pub fn with_basic(credential: &Credential) -> Self {
        let mut headers = Self::new();
        headers.insert(AUTHORIZATION, credential.basic_header_value());
        headers
    }

    pub fn with_bearer(token: &str) -> Self {
        let mut headers = Self::new();
        headers.insert(AUTHORIZATION, format!("Bearer {}", token));
        headers
    }

    /// Token from a `Bearer` authorization header, if present.
    pub fn bearer_token(&self) -> Option<&str> {
        let (scheme, value) = split_scheme(self.authorization()?);
        (scheme == "Bearer" && !value.is_empty()).then_some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Username/password pair supplied at connect time.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// `Basic <base64(username:password)>`
    pub fn basic_header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque bearer token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Token(String);

impl Token {
    fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short digest safe to put in logs.
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.0)
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({})", self.fingerprint())
    }
}

/// Authenticated caller for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIdentity {
    username: String,
    token: Token,
}

impl CallIdentity {
    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn token(&self) -> &Token {
        &self.token
    }

    /// Headers the transport sends back so the client can switch to the token.
    pub fn response_headers(&self) -> CallHeaders {
        CallHeaders::with_bearer(self.token.as_str())
    }
}

/// Validates initial credentials and the bearer tokens minted from them.
pub struct TokenAuthenticator {
    password_hashes: HashMap<String, [u8; 32]>,
    // Grows for the process lifetime; no expiry or revocation.
    tokens: DashMap<Token, String>,
}

impl TokenAuthenticator {
    pub fn new(credentials: impl IntoIterator<Item = Credential>) -> Self {
        let password_hashes = credentials
            .into_iter()
            .map(|c| (c.username, digest(c.password.as_bytes())))
            .collect();

        Self {
            password_hashes,
            tokens: DashMap::new(),
        }
    }

    /// Authenticate the start of a call from its headers.
    pub fn start_call(&self, headers: &CallHeaders) -> Result<CallIdentity, AuthError> {
        let header = headers.authorization().ok_or(AuthError::NoCredentials)?;
        let (scheme, value) = split_scheme(header);

        match scheme {
            "Basic" => self.login(value),
            "Bearer" => self.validate(value),
            _ => Err(AuthError::NoCredentials),
        }
    }

    fn login(&self, encoded: &str) -> Result<CallIdentity, AuthError> {
        let decoded = STANDARD
            .decode(encoded.trim())
            .ok()
            .and_then(|raw| String::from_utf8(raw).ok())
            .ok_or_else(|| {
                telemetry::record_login("rejected");
                telemetry::log_security_event(
                    SecurityEvent::AuthFailure,
                    "Malformed basic credentials",
                    &[],
                );
                AuthError::Malformed
            })?;
        let (username, password) = decoded.split_once(':').unwrap_or((decoded.as_str(), ""));

        let known = self.password_hashes.get(username);
        let matches = match known {
            Some(expected) if !password.is_empty() => {
                constant_time_compare(&digest(password.as_bytes()), expected)
            }
            _ => false,
        };

        if !matches {
            telemetry::record_login("rejected");
            telemetry::log_security_event(
                SecurityEvent::AuthFailure,
                "Unknown user or invalid password",
                &[("user", username)],
            );
            return Err(AuthError::InvalidPassword);
        }

        let token = Token::generate();
        self.tokens.insert(token.clone(), username.to_string());

        telemetry::record_login("accepted");
        telemetry::log_security_event(
            SecurityEvent::TokenIssued,
            "Bearer token issued",
            &[("user", username), ("token", &token.fingerprint())],
        );

        Ok(CallIdentity {
            username: username.to_string(),
            token,
        })
    }

    fn validate(&self, value: &str) -> Result<CallIdentity, AuthError> {
        let token = Token(value.to_string());
        let username = match self.tokens.get(&token) {
            Some(entry) => entry.value().clone(),
            None => {
                telemetry::log_security_event(
                    SecurityEvent::InvalidToken,
                    "Invalid token",
                    &[("token", &token.fingerprint())],
                );
                return Err(AuthError::InvalidToken);
            }
        };

        Ok(CallIdentity { username, token })
    }

    /// Number of tokens issued so far.
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    pub fn user_count(&self) -> usize {
        self.password_hashes.len()
    }
}

/// `"Scheme value"` → `("Scheme", "value")`; a bare scheme yields an empty value.
fn split_scheme(header: &str) -> (&str, &str) {
    header.split_once(' ').unwrap_or((header, ""))
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub(crate) fn fingerprint(value: &str) -> String {
    let full = digest(value.as_bytes());
    hex::encode(&full[..8])
}

/// Constant-time comparison to prevent timing attacks.
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
