//! Unary actions: named commands answered with a stream of payloads.

pub mod builtin;
pub mod definition;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;

use crate::auth::CallIdentity;
use crate::error::FlightError;
use crate::registry::Named;
use crate::server::ServerState;

pub use builtin::builtin_actions;
pub use definition::ActionDefinition;

/// Lazily produced action results. Finite and not restartable; dropping it
/// early abandons the remaining results.
pub type ResultStream = BoxStream<'static, Result<Bytes, FlightError>>;

/// Everything a handler may touch while running one call.
#[derive(Clone)]
pub struct ActionContext {
    server: Arc<ServerState>,
    identity: CallIdentity,
}

impl ActionContext {
    pub fn new(server: Arc<ServerState>, identity: CallIdentity) -> Self {
        Self { server, identity }
    }

    pub fn server(&self) -> &Arc<ServerState> {
        &self.server
    }

    pub fn identity(&self) -> &CallIdentity {
        &self.identity
    }
}

/// A named unary command.
///
/// Implementations validate the body and either fail before producing a
/// stream or return a stream whose items are delivered as they are produced.
#[async_trait]
pub trait Action: Named {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError>;
}

/// Encode a result payload as JSON.
pub fn json_payload<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, FlightError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| FlightError::Internal(format!("failed to encode result: {}", e)))
}

/// A stream of exactly one payload.
pub fn single(payload: Bytes) -> ResultStream {
    stream::once(async move { Ok(payload) }).boxed()
}

/// The empty acknowledgment returned by commands with nothing to report.
pub fn ack() -> ResultStream {
    single(Bytes::new())
}
