//! flight-core
//!
//! Authenticated command dispatch and bidirectional batch exchange on top of
//! a pluggable RPC transport.
//!
//! # Layers
//!
//! - **Auth**: one password check per connection, bearer tokens afterwards
//! - **Registries**: named actions and exchange commands, extensible at runtime
//! - **Dispatch**: unary actions answered with a stream of payloads
//! - **Exchange**: schema negotiated up front, then upload and download run
//!   concurrently over one stream with bounded buffering
//! - **Client**: connect-with-retry plus typed wrappers for every call
//!
//! # Boundaries
//!
//! - Transport: anything implementing [`transport::FlightTransport`]; the
//!   crate ships [`transport::LocalTransport`] for in-process use
//! - Query execution: anything implementing [`engine::TabularEngine`]
//! - Handlers registered over the wire are tagged definitions, never code

pub mod action;
pub mod auth;
pub mod client;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod exchange;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod telemetry;
pub mod transport;

pub use action::{Action, ActionContext, ActionDefinition, ResultStream};
pub use auth::{CallHeaders, CallIdentity, Credential, TokenAuthenticator};
pub use client::{ClientConfig, FlightClient, RetryConfig};
pub use dispatch::ActionDispatcher;
pub use engine::{MemoryEngine, TabularEngine};
pub use error::{FlightError, StatusCode};
pub use exchange::{
    BatchReader, BatchStream, ExchangeDescriptor, ExchangeHandle, ExchangeSession, ExchangeSummary,
    Exchanger, ExchangerDefinition,
};
pub use registry::{ActionRegistry, ExchangerRegistry, Named, Registry};
pub use server::{FlightServer, ServerConfig, ServerState};
pub use transport::{FlightTransport, LocalTransport};
