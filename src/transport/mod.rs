//! The RPC transport seam.
//!
//! The core never speaks a wire format. A transport carries call headers,
//! unary and streamed calls, and the bidirectional exchange stream;
//! [`LocalTransport`] does so in-process over bounded channels.

pub mod local;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::action::ResultStream;
use crate::auth::CallHeaders;
use crate::error::FlightError;
use crate::exchange::BatchStream;

pub use local::LocalTransport;

/// One message on an exchange stream. Each direction starts with exactly one
/// `Schema` followed by any number of `Batch`es.
#[derive(Debug, Clone)]
pub enum FlightData {
    Schema(SchemaRef),
    Batch(RecordBatch),
}

/// A call's result plus the headers the server sent back.
#[derive(Debug)]
pub struct Response<T> {
    pub headers: CallHeaders,
    pub inner: T,
}

impl<T> Response<T> {
    pub fn new(headers: CallHeaders, inner: T) -> Self {
        Self { headers, inner }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            headers: self.headers,
            inner: f(self.inner),
        }
    }
}

/// Both halves of an open exchange.
///
/// Dropping `upload` is end-of-input. An `Err` on `upload` aborts the input
/// instead, and the server's exchanger sees that error rather than a clean
/// end. Dropping `download` abandons the server's output.
pub struct ExchangeStream {
    pub upload: mpsc::Sender<Result<FlightData, FlightError>>,
    pub download: BoxStream<'static, Result<FlightData, FlightError>>,
}

/// Query results: the schema, then the batches.
pub struct DataStream {
    pub schema: SchemaRef,
    pub batches: BatchStream,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionType {
    pub name: String,
    pub description: String,
}

/// What a query would return, without the data.
#[derive(Debug, Clone, PartialEq)]
pub struct FlightInfo {
    pub schema: SchemaRef,
    /// Pass to `do_get` to fetch the data.
    pub ticket: String,
    pub total_records: usize,
    pub total_bytes: usize,
}

/// Client-side view of a flight server.
#[async_trait]
pub trait FlightTransport: Send + Sync {
    async fn do_action(
        &self,
        headers: &CallHeaders,
        name: &str,
        body: Bytes,
    ) -> Result<Response<ResultStream>, FlightError>;

    async fn list_actions(&self, headers: &CallHeaders) -> Result<Response<Vec<ActionType>>, FlightError>;

    async fn do_exchange(
        &self,
        headers: &CallHeaders,
        command: &str,
    ) -> Result<Response<ExchangeStream>, FlightError>;

    /// Upload `batches` as table `table`.
    async fn do_put(
        &self,
        headers: &CallHeaders,
        table: &str,
        schema: SchemaRef,
        batches: BatchStream,
    ) -> Result<Response<()>, FlightError>;

    async fn do_get(&self, headers: &CallHeaders, ticket: &str) -> Result<Response<DataStream>, FlightError>;

    async fn get_flight_info(
        &self,
        headers: &CallHeaders,
        query: &str,
    ) -> Result<Response<FlightInfo>, FlightError>;
}
