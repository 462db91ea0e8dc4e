//! Client facade over a [`FlightTransport`].
//!
//! `connect` logs in once with the password, keeps the bearer token the
//! server hands back, and attaches it to every later call.

use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::action::builtin::{
    ADD_ACTION, ADD_EXCHANGE, DROP_TABLE, DROP_VIEW, HEALTHCHECK, LIST_EXCHANGES, LIST_TABLES,
    QUERY_EXCHANGE, READ_PARQUET, SHUTDOWN, TABLE_INFO,
};
use crate::action::ActionDefinition;
use crate::auth::{CallHeaders, Credential};
use crate::engine::ColumnInfo;
use crate::error::FlightError;
use crate::exchange::{
    BatchReader, BatchStream, ExchangeDescriptor, ExchangeHandle, ExchangeSession, ExchangerDefinition,
};
use crate::transport::{ActionType, FlightInfo, FlightTransport, Response};

/// Backoff for the startup health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: u32,
}

impl RetryConfig {
    fn next_backoff(&self, current: Duration) -> Duration {
        current
            .saturating_mul(self.multiplier.max(1))
            .min(self.max_backoff)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub credential: Credential,
    pub retry: RetryConfig,
    /// Upper bound on each health-check attempt during `connect`.
    pub call_timeout: Duration,
    /// Output batches buffered between an exchange and its reader.
    pub handoff_capacity: usize,
}

impl ClientConfig {
    pub fn new(credential: Credential) -> Self {
        Self {
            credential,
            retry: RetryConfig::default(),
            call_timeout: Duration::from_secs(10),
            handoff_capacity: 8,
        }
    }
}

#[derive(Serialize)]
struct ReadRequest<'a> {
    table_name: &'a str,
    source_list: &'a [String],
}

pub struct FlightClient {
    transport: Arc<dyn FlightTransport>,
    headers: RwLock<CallHeaders>,
    config: ClientConfig,
}

impl FlightClient {
    /// Log in and wait until the server answers.
    ///
    /// `Unavailable` and `DeadlineExceeded` are retried with exponential
    /// backoff for as long as it takes; any other error is returned at once.
    pub async fn connect(transport: Arc<dyn FlightTransport>, config: ClientConfig) -> Result<Self, FlightError> {
        let client = Self {
            headers: RwLock::new(CallHeaders::with_basic(&config.credential)),
            transport,
            config,
        };
        client.wait_until_ready().await?;
        Ok(client)
    }

    async fn wait_until_ready(&self) -> Result<(), FlightError> {
        let mut backoff = self.config.retry.initial_backoff;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let outcome = match tokio::time::timeout(self.config.call_timeout, self.health_check()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(FlightError::DeadlineExceeded(format!(
                    "health check timed out after {:?}",
                    self.config.call_timeout
                ))),
            };

            match outcome {
                Ok(()) => {
                    tracing::info!(attempts = attempt, "connected to flight server");
                    return Ok(());
                }
                Err(e) if e.is_retryable_connectivity() => {
                    tracing::warn!(
                        attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "flight server not ready, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = self.config.retry.next_backoff(backoff);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn call_headers(&self) -> CallHeaders {
        self.headers.read().clone()
    }

    /// Switch to the bearer token if the server sent one.
    fn absorb<T>(&self, response: Response<T>) -> T {
        if let Some(token) = response.headers.bearer_token() {
            let mut headers = self.headers.write();
            if headers.bearer_token() != Some(token) {
                *headers = CallHeaders::with_bearer(token);
            }
        }
        response.inner
    }

    pub async fn do_action(&self, name: &str, body: impl Into<Bytes>) -> Result<Vec<Bytes>, FlightError> {
        let response = self
            .transport
            .do_action(&self.call_headers(), name, body.into())
            .await?;
        self.absorb(response).try_collect().await
    }

    /// Run an action and decode every payload as JSON.
    pub async fn do_action_json<T: DeserializeOwned>(
        &self,
        name: &str,
        body: impl Into<Bytes>,
    ) -> Result<Vec<T>, FlightError> {
        self.do_action(name, body)
            .await?
            .iter()
            .map(|payload| {
                serde_json::from_slice(payload)
                    .map_err(|e| FlightError::Internal(format!("malformed {} result: {}", name, e)))
            })
            .collect()
    }

    async fn single_json<T: DeserializeOwned>(&self, name: &str, body: impl Into<Bytes>) -> Result<T, FlightError> {
        self.do_action_json(name, body)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| FlightError::Internal(format!("{} returned no result", name)))
    }

    pub async fn health_check(&self) -> Result<(), FlightError> {
        self.do_action(HEALTHCHECK, Bytes::new()).await.map(|_| ())
    }

    pub async fn list_actions(&self) -> Result<Vec<ActionType>, FlightError> {
        let response = self.transport.list_actions(&self.call_headers()).await?;
        Ok(self.absorb(response))
    }

    pub async fn list_exchanges(&self) -> Result<Vec<String>, FlightError> {
        self.single_json(LIST_EXCHANGES, Bytes::new()).await
    }

    pub async fn add_action(&self, definition: &ActionDefinition) -> Result<(), FlightError> {
        self.do_action(ADD_ACTION, to_json(definition)?).await.map(|_| ())
    }

    pub async fn add_exchange(&self, definition: &ExchangerDefinition) -> Result<(), FlightError> {
        self.do_action(ADD_EXCHANGE, to_json(definition)?).await.map(|_| ())
    }

    async fn describe_exchange(&self, command: &str) -> Result<Option<ExchangeDescriptor>, FlightError> {
        self.single_json(QUERY_EXCHANGE, to_json(command)?).await
    }

    /// Negotiation metadata for `command`; `NotFound` if it is not registered.
    pub async fn query_exchange(&self, command: &str) -> Result<ExchangeDescriptor, FlightError> {
        self.describe_exchange(command)
            .await?
            .ok_or_else(|| FlightError::NotFound(format!("Unknown exchange command: {}", command)))
    }

    /// Start an exchange. Returns once the stream is open; the output schema
    /// is available on the reader before any batch arrives.
    pub async fn do_exchange(
        &self,
        command: &str,
        input_schema: SchemaRef,
        input: BatchStream,
    ) -> Result<(ExchangeHandle, BatchReader), FlightError> {
        let mut session = ExchangeSession::new(command, input_schema);
        let descriptor = self.describe_exchange(command).await?;
        session.negotiate(descriptor.as_ref())?;

        let (handle, reader, headers) = session
            .start(
                self.transport.as_ref(),
                &self.call_headers(),
                input,
                self.config.handoff_capacity,
            )
            .await?;
        self.absorb(Response::new(headers, ()));
        Ok((handle, reader))
    }

    /// Exchange an in-memory list of batches.
    pub async fn do_exchange_batches(
        &self,
        command: &str,
        input_schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<(ExchangeHandle, BatchReader), FlightError> {
        let input = stream::iter(batches.into_iter().map(Ok)).boxed();
        self.do_exchange(command, input_schema, input).await
    }

    /// Returns the server's acknowledgment.
    pub async fn shutdown(&self) -> Result<String, FlightError> {
        self.single_json(SHUTDOWN, Bytes::new()).await
    }

    pub async fn list_tables(&self) -> Result<Vec<String>, FlightError> {
        self.single_json(LIST_TABLES, Bytes::new()).await
    }

    pub async fn table_info(&self, table: &str) -> Result<Vec<ColumnInfo>, FlightError> {
        self.single_json(TABLE_INFO, table.to_string()).await
    }

    /// Rebuild a table's schema from its column descriptions.
    pub async fn get_table_schema(&self, table: &str) -> Result<SchemaRef, FlightError> {
        let fields: Vec<_> = self.table_info(table).await?.iter().map(ColumnInfo::to_field).collect();
        Ok(Arc::new(arrow::datatypes::Schema::new(fields)))
    }

    pub async fn drop_table(&self, table: &str) -> Result<String, FlightError> {
        self.single_json(DROP_TABLE, to_json(table)?).await
    }

    pub async fn drop_view(&self, view: &str) -> Result<String, FlightError> {
        self.single_json(DROP_VIEW, to_json(view)?).await
    }

    /// Load external files into `table` on the server. The server's engine
    /// decides the file format; the in-memory engine reads Arrow IPC.
    pub async fn read_parquet(&self, sources: &[String], table: &str) -> Result<String, FlightError> {
        let request = ReadRequest {
            table_name: table,
            source_list: sources,
        };
        self.single_json(READ_PARQUET, to_json(&request)?).await
    }

    /// Upload a stream of batches as `table`.
    pub async fn upload_batches(&self, table: &str, schema: SchemaRef, batches: BatchStream) -> Result<(), FlightError> {
        let response = self
            .transport
            .do_put(&self.call_headers(), table, schema, batches)
            .await?;
        self.absorb(response);
        Ok(())
    }

    pub async fn upload_table(&self, table: &str, schema: SchemaRef, batches: Vec<RecordBatch>) -> Result<(), FlightError> {
        let batches = stream::iter(batches.into_iter().map(Ok)).boxed();
        self.upload_batches(table, schema, batches).await
    }

    pub async fn get_flight_info(&self, query: &str) -> Result<FlightInfo, FlightError> {
        let response = self.transport.get_flight_info(&self.call_headers(), query).await?;
        Ok(self.absorb(response))
    }

    /// Stream the results of `query`.
    pub async fn run_query_for_batches(&self, query: &str) -> Result<BatchReader, FlightError> {
        let response = self.transport.do_get(&self.call_headers(), query).await?;
        let data = self.absorb(response);
        Ok(BatchReader::from_stream(data.schema, data.batches))
    }

    /// Plan the query, then fetch everything its ticket returns.
    pub async fn execute_query(&self, query: &str) -> Result<Vec<RecordBatch>, FlightError> {
        let info = self.get_flight_info(query).await?;
        self.run_query_for_batches(&info.ticket)
            .await?
            .collect_batches()
            .await
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Bytes, FlightError> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|e| FlightError::InvalidArgument(format!("cannot encode request: {}", e)))
}
