//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use arrow::array::{Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;

use flight_core::{
    ClientConfig, Credential, FlightClient, FlightServer, LocalTransport, MemoryEngine, ServerConfig,
};

pub struct Harness {
    pub server: FlightServer,
    pub transport: Arc<LocalTransport>,
    pub client: FlightClient,
}

pub fn test_credential() -> Credential {
    Credential::new("test", "password")
}

pub async fn start() -> Harness {
    start_with(ServerConfig::default()).await
}

pub async fn start_with(config: ServerConfig) -> Harness {
    let server = FlightServer::new(config, Arc::new(MemoryEngine::new()));
    let transport = Arc::new(LocalTransport::new(server.clone()));
    let client = FlightClient::connect(transport.clone(), ClientConfig::new(test_credential()))
        .await
        .unwrap();
    Harness {
        server,
        transport,
        client,
    }
}

/// Another client on the same server.
pub async fn connect_as(harness: &Harness, credential: Credential) -> FlightClient {
    FlightClient::connect(harness.transport.clone(), ClientConfig::new(credential))
        .await
        .unwrap()
}

pub fn numbers_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![Field::new("n", DataType::Int64, false)]))
}

pub fn numbers_batch(start: i64, len: i64) -> RecordBatch {
    let values: Vec<i64> = (start..start + len).collect();
    RecordBatch::try_new(numbers_schema(), vec![Arc::new(Int64Array::from(values))]).unwrap()
}

/// `count` batches of `len` consecutive numbers.
pub fn numbers(count: i64, len: i64) -> Vec<RecordBatch> {
    (0..count).map(|i| numbers_batch(i * len, len)).collect()
}

pub fn pairs_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("a", DataType::Int64, false),
        Field::new("b", DataType::Int64, false),
    ]))
}

pub fn pairs_batch(a: Vec<i64>, b: Vec<i64>) -> RecordBatch {
    RecordBatch::try_new(
        pairs_schema(),
        vec![Arc::new(Int64Array::from(a)), Arc::new(Int64Array::from(b))],
    )
    .unwrap()
}

pub fn users() -> (SchemaRef, RecordBatch) {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("name", DataType::Utf8, false),
    ]));
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from(vec![1, 2, 3])),
            Arc::new(StringArray::from(vec!["Alice", "Bob", "Charlie"])),
        ],
    )
    .unwrap();
    (schema, batch)
}
