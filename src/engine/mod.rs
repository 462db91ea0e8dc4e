//! Tabular engine seam.
//!
//! Query execution is an external collaborator. The server only needs the
//! handful of operations in [`TabularEngine`]; [`MemoryEngine`] is a small
//! in-process implementation used by the demo binary and the tests.

pub mod memory;

use std::path::PathBuf;

use arrow::datatypes::{DataType, Field, SchemaRef};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryEngine;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("View not found: {0}")]
    ViewNotFound(String),

    #[error("Unsupported query: {0}")]
    Unsupported(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Arrow error: {0}")]
    Arrow(String),
}

impl From<arrow::error::ArrowError> for EngineError {
    fn from(err: arrow::error::ArrowError) -> Self {
        Self::Arrow(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// One column of a table description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
    /// Display form of `data_type`, e.g. `Int64` or `Utf8`.
    pub type_name: String,
    pub nullable: bool,
}

impl ColumnInfo {
    pub fn from_field(field: &Field) -> Self {
        Self {
            name: field.name().clone(),
            data_type: field.data_type().clone(),
            type_name: field.data_type().to_string(),
            nullable: field.is_nullable(),
        }
    }

    pub fn to_field(&self) -> Field {
        Field::new(&self.name, self.data_type.clone(), self.nullable)
    }
}

/// Materialized result of a query.
#[derive(Debug, Clone)]
pub struct QueryOutput {
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
}

impl QueryOutput {
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(|b| b.num_rows()).sum()
    }

    pub fn num_bytes(&self) -> usize {
        self.batches.iter().map(|b| b.get_array_memory_size()).sum()
    }
}

/// Operations the server delegates to the query engine.
#[async_trait]
pub trait TabularEngine: Send + Sync {
    async fn execute(&self, query: &str) -> Result<QueryOutput, EngineError>;

    /// Register in-memory data as a temporary view, replacing any view of that name.
    async fn register_temporary(
        &self,
        name: &str,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<(), EngineError>;

    async fn list_tables(&self) -> Result<Vec<String>, EngineError>;

    async fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>, EngineError>;

    async fn drop_table(&self, name: &str) -> Result<(), EngineError>;

    async fn drop_view(&self, name: &str) -> Result<(), EngineError>;

    /// Replace `table` with the contents of `paths`. Each engine picks the
    /// file format it reads; every file must share one schema.
    async fn load_external_files(&self, paths: &[PathBuf], table: &str) -> Result<(), EngineError>;
}
