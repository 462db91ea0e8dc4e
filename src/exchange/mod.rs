//! Bidirectional batch exchange.
//!
//! Server side, an [`Exchanger`] turns a stream of input batches into a
//! stream of output batches whose schema is fixed up front by its
//! [`ExchangeDescriptor`]. Client side, an [`ExchangeSession`] negotiates
//! that schema and then runs upload and download concurrently.

pub mod definition;
pub mod descriptor;
pub mod reader;
pub mod session;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use futures::stream::BoxStream;

use crate::error::FlightError;
use crate::registry::Named;

pub use definition::ExchangerDefinition;
pub use descriptor::{ExchangeDescriptor, InputRequirement, OutputRule};
pub use reader::BatchReader;
pub use session::{ExchangeHandle, ExchangeSession, ExchangeSummary, SessionState};

/// Finite, non-restartable stream of batches.
pub type BatchStream = BoxStream<'static, Result<RecordBatch, FlightError>>;

/// A named streaming transform. Its registry key is the command.
pub trait Exchanger: Named {
    /// Negotiation metadata served by `query-exchange`.
    fn descriptor(&self) -> &ExchangeDescriptor;

    fn accepts(&self, input: &SchemaRef) -> bool {
        self.descriptor().input.accepts(input)
    }

    /// Deterministic in `input`, so repeated negotiation agrees.
    fn output_schema(&self, input: &SchemaRef) -> Result<SchemaRef, FlightError> {
        self.descriptor().negotiate(input)
    }

    /// Lazily transform `input`. Every emitted batch must carry `output_schema`.
    /// Errors on the input stream should be passed through.
    fn transform(&self, input_schema: SchemaRef, output_schema: SchemaRef, input: BatchStream)
        -> BatchStream;
}
