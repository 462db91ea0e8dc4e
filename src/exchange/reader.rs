//! Lazily consumed output of an exchange or a query.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use futures::{Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;

use super::session::Shared;
use super::BatchStream;
use crate::error::FlightError;

enum Source {
    /// Fed by an exchange's download worker. Channel close ends the stream;
    /// a recorded session error is yielded as the final item.
    Session {
        receiver: mpsc::Receiver<RecordBatch>,
        shared: Arc<Shared>,
    },
    Stream(BatchStream),
}

/// Output batches with a schema known before the first batch arrives.
///
/// Yields `Ok(batch)` items and at most one trailing `Err`. Dropping a
/// reader fed by an exchange before it ends cancels that exchange.
pub struct BatchReader {
    schema: SchemaRef,
    source: Source,
    finished: bool,
}

impl BatchReader {
    pub(crate) fn from_session(
        schema: SchemaRef,
        receiver: mpsc::Receiver<RecordBatch>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            schema,
            source: Source::Session { receiver, shared },
            finished: false,
        }
    }

    pub fn from_stream(schema: SchemaRef, batches: BatchStream) -> Self {
        Self {
            schema,
            source: Source::Stream(batches),
            finished: false,
        }
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    /// Zero-row batch with the output schema.
    pub fn empty_batch(&self) -> RecordBatch {
        RecordBatch::new_empty(self.schema.clone())
    }

    pub async fn next_batch(&mut self) -> Option<Result<RecordBatch, FlightError>> {
        self.next().await
    }

    pub async fn collect_batches(self) -> Result<Vec<RecordBatch>, FlightError> {
        self.try_collect().await
    }

    /// Everything concatenated into one batch.
    pub async fn read_all(self) -> Result<RecordBatch, FlightError> {
        let schema = self.schema.clone();
        let batches = self.collect_batches().await?;
        Ok(concat_batches(&schema, &batches)?)
    }
}

impl Stream for BatchReader {
    type Item = Result<RecordBatch, FlightError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }

        let polled = match &mut this.source {
            Source::Session { receiver, shared } => match receiver.poll_recv(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Some(batch)) => Some(Ok(batch)),
                Poll::Ready(None) => shared.error().map(Err),
            },
            Source::Stream(batches) => match batches.poll_next_unpin(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(item) => item,
            },
        };

        if matches!(polled, None | Some(Err(_))) {
            this.finished = true;
        }
        Poll::Ready(polled)
    }
}

impl Drop for BatchReader {
    fn drop(&mut self) {
        if let Source::Session { shared, .. } = &self.source {
            if !self.finished {
                shared.fail(FlightError::Cancelled("output reader dropped".into()));
            }
        }
    }
}

impl std::fmt::Debug for BatchReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchReader")
            .field("schema", &self.schema)
            .field("finished", &self.finished)
            .finish()
    }
}
