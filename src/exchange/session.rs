//! Client side of one exchange.
//!
//! After negotiation the session opens a single exchange stream and runs two
//! tasks over it: UPLOAD sends the schema and every input batch, DOWNLOAD
//! checks the server's schema and hands each output batch to the
//! [`BatchReader`] through a bounded channel. A supervisor joins both and
//! resolves the [`ExchangeHandle`].
//!
//! The first failure on either side is recorded and cancels the other, so a
//! consumer blocked on the reader always wakes up with that error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::{BatchReader, BatchStream, ExchangeDescriptor};
use crate::auth::CallHeaders;
use crate::error::FlightError;
use crate::telemetry::{self, ExchangeSpan, SpanExt};
use crate::transport::{ExchangeStream, FlightData, FlightTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Streaming,
    Completed,
    Failed,
}

/// Batch counts of a finished exchange. Upload and download need not match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeSummary {
    pub writes: u64,
    pub reads: u64,
}

struct Status {
    state: SessionState,
    error: Option<FlightError>,
}

/// State shared by the workers, the supervisor, the handle and the reader.
pub(crate) struct Shared {
    status: Mutex<Status>,
    cancel: CancellationToken,
    writes: AtomicU64,
    reads: AtomicU64,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new(Status {
                state: SessionState::Negotiating,
                error: None,
            }),
            cancel: CancellationToken::new(),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
        }
    }

    fn state(&self) -> SessionState {
        self.status.lock().state
    }

    fn set_state(&self, state: SessionState) {
        self.status.lock().state = state;
    }

    /// Record `err` unless an error is already recorded or the session has
    /// completed, then cancel both workers.
    pub(crate) fn fail(&self, err: FlightError) {
        {
            let mut status = self.status.lock();
            if status.state != SessionState::Completed && status.error.is_none() {
                status.error = Some(err);
                status.state = SessionState::Failed;
            }
        }
        self.cancel.cancel();
    }

    pub(crate) fn error(&self) -> Option<FlightError> {
        self.status.lock().error.clone()
    }

    /// Error a worker reports after it noticed cancellation.
    fn cancellation_error(&self) -> FlightError {
        self.error()
            .unwrap_or_else(|| FlightError::Cancelled("exchange cancelled".into()))
    }

    /// Final transition, atomic with respect to `fail`.
    fn complete(&self) -> Result<ExchangeSummary, FlightError> {
        let mut status = self.status.lock();
        if let Some(err) = &status.error {
            return Err(err.clone());
        }
        status.state = SessionState::Completed;
        Ok(self.summary())
    }

    fn summary(&self) -> ExchangeSummary {
        ExchangeSummary {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
        }
    }
}

/// An exchange that has not started streaming yet.
pub struct ExchangeSession {
    id: Uuid,
    command: String,
    input_schema: SchemaRef,
    output_schema: Option<SchemaRef>,
    shared: Arc<Shared>,
}

impl ExchangeSession {
    pub fn new(command: impl Into<String>, input_schema: SchemaRef) -> Self {
        Self {
            id: Uuid::new_v4(),
            command: command.into(),
            input_schema,
            output_schema: None,
            shared: Arc::new(Shared::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Resolve the output schema from the server's answer to `query-exchange`.
    ///
    /// `None` means the command is unknown.
    pub fn negotiate(&mut self, descriptor: Option<&ExchangeDescriptor>) -> Result<SchemaRef, FlightError> {
        let result = match descriptor {
            None => Err(FlightError::NotFound(format!(
                "Unknown exchange command: {}",
                self.command
            ))),
            Some(descriptor) => descriptor.negotiate(&self.input_schema),
        };
        match &result {
            Ok(schema) => self.output_schema = Some(schema.clone()),
            Err(e) => self.shared.fail(e.clone()),
        }
        result
    }

    /// Open the exchange stream and spawn the workers.
    ///
    /// Returns as soon as the stream is open; `input` is consumed in the
    /// background while the caller reads from the returned reader.
    pub async fn start(
        self,
        transport: &dyn FlightTransport,
        headers: &CallHeaders,
        input: BatchStream,
        handoff_capacity: usize,
    ) -> Result<(ExchangeHandle, BatchReader, CallHeaders), FlightError> {
        let output_schema = match (&self.output_schema, self.state()) {
            (Some(schema), SessionState::Negotiating) => schema.clone(),
            _ => {
                return Err(FlightError::InvalidOperation(
                    "exchange has not been negotiated".into(),
                ))
            }
        };

        let response = match transport.do_exchange(headers, &self.command).await {
            Ok(response) => response,
            Err(e) => {
                self.shared.fail(e.clone());
                return Err(e);
            }
        };
        let ExchangeStream { upload, download } = response.inner;
        self.shared.set_state(SessionState::Streaming);

        let span = ExchangeSpan::new(&self.id.to_string(), &self.command);
        let (handoff_tx, handoff_rx) = mpsc::channel(handoff_capacity.max(1));

        let upload_task = {
            let shared = self.shared.clone();
            let schema = self.input_schema.clone();
            tokio::spawn(
                async move {
                    if let Err(e) = upload_batches(&shared, schema, input, &upload).await {
                        tracing::debug!(error = %e, "upload failed");
                        abort_upload(&shared, &upload, e).await;
                    }
                }
                .instrument(span.clone()),
            )
        };

        let download_task = {
            let shared = self.shared.clone();
            let expected = output_schema.clone();
            tokio::spawn(
                async move {
                    let result = download_batches(&shared, &expected, download, &handoff_tx).await;
                    if let Err(e) = &result {
                        tracing::debug!(error = %e, "download failed");
                        shared.fail(e.clone());
                    }
                    // The reader observes the recorded error once this sender is gone.
                    drop(handoff_tx);
                }
                .instrument(span.clone()),
            )
        };

        let supervisor = tokio::spawn(supervise(
            self.shared.clone(),
            upload_task,
            download_task,
            span,
        ));

        let handle = ExchangeHandle {
            id: self.id,
            shared: self.shared.clone(),
            supervisor,
        };
        let reader = BatchReader::from_session(output_schema, handoff_rx, self.shared);
        Ok((handle, reader, response.headers))
    }
}

async fn supervise(
    shared: Arc<Shared>,
    upload: JoinHandle<()>,
    download: JoinHandle<()>,
    span: tracing::Span,
) -> Result<ExchangeSummary, FlightError> {
    let (up, down) = tokio::join!(upload, download);
    for joined in [up, down] {
        if let Err(e) = joined {
            shared.fail(FlightError::Internal(format!("exchange worker panicked: {}", e)));
        }
    }

    let result = shared.complete();
    let summary = shared.summary();
    span.record("writes", summary.writes);
    span.record("reads", summary.reads);
    span.record_result(&result);
    telemetry::record_exchange_batches("upload", summary.writes);
    telemetry::record_exchange_batches("download", summary.reads);
    telemetry::record_exchange_outcome(&result);

    span.in_scope(|| match &result {
        Ok(_) => tracing::info!(writes = summary.writes, reads = summary.reads, "exchange completed"),
        Err(e) => tracing::warn!(error = %e, "exchange failed"),
    });
    result
}

async fn upload_batches(
    shared: &Shared,
    schema: SchemaRef,
    mut input: BatchStream,
    upload: &mpsc::Sender<Result<FlightData, FlightError>>,
) -> Result<(), FlightError> {
    if !send(shared, upload, FlightData::Schema(schema.clone())).await? {
        return Ok(());
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Err(shared.cancellation_error()),
            next = input.next() => next,
        };
        let batch = match next {
            None => break,
            Some(batch) => batch?,
        };
        if batch.schema() != schema {
            return Err(FlightError::InvalidArgument(
                "input batch schema does not match the declared input schema".into(),
            ));
        }
        if !send(shared, upload, FlightData::Batch(batch)).await? {
            return Ok(());
        }
        shared.writes.fetch_add(1, Ordering::Relaxed);
    }

    // The task drops the sender after this returns, which is end-of-input.
    Ok(())
}

/// Report `err` to the server so its exchanger sees an aborted input instead
/// of a clean end, then fail the session.
///
/// The error is queued before the download half is cancelled. When the
/// upload channel is full the session fails first; the server then tears
/// down its side, which releases the pending send.
async fn abort_upload(shared: &Shared, upload: &mpsc::Sender<Result<FlightData, FlightError>>, err: FlightError) {
    match upload.try_send(Err(err.clone())) {
        Ok(()) | Err(TrySendError::Closed(_)) => shared.fail(err),
        Err(TrySendError::Full(message)) => {
            shared.fail(err);
            if upload.send(message).await.is_err() {
                tracing::debug!("server dropped the exchange before the abort arrived");
            }
        }
    }
}

/// `Ok(false)` when the server stopped reading; whatever it reports arrives
/// on the download side.
async fn send(
    shared: &Shared,
    upload: &mpsc::Sender<Result<FlightData, FlightError>>,
    data: FlightData,
) -> Result<bool, FlightError> {
    tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => Err(shared.cancellation_error()),
        sent = upload.send(Ok(data)) => {
            if sent.is_err() {
                tracing::debug!("server closed the upload half early");
            }
            Ok(sent.is_ok())
        }
    }
}

async fn download_batches(
    shared: &Shared,
    expected: &SchemaRef,
    mut download: futures::stream::BoxStream<'static, Result<FlightData, FlightError>>,
    handoff: &mpsc::Sender<RecordBatch>,
) -> Result<(), FlightError> {
    let first = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => return Err(shared.cancellation_error()),
        first = download.next() => first,
    };
    match first {
        Some(Ok(FlightData::Schema(schema))) if &schema == expected => {}
        Some(Ok(FlightData::Schema(schema))) => {
            return Err(FlightError::Internal(format!(
                "server output schema {:?} differs from the negotiated schema {:?}",
                schema, expected
            )));
        }
        Some(Ok(FlightData::Batch(_))) => {
            return Err(FlightError::Internal("exchange stream sent data before its schema".into()));
        }
        Some(Err(e)) => return Err(e),
        None => {
            return Err(FlightError::Unavailable("exchange stream ended before its schema".into()));
        }
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Err(shared.cancellation_error()),
            next = download.next() => next,
        };
        let batch = match next {
            None => return Ok(()),
            Some(Err(e)) => return Err(e),
            Some(Ok(FlightData::Schema(_))) => {
                return Err(FlightError::Internal("exchange stream changed schema mid-stream".into()));
            }
            Some(Ok(FlightData::Batch(batch))) => batch,
        };

        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => return Err(shared.cancellation_error()),
            sent = handoff.send(batch) => {
                if sent.is_err() {
                    return Err(FlightError::Cancelled("output reader dropped".into()));
                }
            }
        }
        shared.reads.fetch_add(1, Ordering::Relaxed);
    }
}

/// Completion side of a running exchange.
pub struct ExchangeHandle {
    id: Uuid,
    shared: Arc<Shared>,
    supervisor: JoinHandle<Result<ExchangeSummary, FlightError>>,
}

impl ExchangeHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Stop both workers. A no-op once the exchange has completed.
    pub fn cancel(&self) {
        self.shared.fail(FlightError::Cancelled("exchange cancelled".into()));
    }

    pub fn is_finished(&self) -> bool {
        self.supervisor.is_finished()
    }

    /// Wait for both workers; the first recorded error wins.
    pub async fn wait(self) -> Result<ExchangeSummary, FlightError> {
        self.supervisor
            .await
            .map_err(|e| FlightError::Internal(format!("exchange supervisor failed: {}", e)))?
    }
}

impl std::fmt::Debug for ExchangeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}
