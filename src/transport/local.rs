//! In-process transport over bounded tokio channels.

use std::sync::atomic::{AtomicBool, Ordering};

use arrow::datatypes::SchemaRef;
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ActionType, DataStream, ExchangeStream, FlightData, FlightInfo, FlightTransport, Response};
use crate::action::ResultStream;
use crate::auth::{CallHeaders, CallIdentity};
use crate::error::FlightError;
use crate::exchange::BatchStream;
use crate::server::FlightServer;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// Connects a client to a [`FlightServer`] in the same process.
///
/// Each exchange direction is a bounded channel of `channel_capacity`
/// messages, so a slow reader applies backpressure to the writer.
pub struct LocalTransport {
    server: FlightServer,
    channel_capacity: usize,
    reachable: AtomicBool,
}

impl LocalTransport {
    pub fn new(server: FlightServer) -> Self {
        Self::with_capacity(server, DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(server: FlightServer, channel_capacity: usize) -> Self {
        Self {
            server,
            channel_capacity: channel_capacity.max(1),
            reachable: AtomicBool::new(true),
        }
    }

    pub fn server(&self) -> &FlightServer {
        &self.server
    }

    /// While unreachable every call fails with `Unavailable`, as a network
    /// transport would before the server is listening.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    fn connect(&self, headers: &CallHeaders) -> Result<CallIdentity, FlightError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(FlightError::Unavailable("server unreachable".into()));
        }
        self.server.start_call(headers)
    }
}

#[async_trait]
impl FlightTransport for LocalTransport {
    async fn do_action(
        &self,
        headers: &CallHeaders,
        name: &str,
        body: Bytes,
    ) -> Result<Response<ResultStream>, FlightError> {
        let identity = self.connect(headers)?;
        let results = self.server.do_action(&identity, name, body).await?;
        Ok(Response::new(identity.response_headers(), results))
    }

    async fn list_actions(&self, headers: &CallHeaders) -> Result<Response<Vec<ActionType>>, FlightError> {
        let identity = self.connect(headers)?;
        let actions = self.server.list_actions(&identity)?;
        Ok(Response::new(identity.response_headers(), actions))
    }

    async fn do_exchange(
        &self,
        headers: &CallHeaders,
        command: &str,
    ) -> Result<Response<ExchangeStream>, FlightError> {
        let identity = self.connect(headers)?;
        let (upload_tx, upload_rx) = mpsc::channel(self.channel_capacity);
        let (download_tx, download_rx) = mpsc::channel(self.channel_capacity);

        tokio::spawn(serve_exchange(
            self.server.clone(),
            identity.clone(),
            command.to_string(),
            upload_rx,
            download_tx,
        ));

        let stream = ExchangeStream {
            upload: upload_tx,
            download: ReceiverStream::new(download_rx).boxed(),
        };
        Ok(Response::new(identity.response_headers(), stream))
    }

    async fn do_put(
        &self,
        headers: &CallHeaders,
        table: &str,
        schema: SchemaRef,
        batches: BatchStream,
    ) -> Result<Response<()>, FlightError> {
        let identity = self.connect(headers)?;
        self.server.do_put(&identity, table, schema, batches).await?;
        Ok(Response::new(identity.response_headers(), ()))
    }

    async fn do_get(&self, headers: &CallHeaders, ticket: &str) -> Result<Response<DataStream>, FlightError> {
        let identity = self.connect(headers)?;
        let data = self.server.do_get(&identity, ticket).await?;
        Ok(Response::new(identity.response_headers(), data))
    }

    async fn get_flight_info(
        &self,
        headers: &CallHeaders,
        query: &str,
    ) -> Result<Response<FlightInfo>, FlightError> {
        let identity = self.connect(headers)?;
        let info = self.server.get_flight_info(&identity, query).await?;
        Ok(Response::new(identity.response_headers(), info))
    }
}

/// Server half of one exchange: read the schema, run the exchanger, and
/// forward its output until it ends or the client goes away.
async fn serve_exchange(
    server: FlightServer,
    identity: CallIdentity,
    command: String,
    mut upload: mpsc::Receiver<Result<FlightData, FlightError>>,
    download: mpsc::Sender<Result<FlightData, FlightError>>,
) {
    let input_schema = match upload.recv().await {
        Some(Ok(FlightData::Schema(schema))) => schema,
        Some(Ok(FlightData::Batch(_))) => {
            let err = FlightError::InvalidArgument("exchange must start with a schema message".into());
            let _ = download.send(Err(err)).await;
            return;
        }
        Some(Err(e)) => {
            tracing::debug!(command = %command, error = %e, "client aborted exchange before its schema");
            return;
        }
        // Client went away before sending anything.
        None => return,
    };

    // A client abort arrives as an `Err` item, distinct from end-of-input.
    let input = ReceiverStream::new(upload)
        .map(|message| match message {
            Ok(FlightData::Batch(batch)) => Ok(batch),
            Ok(FlightData::Schema(_)) => Err(FlightError::InvalidArgument(
                "schema sent twice on one exchange".into(),
            )),
            Err(e) => Err(e),
        })
        .boxed();

    let (output_schema, mut output) = match server.exchange(&identity, &command, input_schema, input).await {
        Ok(started) => started,
        Err(e) => {
            let _ = download.send(Err(e)).await;
            return;
        }
    };

    if download.send(Ok(FlightData::Schema(output_schema))).await.is_err() {
        return;
    }

    loop {
        // Output first, so an abort already queued on the upload half reaches
        // the exchanger before the closed download half is noticed.
        let next = tokio::select! {
            biased;
            next = output.next() => next,
            _ = download.closed() => {
                tracing::debug!(command = %command, "client abandoned exchange");
                return;
            }
        };
        let Some(item) = next else {
            return;
        };
        let failed = item.is_err();
        if download.send(item.map(FlightData::Batch)).await.is_err() || failed {
            return;
        }
    }
}
