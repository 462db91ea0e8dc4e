//! Server-side call surface.
//!
//! A transport authenticates each call with [`FlightServer::start_call`] and
//! then invokes the matching operation with the resulting identity. All
//! state lives in one [`ServerState`] owned by the server instance.

pub mod slots;

use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::action::{builtin_actions, Action, ActionContext, ResultStream};
use crate::auth::{CallHeaders, CallIdentity, Credential, TokenAuthenticator};
use crate::dispatch::ActionDispatcher;
use crate::engine::TabularEngine;
use crate::error::FlightError;
use crate::exchange::{BatchStream, Exchanger};
use crate::registry::{ActionRegistry, ExchangerRegistry};
use crate::shutdown::{control_channel, ControlHandle, ControlSignal, ShutdownCoordinator, ShutdownGuard, ShutdownResult, ShutdownState};
use crate::telemetry::{self, SecurityEvent};
use crate::transport::{ActionType, DataStream, FlightInfo};

pub use slots::{ExchangeSlots, SlotGuard};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub credentials: Vec<Credential>,
    /// When set, only these users may call `add-action` and `add-exchange`.
    pub registration_users: Option<Vec<String>>,
    pub max_exchanges: usize,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            credentials: vec![Credential::new("test", "password")],
            registration_users: None,
            max_exchanges: 64,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared by every call on one server.
pub struct ServerState {
    auth: TokenAuthenticator,
    actions: Arc<ActionRegistry>,
    exchangers: Arc<ExchangerRegistry>,
    dispatcher: ActionDispatcher,
    engine: Arc<dyn TabularEngine>,
    control: ControlHandle,
    control_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlSignal>>>,
    shutdown: ShutdownCoordinator,
    slots: Arc<ExchangeSlots>,
    config: ServerConfig,
}

impl ServerState {
    pub fn auth(&self) -> &TokenAuthenticator {
        &self.auth
    }

    pub fn actions(&self) -> &ActionRegistry {
        &self.actions
    }

    pub fn exchangers(&self) -> &ExchangerRegistry {
        &self.exchangers
    }

    pub fn engine(&self) -> &Arc<dyn TabularEngine> {
        &self.engine
    }

    pub fn control(&self) -> &ControlHandle {
        &self.control
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Gate for calls that install new handlers.
    pub fn authorize_registration(&self, identity: &CallIdentity, action: &str) -> Result<(), FlightError> {
        let allowed = match &self.config.registration_users {
            None => true,
            Some(users) => users.iter().any(|u| u == identity.username()),
        };
        if allowed {
            telemetry::log_security_event(
                SecurityEvent::HandlerRegistered,
                "Handler registration accepted",
                &[("user", identity.username()), ("action", action)],
            );
            return Ok(());
        }

        telemetry::log_security_event(
            SecurityEvent::PermissionDenied,
            "Handler registration denied",
            &[("user", identity.username()), ("action", action)],
        );
        Err(FlightError::PermissionDenied(format!(
            "user {} may not call {}",
            identity.username(),
            action
        )))
    }
}

/// A flight server instance. Clones share the same state.
#[derive(Clone)]
pub struct FlightServer {
    state: Arc<ServerState>,
}

impl FlightServer {
    /// Build a server with the built-in actions registered and no exchangers.
    pub fn new(config: ServerConfig, engine: Arc<dyn TabularEngine>) -> Self {
        let actions = Arc::new(ActionRegistry::new());
        for action in builtin_actions() {
            actions.register(action);
        }
        let (control, control_rx) = control_channel();

        let state = ServerState {
            auth: TokenAuthenticator::new(config.credentials.clone()),
            dispatcher: ActionDispatcher::new(actions.clone()),
            actions,
            exchangers: Arc::new(ExchangerRegistry::new()),
            engine,
            control,
            control_rx: Mutex::new(Some(control_rx)),
            shutdown: ShutdownCoordinator::new(),
            slots: ExchangeSlots::new(config.max_exchanges),
            config,
        };
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> &Arc<ServerState> {
        &self.state
    }

    pub fn register_action(&self, action: Arc<dyn Action>) {
        self.state.actions.register(action);
    }

    pub fn register_exchanger(&self, exchanger: Arc<dyn Exchanger>) {
        self.state.exchangers.register(exchanger);
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.state.shutdown.state()
    }

    pub fn in_flight(&self) -> u32 {
        self.state.shutdown.in_flight_count()
    }

    /// Authenticate the start of a call.
    pub fn start_call(&self, headers: &CallHeaders) -> Result<CallIdentity, FlightError> {
        Ok(self.state.auth.start_call(headers)?)
    }

    fn admit(&self) -> Result<ShutdownGuard, FlightError> {
        self.state
            .shutdown
            .track()
            .ok_or_else(|| FlightError::Unavailable("server is shutting down".into()))
    }

    pub async fn do_action(
        &self,
        identity: &CallIdentity,
        name: &str,
        body: Bytes,
    ) -> Result<ResultStream, FlightError> {
        let guard = self.admit()?;
        let ctx = ActionContext::new(self.state.clone(), identity.clone());
        let results = self.state.dispatcher.dispatch(name, body, ctx).await?;
        Ok(hold(results, guard))
    }

    pub fn list_actions(&self, _identity: &CallIdentity) -> Result<Vec<ActionType>, FlightError> {
        let _guard = self.admit()?;
        Ok(self
            .state
            .actions
            .list()
            .into_iter()
            .map(|(name, description)| ActionType { name, description })
            .collect())
    }

    /// Negotiate and start the server half of an exchange.
    ///
    /// Returns the output schema and the lazily transformed output. Input
    /// batches that do not match `input_schema` fail the input stream with
    /// `InvalidArgument`; output batches that do not match the output schema
    /// fail the output stream with `InvalidOperation`.
    pub async fn exchange(
        &self,
        identity: &CallIdentity,
        command: &str,
        input_schema: SchemaRef,
        input: BatchStream,
    ) -> Result<(SchemaRef, BatchStream), FlightError> {
        let guard = self.admit()?;
        let slot = self
            .state
            .slots
            .try_acquire()
            .ok_or_else(|| FlightError::Unavailable("too many concurrent exchanges".into()))?;
        let exchanger = self
            .state
            .exchangers
            .lookup(command)
            .ok_or_else(|| FlightError::NotFound(format!("Unknown exchange command: {}", command)))?;
        let output_schema = exchanger.output_schema(&input_schema)?;

        tracing::info!(
            command = %command,
            user = %identity.username(),
            active = self.state.slots.active(),
            "exchange started"
        );

        let declared = input_schema.clone();
        let input = input
            .map(move |batch| {
                batch.and_then(|b| {
                    if b.schema() == declared {
                        Ok(b)
                    } else {
                        Err(FlightError::InvalidArgument(
                            "input batch does not match the declared input schema".into(),
                        ))
                    }
                })
            })
            .boxed();

        let expected = output_schema.clone();
        let command = command.to_string();
        let output = exchanger
            .transform(input_schema, output_schema.clone(), input)
            .map(move |batch| {
                batch.and_then(|b| {
                    if b.schema() == expected {
                        Ok(b)
                    } else {
                        Err(FlightError::InvalidOperation(format!(
                            "exchange {} produced a batch that does not match its output schema",
                            command
                        )))
                    }
                })
            })
            .boxed();

        Ok((output_schema, hold(output, (guard, slot))))
    }

    /// Store uploaded batches as table `table`, replacing any existing one.
    pub async fn do_put(
        &self,
        identity: &CallIdentity,
        table: &str,
        schema: SchemaRef,
        batches: BatchStream,
    ) -> Result<(), FlightError> {
        let _guard = self.admit()?;
        validate_table_name(table)?;

        let batches: Vec<RecordBatch> = batches.try_collect().await?;
        if batches.iter().any(|b| b.schema() != schema) {
            return Err(FlightError::InvalidArgument(
                "uploaded batch does not match the declared schema".into(),
            ));
        }
        let rows: usize = batches.iter().map(|b| b.num_rows()).sum();

        let engine = &self.state.engine;
        let temp = format!("temp_table_{}", Uuid::new_v4().simple());
        let created = async {
            engine.register_temporary(&temp, schema, batches).await?;
            engine
                .execute(&format!(
                    "CREATE OR REPLACE TABLE {} AS SELECT * FROM {}",
                    table, temp
                ))
                .await?;
            engine.drop_view(&temp).await
        }
        .await;

        if let Err(e) = created {
            if let Err(cleanup) = engine.drop_view(&temp).await {
                tracing::debug!(view = %temp, error = %cleanup, "temporary view already gone");
            }
            return Err(FlightError::upstream("error creating table", e));
        }

        tracing::info!(table = %table, rows, user = %identity.username(), "table uploaded");
        Ok(())
    }

    /// Run the query in `ticket` and stream its batches.
    pub async fn do_get(&self, _identity: &CallIdentity, ticket: &str) -> Result<DataStream, FlightError> {
        let guard = self.admit()?;
        let output = self
            .state
            .engine
            .execute(ticket)
            .await
            .map_err(|e| FlightError::upstream("error executing query", e))?;
        let batches = stream::iter(output.batches.into_iter().map(Ok)).boxed();
        Ok(DataStream {
            schema: output.schema,
            batches: hold(batches, guard),
        })
    }

    pub async fn get_flight_info(&self, _identity: &CallIdentity, query: &str) -> Result<FlightInfo, FlightError> {
        let _guard = self.admit()?;
        let output = self
            .state
            .engine
            .execute(query)
            .await
            .map_err(|e| FlightError::upstream("error executing query", e))?;
        Ok(FlightInfo {
            total_records: output.num_rows(),
            total_bytes: output.num_bytes(),
            schema: output.schema,
            ticket: query.to_string(),
        })
    }

    /// Ask the serve loop to shut down.
    pub fn stop(&self) {
        self.state.control.stop();
    }

    /// Run until a control signal arrives, then drain in-flight calls.
    ///
    /// Only one serve loop may run per server.
    pub async fn serve(&self) -> Result<ShutdownResult, FlightError> {
        let mut control = self
            .state
            .control_rx
            .lock()
            .take()
            .ok_or_else(|| FlightError::InvalidOperation("server is already serving".into()))?;

        tracing::info!(
            actions = self.state.actions.len(),
            exchangers = self.state.exchangers.len(),
            users = self.state.auth.user_count(),
            "flight server ready"
        );

        match control.recv().await {
            Some(ControlSignal::Shutdown { requested_by }) => {
                tracing::info!(user = %requested_by, "shutdown requested")
            }
            Some(ControlSignal::Stop) | None => tracing::info!("stop requested"),
        }

        let result = self.state.shutdown.initiate(self.state.config.shutdown_timeout).await;
        match &result {
            ShutdownResult::Complete => tracing::info!("flight server stopped"),
            ShutdownResult::Timeout { remaining } => {
                tracing::warn!(remaining, "flight server stopped with calls still in flight")
            }
        }
        Ok(result)
    }
}

/// Keep `held` alive until `stream` is dropped.
fn hold<T, G>(stream: BoxStream<'static, T>, held: G) -> BoxStream<'static, T>
where
    T: Send + 'static,
    G: Send + 'static,
{
    stream
        .map(move |item| {
            let _held = &held;
            item
        })
        .boxed()
}

fn validate_table_name(table: &str) -> Result<(), FlightError> {
    let valid = !table.is_empty()
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(FlightError::InvalidArgument(format!("invalid table name: {:?}", table)))
    }
}
