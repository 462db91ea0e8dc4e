//! Actions every server registers at construction.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::Deserialize;

use super::{ack, json_payload, single, Action, ActionContext, ActionDefinition, ResultStream};
use crate::error::FlightError;
use crate::exchange::ExchangerDefinition;
use crate::registry::Named;

pub const HEALTHCHECK: &str = "healthcheck";
pub const CLEAR: &str = "clear";
pub const SHUTDOWN: &str = "shutdown";
pub const LIST_EXCHANGES: &str = "list-exchanges";
pub const QUERY_EXCHANGE: &str = "query-exchange";
pub const ADD_ACTION: &str = "add-action";
pub const ADD_EXCHANGE: &str = "add-exchange";
pub const LIST_TABLES: &str = "list_tables";
pub const TABLE_INFO: &str = "table_info";
pub const DROP_TABLE: &str = "drop_table";
pub const DROP_VIEW: &str = "drop_view";
pub const READ_PARQUET: &str = "read_parquet";

macro_rules! builtin {
    ($(#[$meta:meta])* $ty:ident, $name:expr, $description:expr) => {
        $(#[$meta])*
        pub struct $ty;

        impl Named for $ty {
            fn name(&self) -> &str {
                $name
            }

            fn description(&self) -> &str {
                $description
            }
        }
    };
}

builtin!(HealthCheck, HEALTHCHECK, "Check server health.");
builtin!(Clear, CLEAR, "Clear the stored flights.");
builtin!(Shutdown, SHUTDOWN, "Shut down this server.");
builtin!(ListExchanges, LIST_EXCHANGES, "List registered exchange commands.");
builtin!(
    QueryExchange,
    QUERY_EXCHANGE,
    "Describe the input requirement and output schema of an exchange command."
);
builtin!(AddAction, ADD_ACTION, "Register an action from its definition.");
builtin!(AddExchange, ADD_EXCHANGE, "Register an exchange command from its definition.");
builtin!(ListTables, LIST_TABLES, "List tables in the engine.");
builtin!(TableInfo, TABLE_INFO, "Describe the columns of a table.");
builtin!(DropTable, DROP_TABLE, "Drop a table.");
builtin!(DropView, DROP_VIEW, "Drop a view.");
builtin!(
    /// Load external files into a table.
    ///
    /// The action keeps its historical name and reply text
    /// (`"read parquet file <table>"`), but the file format is whatever the
    /// engine's `load_external_files` reads. [`MemoryEngine`] reads Arrow IPC.
    ///
    /// [`MemoryEngine`]: crate::engine::MemoryEngine
    ReadParquet,
    READ_PARQUET,
    "Load external files into a table. The engine decides the file format."
);

/// One instance of every built-in action.
pub fn builtin_actions() -> Vec<Arc<dyn Action>> {
    vec![
        Arc::new(HealthCheck),
        Arc::new(Clear),
        Arc::new(Shutdown),
        Arc::new(ListExchanges),
        Arc::new(QueryExchange),
        Arc::new(AddAction),
        Arc::new(AddExchange),
        Arc::new(ListTables),
        Arc::new(TableInfo),
        Arc::new(DropTable),
        Arc::new(DropView),
        Arc::new(ReadParquet),
    ]
}

#[async_trait]
impl Action for HealthCheck {
    async fn execute(&self, _ctx: ActionContext, _body: Bytes) -> Result<ResultStream, FlightError> {
        Ok(ack())
    }
}

#[async_trait]
impl Action for Clear {
    async fn execute(&self, _ctx: ActionContext, _body: Bytes) -> Result<ResultStream, FlightError> {
        Err(FlightError::InvalidOperation("clear is not implemented.".into()))
    }
}

#[async_trait]
impl Action for Shutdown {
    async fn execute(&self, ctx: ActionContext, _body: Bytes) -> Result<ResultStream, FlightError> {
        let trigger = ShutdownTrigger {
            server: ctx.server().clone(),
            requested_by: ctx.identity().username().to_string(),
        };
        let payload = json_payload("Shutdown!")?;

        Ok(stream::once(async move {
            // Fires when this future is dropped, i.e. right after the ack is handed out.
            let _trigger = trigger;
            Ok(payload)
        })
        .boxed())
    }
}

struct ShutdownTrigger {
    server: Arc<crate::server::ServerState>,
    requested_by: String,
}

impl Drop for ShutdownTrigger {
    fn drop(&mut self) {
        self.server.control().request_shutdown(&self.requested_by);
    }
}

#[async_trait]
impl Action for ListExchanges {
    async fn execute(&self, ctx: ActionContext, _body: Bytes) -> Result<ResultStream, FlightError> {
        let commands = ctx.server().exchangers().names();
        Ok(single(json_payload(&commands)?))
    }
}

#[async_trait]
impl Action for QueryExchange {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        let command: String = serde_json::from_slice(&body)?;
        let descriptor = ctx
            .server()
            .exchangers()
            .lookup(&command)
            .map(|exchanger| exchanger.descriptor().clone());
        Ok(single(json_payload(&descriptor)?))
    }
}

#[async_trait]
impl Action for AddAction {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        ctx.server().authorize_registration(ctx.identity(), ADD_ACTION)?;
        let definition: ActionDefinition = serde_json::from_slice(&body)?;
        let action = definition.build()?;
        tracing::info!(
            action = %action.name(),
            user = %ctx.identity().username(),
            "registering action"
        );
        ctx.server().actions().register(action);
        Ok(ack())
    }
}

#[async_trait]
impl Action for AddExchange {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        ctx.server().authorize_registration(ctx.identity(), ADD_EXCHANGE)?;
        let definition: ExchangerDefinition = serde_json::from_slice(&body)?;
        let exchanger = definition.build()?;
        tracing::info!(
            command = %exchanger.name(),
            user = %ctx.identity().username(),
            "registering exchange command"
        );
        ctx.server().exchangers().register(exchanger);
        Ok(ack())
    }
}

#[async_trait]
impl Action for ListTables {
    async fn execute(&self, ctx: ActionContext, _body: Bytes) -> Result<ResultStream, FlightError> {
        let tables = ctx
            .server()
            .engine()
            .list_tables()
            .await
            .map_err(|e| FlightError::upstream("error listing tables", e))?;
        Ok(single(json_payload(&tables)?))
    }
}

#[async_trait]
impl Action for TableInfo {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        let table = std::str::from_utf8(&body)
            .map_err(|_| FlightError::InvalidArgument("table name must be UTF-8".into()))?;
        let columns = ctx
            .server()
            .engine()
            .describe(table)
            .await
            .map_err(|e| FlightError::upstream("error describing table", e))?;
        Ok(single(json_payload(&columns)?))
    }
}

#[async_trait]
impl Action for DropTable {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        let table: String = serde_json::from_slice(&body)?;
        ctx.server()
            .engine()
            .drop_table(&table)
            .await
            .map_err(|e| FlightError::upstream("error dropping table", e))?;
        Ok(single(json_payload(&format!("dropped table {}", table))?))
    }
}

#[async_trait]
impl Action for DropView {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        let view: String = serde_json::from_slice(&body)?;
        ctx.server()
            .engine()
            .drop_view(&view)
            .await
            .map_err(|e| FlightError::upstream("error dropping view", e))?;
        Ok(single(json_payload(&format!("dropped view {}", view))?))
    }
}

/// Body of `read_parquet`. `source_list` may be one path or a list.
#[derive(Debug, Deserialize)]
struct ReadRequest {
    table_name: String,
    source_list: Sources,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Sources {
    One(String),
    Many(Vec<String>),
}

impl Sources {
    fn into_paths(self) -> Vec<PathBuf> {
        match self {
            Self::One(path) => vec![PathBuf::from(path)],
            Self::Many(paths) => paths.into_iter().map(PathBuf::from).collect(),
        }
    }
}

#[async_trait]
impl Action for ReadParquet {
    async fn execute(&self, ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        let request: ReadRequest = serde_json::from_slice(&body)?;
        let paths = request.source_list.into_paths();
        ctx.server()
            .engine()
            .load_external_files(&paths, &request.table_name)
            .await
            .map_err(|e| FlightError::upstream("error reading files", e))?;
        Ok(single(json_payload(&format!(
            "read parquet file {}",
            request.table_name
        ))?))
    }
}
