//! Routes an action call to its registered handler.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use tracing::Instrument;

use crate::action::{ActionContext, ResultStream};
use crate::error::FlightError;
use crate::registry::ActionRegistry;
use crate::telemetry::{self, ActionSpan, SpanExt};

pub struct ActionDispatcher {
    actions: Arc<ActionRegistry>,
}

impl ActionDispatcher {
    pub fn new(actions: Arc<ActionRegistry>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &Arc<ActionRegistry> {
        &self.actions
    }

    /// Look up `name` and run it. Results are forwarded as the handler
    /// produces them; no timeout is imposed here.
    pub async fn dispatch(
        &self,
        name: &str,
        body: Bytes,
        ctx: ActionContext,
    ) -> Result<ResultStream, FlightError> {
        let span = ActionSpan::new(name, ctx.identity().username());
        let result = self.run(name, body, ctx).instrument(span.clone()).await;
        span.record_result(&result);
        telemetry::record_action(name, &result);

        let results = result?;
        let name = name.to_string();
        Ok(results
            .inspect(move |item| {
                if let Err(e) = item {
                    span.in_scope(|| tracing::warn!(action = %name, error = %e, "action failed mid-stream"));
                }
            })
            .boxed())
    }

    async fn run(&self, name: &str, body: Bytes, ctx: ActionContext) -> Result<ResultStream, FlightError> {
        let action = self
            .actions
            .lookup(name)
            .ok_or_else(|| FlightError::NotFound(format!("Unknown action: {}", name)))?;
        tracing::debug!(body_len = body.len(), "dispatching action");
        action.execute(ctx, body).await
    }
}
