//! Serializable action definitions accepted by `add-action`.
//!
//! A definition names one of a fixed set of behaviours; no code travels
//! over the wire.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};

use super::{json_payload, single, Action, ActionContext, ResultStream};
use crate::error::FlightError;
use crate::registry::Named;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionDefinition {
    /// Replays fixed JSON payloads in order.
    Constant {
        name: String,
        #[serde(default)]
        description: String,
        payloads: Vec<serde_json::Value>,
    },
    /// Returns the request body unchanged.
    Echo {
        name: String,
        #[serde(default)]
        description: String,
    },
}

impl ActionDefinition {
    pub fn name(&self) -> &str {
        match self {
            Self::Constant { name, .. } | Self::Echo { name, .. } => name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            Self::Constant { description, .. } | Self::Echo { description, .. } => description,
        }
    }

    /// Validate and turn the definition into a registrable handler.
    pub fn build(self) -> Result<Arc<dyn Action>, FlightError> {
        if self.name().trim().is_empty() {
            return Err(FlightError::InvalidArgument("action name must not be empty".into()));
        }

        let payloads = match &self {
            Self::Constant { payloads, .. } => payloads
                .iter()
                .map(json_payload)
                .collect::<Result<Vec<_>, _>>()?,
            Self::Echo { .. } => Vec::new(),
        };

        Ok(Arc::new(DefinedAction {
            definition: self,
            payloads,
        }))
    }
}

struct DefinedAction {
    definition: ActionDefinition,
    // Pre-encoded so every call replays identical bytes.
    payloads: Vec<Bytes>,
}

impl Named for DefinedAction {
    fn name(&self) -> &str {
        self.definition.name()
    }

    fn description(&self) -> &str {
        self.definition.description()
    }
}

#[async_trait]
impl Action for DefinedAction {
    async fn execute(&self, _ctx: ActionContext, body: Bytes) -> Result<ResultStream, FlightError> {
        match &self.definition {
            ActionDefinition::Constant { .. } => {
                Ok(stream::iter(self.payloads.clone().into_iter().map(Ok)).boxed())
            }
            ActionDefinition::Echo { .. } => Ok(single(body)),
        }
    }
}
