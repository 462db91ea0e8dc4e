//! Serializable exchanger definitions accepted by `add-exchange`.

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::compute::kernels::numeric;
use arrow::datatypes::{DataType, Field, SchemaRef};
use arrow::record_batch::RecordBatch;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use super::{BatchStream, ExchangeDescriptor, Exchanger, InputRequirement, OutputRule};
use crate::error::FlightError;
use crate::registry::Named;

fn default_append() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExchangerDefinition {
    /// Every input batch comes back unchanged.
    Echo { command: String },
    /// Keep only the named columns, in the given order.
    Project { command: String, columns: Vec<String> },
    /// Int64 sum of `inputs`, appended as `output` or replacing the input columns.
    SumColumns {
        command: String,
        inputs: Vec<String>,
        output: String,
        #[serde(default = "default_append")]
        append: bool,
    },
    /// Buffer the whole input and emit one batch once it ends.
    Concat { command: String },
}

impl ExchangerDefinition {
    pub fn command(&self) -> &str {
        match self {
            Self::Echo { command }
            | Self::Project { command, .. }
            | Self::SumColumns { command, .. }
            | Self::Concat { command } => command,
        }
    }

    pub fn descriptor(&self) -> ExchangeDescriptor {
        let (description, input, output) = match self {
            Self::Echo { .. } => (
                "Return every input batch unchanged.".to_string(),
                InputRequirement::Any,
                OutputRule::SameAsInput,
            ),
            Self::Project { columns, .. } => (
                format!("Keep columns {}.", columns.join(", ")),
                InputRequirement::Columns {
                    names: columns.clone(),
                },
                OutputRule::Project {
                    columns: columns.clone(),
                },
            ),
            Self::SumColumns {
                inputs,
                output,
                append,
                ..
            } => {
                let required = inputs
                    .iter()
                    .map(|name| Field::new(name, DataType::Int64, true))
                    .collect();
                let total = vec![Field::new(output, DataType::Int64, true)];
                let rule = if *append {
                    OutputRule::Append { fields: total }
                } else {
                    OutputRule::Fixed { fields: total }
                };
                (
                    format!("Sum {} into {}.", inputs.join(" + "), output),
                    InputRequirement::Fields { fields: required },
                    rule,
                )
            }
            Self::Concat { .. } => (
                "Concatenate the whole input into one batch.".to_string(),
                InputRequirement::Any,
                OutputRule::SameAsInput,
            ),
        };

        ExchangeDescriptor {
            command: self.command().to_string(),
            description,
            input,
            output,
        }
    }

    /// Validate and turn the definition into a registrable exchanger.
    pub fn build(self) -> Result<Arc<dyn Exchanger>, FlightError> {
        if self.command().trim().is_empty() {
            return Err(FlightError::InvalidArgument("exchange command must not be empty".into()));
        }
        match &self {
            Self::Project { columns, .. } if columns.is_empty() => {
                return Err(FlightError::InvalidArgument("project needs at least one column".into()));
            }
            Self::SumColumns { inputs, .. } if inputs.is_empty() => {
                return Err(FlightError::InvalidArgument(
                    "sum_columns needs at least one input column".into(),
                ));
            }
            _ => {}
        }

        let descriptor = self.descriptor();
        Ok(Arc::new(DefinedExchanger {
            definition: self,
            descriptor,
        }))
    }
}

struct DefinedExchanger {
    definition: ExchangerDefinition,
    descriptor: ExchangeDescriptor,
}

impl Named for DefinedExchanger {
    fn name(&self) -> &str {
        &self.descriptor.command
    }

    fn description(&self) -> &str {
        &self.descriptor.description
    }
}

impl Exchanger for DefinedExchanger {
    fn descriptor(&self) -> &ExchangeDescriptor {
        &self.descriptor
    }

    fn transform(&self, _input_schema: SchemaRef, output_schema: SchemaRef, input: BatchStream)
        -> BatchStream {
        match &self.definition {
            ExchangerDefinition::Echo { .. } => input,
            ExchangerDefinition::Project { .. } => input
                .map(move |batch| batch.and_then(|b| project(&b, &output_schema)))
                .boxed(),
            ExchangerDefinition::SumColumns { inputs, append, .. } => {
                let inputs = inputs.clone();
                let append = *append;
                input
                    .map(move |batch| {
                        batch.and_then(|b| sum_columns(&b, &inputs, append, &output_schema))
                    })
                    .boxed()
            }
            ExchangerDefinition::Concat { .. } => {
                stream::once(concat_all(input, output_schema))
                    .filter_map(|result| async move { result.transpose() })
                    .boxed()
            }
        }
    }
}

async fn concat_all(
    input: BatchStream,
    output_schema: SchemaRef,
) -> Result<Option<RecordBatch>, FlightError> {
    let batches: Vec<RecordBatch> = input.try_collect().await?;
    if batches.is_empty() {
        return Ok(None);
    }
    Ok(Some(concat_batches(&output_schema, &batches)?))
}

fn project(batch: &RecordBatch, output_schema: &SchemaRef) -> Result<RecordBatch, FlightError> {
    let columns = output_schema
        .fields()
        .iter()
        .map(|f| column(batch, f.name()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(output_schema.clone(), columns)?)
}

fn sum_columns(
    batch: &RecordBatch,
    inputs: &[String],
    append: bool,
    output_schema: &SchemaRef,
) -> Result<RecordBatch, FlightError> {
    let mut total: Option<ArrayRef> = None;
    for name in inputs {
        let next = column(batch, name)?;
        total = Some(match total {
            None => next,
            Some(acc) => numeric::add(&acc, &next)
                .map_err(|e| FlightError::InvalidArgument(format!("cannot sum {}: {}", name, e)))?,
        });
    }
    let total = total.ok_or_else(|| FlightError::InvalidArgument("no input columns".into()))?;

    let mut columns = if append {
        batch.columns().to_vec()
    } else {
        Vec::with_capacity(1)
    };
    columns.push(total);
    Ok(RecordBatch::try_new(output_schema.clone(), columns)?)
}

fn column(batch: &RecordBatch, name: &str) -> Result<ArrayRef, FlightError> {
    batch
        .column_by_name(name)
        .cloned()
        .ok_or_else(|| FlightError::InvalidArgument(format!("batch has no column {}", name)))
}
