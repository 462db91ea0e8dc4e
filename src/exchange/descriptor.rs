//! Serializable negotiation metadata.
//!
//! Both sides evaluate the same descriptor, so a client can check its input
//! schema and learn the output schema without a round trip per batch.

use std::sync::Arc;

use arrow::datatypes::{Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};

use crate::error::FlightError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeDescriptor {
    pub command: String,
    #[serde(default)]
    pub description: String,
    pub input: InputRequirement,
    pub output: OutputRule,
}

impl ExchangeDescriptor {
    /// Check `input` against the requirement and derive the output schema.
    pub fn negotiate(&self, input: &SchemaRef) -> Result<SchemaRef, FlightError> {
        if !self.input.accepts(input) {
            return Err(FlightError::InvalidArgument(format!(
                "input schema is not accepted by exchange {}: {}",
                self.command,
                self.input.summary()
            )));
        }
        self.output.output_schema(input)
    }
}

/// Input predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputRequirement {
    Any,
    /// Named columns must be present, any type.
    Columns { names: Vec<String> },
    /// Named columns must be present with exactly these types.
    Fields { fields: Vec<Field> },
}

impl InputRequirement {
    pub fn accepts(&self, schema: &Schema) -> bool {
        match self {
            Self::Any => true,
            Self::Columns { names } => names.iter().all(|n| schema.field_with_name(n).is_ok()),
            Self::Fields { fields } => fields.iter().all(|required| {
                schema
                    .field_with_name(required.name())
                    .map(|f| f.data_type() == required.data_type())
                    .unwrap_or(false)
            }),
        }
    }

    fn summary(&self) -> String {
        match self {
            Self::Any => "any schema".to_string(),
            Self::Columns { names } => format!("requires columns {}", names.join(", ")),
            Self::Fields { fields } => {
                let described: Vec<String> = fields
                    .iter()
                    .map(|f| format!("{}: {}", f.name(), f.data_type()))
                    .collect();
                format!("requires fields {}", described.join(", "))
            }
        }
    }
}

/// Output schema as a function of the input schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputRule {
    SameAsInput,
    Project { columns: Vec<String> },
    Append { fields: Vec<Field> },
    Fixed { fields: Vec<Field> },
}

impl OutputRule {
    pub fn output_schema(&self, input: &SchemaRef) -> Result<SchemaRef, FlightError> {
        match self {
            Self::SameAsInput => Ok(input.clone()),
            Self::Project { columns } => {
                let fields = columns
                    .iter()
                    .map(|name| {
                        input.field_with_name(name).cloned().map_err(|_| {
                            FlightError::InvalidArgument(format!(
                                "column {} is not in the input schema",
                                name
                            ))
                        })
                    })
                    .collect::<Result<Vec<Field>, _>>()?;
                Ok(Arc::new(Schema::new(fields)))
            }
            Self::Append { fields } => {
                if let Some(clash) = fields.iter().find(|f| input.field_with_name(f.name()).is_ok()) {
                    return Err(FlightError::InvalidArgument(format!(
                        "output column {} already exists in the input schema",
                        clash.name()
                    )));
                }
                let combined: Vec<Field> = input
                    .fields()
                    .iter()
                    .map(|f| f.as_ref().clone())
                    .chain(fields.iter().cloned())
                    .collect();
                Ok(Arc::new(Schema::new(combined)))
            }
            Self::Fixed { fields } => Ok(Arc::new(Schema::new(fields.clone()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::DataType;

    fn input() -> SchemaRef {
        Arc::new(Schema::new(vec![
            Field::new("a", DataType::Int64, false),
            Field::new("b", DataType::Utf8, true),
        ]))
    }

    fn descriptor(input: InputRequirement, output: OutputRule) -> ExchangeDescriptor {
        ExchangeDescriptor {
            command: "test".into(),
            description: String::new(),
            input,
            output,
        }
    }

    #[test]
    fn fields_requirement_checks_type() {
        let wants_int = InputRequirement::Fields {
            fields: vec![Field::new("a", DataType::Int64, true)],
        };
        let wants_float = InputRequirement::Fields {
            fields: vec![Field::new("a", DataType::Float64, true)],
        };
        assert!(wants_int.accepts(&input()));
        assert!(!wants_float.accepts(&input()));
    }

    #[test]
    fn columns_requirement_ignores_type() {
        let req = InputRequirement::Columns {
            names: vec!["b".into()],
        };
        assert!(req.accepts(&input()));
        let missing = InputRequirement::Columns {
            names: vec!["z".into()],
        };
        assert!(!missing.accepts(&input()));
    }

    #[test]
    fn negotiation_is_idempotent() {
        let d = descriptor(
            InputRequirement::Any,
            OutputRule::Append {
                fields: vec![Field::new("c", DataType::Int64, true)],
            },
        );
        let first = d.negotiate(&input()).unwrap();
        let second = d.negotiate(&input()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.fields().len(), 3);
    }

    #[test]
    fn rejected_input_is_invalid_argument() {
        let d = descriptor(
            InputRequirement::Columns {
                names: vec!["missing".into()],
            },
            OutputRule::SameAsInput,
        );
        assert!(matches!(d.negotiate(&input()), Err(FlightError::InvalidArgument(_))));
    }

    #[test]
    fn project_keeps_requested_order() {
        let rule = OutputRule::Project {
            columns: vec!["b".into(), "a".into()],
        };
        let out = rule.output_schema(&input()).unwrap();
        assert_eq!(out.field(0).name(), "b");
        assert_eq!(out.field(1).name(), "a");
    }

    #[test]
    fn append_rejects_duplicate_column() {
        let rule = OutputRule::Append {
            fields: vec![Field::new("a", DataType::Int64, true)],
        };
        assert!(rule.output_schema(&input()).is_err());
    }

    #[test]
    fn descriptor_survives_json() {
        let d = descriptor(
            InputRequirement::Fields {
                fields: vec![Field::new("a", DataType::Int64, true)],
            },
            OutputRule::Fixed {
                fields: vec![Field::new("total", DataType::Int64, true)],
            },
        );
        let json = serde_json::to_string(&d).unwrap();
        let back: ExchangeDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }
}
