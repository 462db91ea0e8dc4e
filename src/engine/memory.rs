//! In-memory tabular engine.
//!
//! Understands exactly two statements:
//!
//! - `SELECT * FROM <relation>`
//! - `CREATE OR REPLACE TABLE <name> AS SELECT * FROM <relation>`
//!
//! External files are read as Arrow IPC, including through the
//! `read_parquet` action. Everything else is `Unsupported`.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::datatypes::{Schema, SchemaRef};
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use parking_lot::RwLock;

use super::{ColumnInfo, EngineError, QueryOutput, TabularEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelationKind {
    Table,
    View,
}

#[derive(Clone)]
struct Relation {
    kind: RelationKind,
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

enum Statement<'a> {
    Select { from: &'a str },
    CreateOrReplace { name: &'a str, from: &'a str },
}

/// Thread-safe map of named relations.
#[derive(Default)]
pub struct MemoryEngine {
    relations: RwLock<HashMap<String, Relation>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn relation(&self, name: &str) -> Result<Relation, EngineError> {
        self.relations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::TableNotFound(name.to_string()))
    }

    fn store(&self, name: &str, relation: Relation) {
        self.relations.write().insert(name.to_string(), relation);
    }

    fn drop_kind(&self, name: &str, kind: RelationKind) -> bool {
        let mut relations = self.relations.write();
        match relations.get(name) {
            Some(existing) if existing.kind == kind => {
                relations.remove(name);
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl TabularEngine for MemoryEngine {
    async fn execute(&self, query: &str) -> Result<QueryOutput, EngineError> {
        match parse(query)? {
            Statement::Select { from } => {
                let relation = self.relation(from)?;
                Ok(QueryOutput {
                    schema: relation.schema,
                    batches: relation.batches,
                })
            }
            Statement::CreateOrReplace { name, from } => {
                let source = self.relation(from)?;
                self.store(
                    name,
                    Relation {
                        kind: RelationKind::Table,
                        ..source
                    },
                );
                Ok(QueryOutput {
                    schema: Arc::new(Schema::empty()),
                    batches: Vec::new(),
                })
            }
        }
    }

    async fn register_temporary(
        &self,
        name: &str,
        schema: SchemaRef,
        batches: Vec<RecordBatch>,
    ) -> Result<(), EngineError> {
        if let Some(bad) = batches.iter().find(|b| b.schema() != schema) {
            return Err(EngineError::SchemaMismatch(format!(
                "batch schema {:?} does not match {:?}",
                bad.schema(),
                schema
            )));
        }
        self.store(
            name,
            Relation {
                kind: RelationKind::View,
                schema,
                batches,
            },
        );
        Ok(())
    }

    async fn list_tables(&self) -> Result<Vec<String>, EngineError> {
        let mut names: Vec<String> = self.relations.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn describe(&self, table: &str) -> Result<Vec<ColumnInfo>, EngineError> {
        let relation = self.relation(table)?;
        Ok(relation
            .schema
            .fields()
            .iter()
            .map(|f| ColumnInfo::from_field(f))
            .collect())
    }

    async fn drop_table(&self, name: &str) -> Result<(), EngineError> {
        if self.drop_kind(name, RelationKind::Table) {
            Ok(())
        } else {
            Err(EngineError::TableNotFound(name.to_string()))
        }
    }

    async fn drop_view(&self, name: &str) -> Result<(), EngineError> {
        if self.drop_kind(name, RelationKind::View) {
            Ok(())
        } else {
            Err(EngineError::ViewNotFound(name.to_string()))
        }
    }

    async fn load_external_files(&self, paths: &[PathBuf], table: &str) -> Result<(), EngineError> {
        if paths.is_empty() {
            return Err(EngineError::InvalidInput("no source files given".into()));
        }

        let mut schema: Option<SchemaRef> = None;
        let mut batches = Vec::new();
        for path in paths {
            let reader = FileReader::try_new(File::open(path)?, None)?;
            let file_schema = reader.schema();
            match &schema {
                Some(expected) if *expected != file_schema => {
                    return Err(EngineError::SchemaMismatch(format!(
                        "{} does not match the schema of the first file",
                        path.display()
                    )));
                }
                Some(_) => {}
                None => schema = Some(file_schema),
            }
            for batch in reader {
                batches.push(batch?);
            }
        }

        let schema = schema.ok_or_else(|| EngineError::InvalidInput("no schema".into()))?;
        self.store(
            table,
            Relation {
                kind: RelationKind::Table,
                schema,
                batches,
            },
        );
        Ok(())
    }
}

fn parse(query: &str) -> Result<Statement<'_>, EngineError> {
    let tokens: Vec<&str> = query.trim().trim_end_matches(';').split_whitespace().collect();
    let keyword = |i: usize, word: &str| tokens.get(i).is_some_and(|t| t.eq_ignore_ascii_case(word));

    match tokens.len() {
        4 if keyword(0, "SELECT") && keyword(1, "*") && keyword(2, "FROM") => Ok(Statement::Select {
            from: identifier(tokens[3]),
        }),
        10 if keyword(0, "CREATE")
            && keyword(1, "OR")
            && keyword(2, "REPLACE")
            && keyword(3, "TABLE")
            && keyword(5, "AS")
            && keyword(6, "SELECT")
            && keyword(7, "*")
            && keyword(8, "FROM") =>
        {
            Ok(Statement::CreateOrReplace {
                name: identifier(tokens[4]),
                from: identifier(tokens[9]),
            })
        }
        _ => Err(EngineError::Unsupported(query.to_string())),
    }
}

fn identifier(token: &str) -> &str {
    token.trim_matches('"')
}
