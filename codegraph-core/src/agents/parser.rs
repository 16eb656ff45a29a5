//! Parser agent (spec §4.3): turns a batch of file paths into entities and
//! relationships. Parsing is deterministic and per-file; one file's failure
//! never aborts the rest of the batch.

use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::{Entity, Relationship, Task, TaskPayload};

use super::base::AgentWorker;

/// Per-file parse outcome: either the extracted graph fragments or an error
/// that the caller records and continues past (spec §4.3: "partial results
/// on per-file error").
pub enum FileParseOutcome {
    Ok {
        file_path: String,
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    },
    Err {
        file_path: String,
        message: String,
    },
}

/// Parses one file's source text into entities/relationships. Implementors
/// back this with tree-sitter grammars; the heuristic ingest path
/// (`ingest::heuristic`) is the fallback used when no such parser exists for
/// a file's language.
pub trait SourceParser: Send + Sync {
    fn supports(&self, file_path: &str) -> bool;
    fn parse(&self, file_path: &str, source: &str) -> Result<(Vec<Entity>, Vec<Relationship>), EngineError>;
}

pub struct ParserAgent {
    parsers: Vec<Box<dyn SourceParser>>,
}

impl ParserAgent {
    pub fn new(parsers: Vec<Box<dyn SourceParser>>) -> Self {
        Self { parsers }
    }

    fn parser_for(&self, file_path: &str) -> Option<&dyn SourceParser> {
        self.parsers.iter().find(|p| p.supports(file_path)).map(|p| p.as_ref())
    }

    /// Parses `files`, respecting `batch_size` by chunking reads; returns one
    /// [`FileParseOutcome`] per file regardless of individual failures.
    pub async fn parse_batch(&self, files: &[String], batch_size: usize) -> Vec<FileParseOutcome> {
        let mut outcomes = Vec::with_capacity(files.len());
        for chunk in files.chunks(batch_size.max(1)) {
            for file_path in chunk {
                match self.parse_one(file_path).await {
                    Ok((entities, relationships)) => outcomes.push(FileParseOutcome::Ok {
                        file_path: file_path.clone(),
                        entities,
                        relationships,
                    }),
                    Err(message) => outcomes.push(FileParseOutcome::Err {
                        file_path: file_path.clone(),
                        message,
                    }),
                }
            }
        }
        outcomes
    }

    async fn parse_one(&self, file_path: &str) -> Result<(Vec<Entity>, Vec<Relationship>), String> {
        let source = tokio::fs::read_to_string(file_path)
            .await
            .map_err(|e| format!("read failed: {e}"))?;
        match self.parser_for(file_path) {
            Some(parser) => parser.parse(file_path, &source).map_err(|e| e.to_string()),
            None => crate::ingest::heuristic::synthesize(file_path, &source).map_err(|e| e.to_string()),
        }
    }
}

#[async_trait]
impl AgentWorker for ParserAgent {
    fn agent_type(&self) -> &'static str {
        "parser"
    }

    fn accepts(&self, task: &Task) -> bool {
        matches!(task.payload, TaskPayload::Parse { .. })
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
        let TaskPayload::Parse { files, batch_size, .. } = &task.payload else {
            return Err(EngineError::invalid("parser agent received a non-parse task"));
        };

        let outcomes = self.parse_batch(files, *batch_size).await;
        let mut entities = Vec::new();
        let mut relationships = Vec::new();
        let mut errors = Vec::new();

        for outcome in outcomes {
            match outcome {
                FileParseOutcome::Ok {
                    entities: e,
                    relationships: r,
                    ..
                } => {
                    entities.extend(e);
                    relationships.extend(r);
                }
                FileParseOutcome::Err { file_path, message } => {
                    errors.push(serde_json::json!({"filePath": file_path, "message": message}));
                }
            }
        }

        Ok(serde_json::json!({
            "entities": entities,
            "relationships": relationships,
            "errors": errors,
        }))
    }
}
