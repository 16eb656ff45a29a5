//! Dev agent (spec §4.5): walks a directory, batches files, synthesizes
//! entities/relationships through the parser agent's pipeline (which falls
//! back to heuristic synthesis), and indexes each file through the indexer
//! agent. Reports per-batch progress and final counts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::KnowledgeBus;
use crate::error::EngineError;
use crate::ingest::{batcher, walker};
use crate::model::{Task, TaskPayload};

use super::base::AgentWorker;
use super::indexer::IndexerAgent;
use super::parser::ParserAgent;

pub struct DevAgent {
    parser: Arc<ParserAgent>,
    indexer: Arc<IndexerAgent>,
    bus: Arc<KnowledgeBus>,
    default_batch_size: usize,
    default_concurrency: usize,
    effective_concurrency: AtomicUsize,
}

#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct DevRunSummary {
    pub files_processed: usize,
    pub entities_extracted: usize,
    pub relationships_created: usize,
    pub errors: usize,
}

impl DevAgent {
    pub fn new(parser: Arc<ParserAgent>, indexer: Arc<IndexerAgent>, bus: Arc<KnowledgeBus>, default_concurrency: usize) -> Arc<Self> {
        let agent = Arc::new(Self {
            parser,
            indexer,
            bus,
            default_batch_size: batcher::DEFAULT_BATCH_SIZE,
            default_concurrency: default_concurrency.max(1),
            effective_concurrency: AtomicUsize::new(default_concurrency.max(1)),
        });
        agent.clone().spawn_resource_listener();
        agent
    }

    fn spawn_resource_listener(self: Arc<Self>) {
        let mut receiver = self.bus.subscribe("resources:adjusted");
        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                if let Some(new_limit) = entry.data.get("newAgentLimit").and_then(|v| v.as_u64()) {
                    self.effective_concurrency.store((new_limit as usize).max(1), Ordering::Relaxed);
                }
            }
        });
    }

    fn batch_size(&self) -> usize {
        let effective = self.effective_concurrency.load(Ordering::Relaxed);
        batcher::adjusted_batch_size(self.default_batch_size, self.default_concurrency, effective)
    }

    /// Walks `directory`, batches the resulting files, and runs each file
    /// through parse-then-index, reporting `dev:progress` after each batch
    /// and returning final counts (spec §4.5).
    pub async fn run(&self, directory: &str, exclude_patterns: Vec<String>) -> Result<DevRunSummary, EngineError> {
        let options = walker::WalkOptions {
            exclude_patterns,
            ..Default::default()
        };
        let files = walker::walk(directory, &options);
        let batch_size = batcher::effective_batch_size(self.batch_size());
        let batches = batcher::batches(&files, batch_size);

        let mut summary = DevRunSummary::default();

        for (batch_index, batch) in batches.iter().enumerate() {
            let outcomes = self.parser.parse_batch(batch, batch.len().max(1)).await;
            for outcome in outcomes {
                match outcome {
                    super::parser::FileParseOutcome::Ok {
                        file_path,
                        entities,
                        relationships,
                    } => {
                        summary.entities_extracted += entities.len();
                        summary.relationships_created += relationships.len();
                        summary.files_processed += 1;
                        if let Err(err) = self.indexer.index_file(&file_path, entities, relationships).await {
                            tracing::warn!(file = %file_path, error = %err, "dev agent: indexing failed for file");
                            summary.errors += 1;
                        }
                    }
                    super::parser::FileParseOutcome::Err { file_path, message } => {
                        tracing::warn!(file = %file_path, %message, "dev agent: parse failed for file");
                        summary.errors += 1;
                    }
                }
            }

            self.bus.publish(
                "dev:progress",
                serde_json::json!({
                    "directory": directory,
                    "batch": batch_index,
                    "batchCount": batches.len(),
                    "filesProcessed": summary.files_processed,
                }),
                "devAgent",
                None,
            );
        }

        Ok(summary)
    }
}

#[async_trait]
impl AgentWorker for DevAgent {
    fn agent_type(&self) -> &'static str {
        "dev"
    }

    fn accepts(&self, task: &Task) -> bool {
        matches!(task.payload, TaskPayload::Index { .. })
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
        let TaskPayload::Index {
            directory,
            exclude_patterns,
            ..
        } = &task.payload
        else {
            return Err(EngineError::invalid("dev agent received a non-index task"));
        };
        let summary = self.run(directory, exclude_patterns.clone()).await?;
        serde_json::to_value(summary).map_err(|e| EngineError::invalid(e.to_string()))
    }
}
