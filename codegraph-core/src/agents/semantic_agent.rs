//! Semantic agent (spec §4.7): thin [`AgentWorker`] dispatching onto
//! [`SemanticEngine`] by task payload query string, plus the
//! `semantic:new_entities` bus subscription that feeds embeddings in.

use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::KnowledgeBus;
use crate::error::EngineError;
use crate::model::{Entity, Task, TaskPayload};
use crate::semantic::SemanticEngine;

use super::base::AgentWorker;

pub struct SemanticAgent {
    engine: Arc<SemanticEngine>,
    bus: Arc<KnowledgeBus>,
}

impl SemanticAgent {
    pub fn new(engine: Arc<SemanticEngine>, bus: Arc<KnowledgeBus>) -> Arc<Self> {
        let agent = Arc::new(Self { engine, bus });
        agent.clone().spawn_ingest_listener();
        agent
    }

    pub fn engine(&self) -> &SemanticEngine {
        &self.engine
    }

    /// Subscribes to `semantic:new_entities` (published by the indexer after
    /// its transaction commits) and routes the batch through the embedder.
    fn spawn_ingest_listener(self: Arc<Self>) {
        let mut receiver = self.bus.subscribe("semantic:new_entities");
        tokio::spawn(async move {
            while let Some(entry) = receiver.recv().await {
                let Some(entities_json) = entry.data.get("entities") else {
                    continue;
                };
                let Ok(entities) = serde_json::from_value::<Vec<Entity>>(entities_json.clone()) else {
                    continue;
                };
                if !entities.is_empty() {
                    self.engine.handle_new_entities(entities, &self.bus).await;
                }
            }
        });
    }

    fn circuit_state_str(&self) -> String {
        format!("{:?}", self.engine.circuit_state())
    }
}

fn threshold_param(params: &serde_json::Value) -> f32 {
    params.get("threshold").and_then(|v| v.as_f64()).unwrap_or(0.5) as f32
}

#[async_trait]
impl AgentWorker for SemanticAgent {
    fn agent_type(&self) -> &'static str {
        "semantic"
    }

    fn accepts(&self, task: &Task) -> bool {
        matches!(task.payload, TaskPayload::Semantic { .. })
    }

    /// `query`'s value is either free text for `semantic_search`/
    /// `cross_language_search`, or one of `find_similar_code`,
    /// `detect_code_clones`, `suggest_refactoring` naming the op whose real
    /// input (`code`, `minSimilarity`, …) lives in `params` (spec §6).
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
        let TaskPayload::Semantic { query, limit, params } = &task.payload else {
            return Err(EngineError::invalid("semantic agent received a non-semantic task"));
        };

        match query.as_str() {
            "find_similar_code" => {
                let code = params.get("code").and_then(|v| v.as_str()).unwrap_or("");
                let result = self.engine.find_similar_code(code, threshold_param(params)).await;
                Ok(serde_json::json!({
                    "matches": result.value,
                    "degraded": result.degraded,
                    "circuitState": self.circuit_state_str(),
                }))
            }
            "detect_code_clones" => {
                let min_similarity = params
                    .get("minSimilarity")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.8) as f32;
                let ids: Vec<crate::model::EmbeddingId> = match params.get("ids") {
                    Some(v) => serde_json::from_value(v.clone()).unwrap_or_default(),
                    None => match params.get("scope").and_then(|v| v.as_str()) {
                        Some(scope) => self.engine.embedding_ids_in_scope(scope).await,
                        None => Vec::new(),
                    },
                };
                let groups = self.engine.detect_clones(min_similarity, &ids).await;
                Ok(serde_json::json!({"groups": groups}))
            }
            "suggest_refactoring" => {
                let code = params.get("code").and_then(|v| v.as_str()).unwrap_or("");
                let result = self.engine.suggest_refactoring(code, threshold_param(params)).await;
                Ok(serde_json::json!({
                    "suggestions": result.value,
                    "degraded": result.degraded,
                }))
            }
            "cross_language_search" => {
                let text = params.get("query").and_then(|v| v.as_str()).unwrap_or("");
                let langs: Vec<String> = params
                    .get("languages")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default();
                let result = self.engine.cross_language_search(text, &langs, limit.unwrap_or(10)).await;
                Ok(serde_json::json!({
                    "results": result.value,
                    "degraded": result.degraded,
                }))
            }
            _ => {
                let mut result = self.engine.semantic_search(query, limit.unwrap_or(10)).await;
                if let Some(threshold) = params.get("threshold").and_then(|v| v.as_f64()) {
                    let threshold = threshold as f32;
                    result.value.retain(|hit| hit.score >= threshold);
                }
                Ok(serde_json::json!({
                    "hits": result.value,
                    "degraded": result.degraded,
                    "circuitState": self.circuit_state_str(),
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Task, TaskPriority};
    use crate::semantic::embedder::MemoryEmbedder;
    use crate::semantic::Embedder;
    use crate::storage::{FallbackVectorStore, GraphStore, SqliteManager, VectorStore};

    async fn test_agent() -> (SemanticAgent, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SqliteManager::open(dir.path().join("semantic_agent.db"), 1).unwrap());
        let graph_store = Arc::new(GraphStore::new(manager.clone()));
        graph_store.ensure_schema().await.unwrap();
        let vector_store: Arc<dyn VectorStore> = Arc::new(FallbackVectorStore::open(manager, 8).await.unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(MemoryEmbedder::new(8));
        let engine = Arc::new(SemanticEngine::new(embedder, vector_store, graph_store));
        let bus = Arc::new(KnowledgeBus::new());
        (SemanticAgent::new(engine, bus), dir)
    }

    fn semantic_task(query: &str, params: serde_json::Value) -> Task {
        Task::new(
            TaskPayload::Semantic { query: query.to_string(), limit: None, params },
            TaskPriority::default(),
        )
    }

    #[tokio::test]
    async fn default_op_runs_semantic_search() {
        let (agent, _dir) = test_agent().await;
        let result = agent.handle(&semantic_task("hello", serde_json::Value::Null)).await.unwrap();
        assert!(result.get("hits").is_some());
    }

    #[tokio::test]
    async fn find_similar_code_reads_code_from_params() {
        let (agent, _dir) = test_agent().await;
        let result = agent
            .handle(&semantic_task("find_similar_code", serde_json::json!({"code": "fn main() {}", "threshold": 0.1})))
            .await
            .unwrap();
        assert!(result.get("matches").is_some());
    }
}
