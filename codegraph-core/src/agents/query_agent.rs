//! Query agent (spec §4.6): a thin [`AgentWorker`] dispatching onto
//! [`QueryEngine`] by task payload query string. The engine does the real
//! work; this module only maps the tool surface onto it.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::EngineError;
use crate::model::{EntityType, Task, TaskPayload};
use crate::query::QueryEngine;
use crate::storage::EntityFilter;

use super::base::AgentWorker;

pub struct QueryAgent {
    engine: Arc<QueryEngine>,
}

impl QueryAgent {
    /// Takes the engine behind an `Arc` so transport can keep its own handle
    /// for direct reads (`get_metrics`) that bypass the Conductor entirely,
    /// the same bypass the teacher's connection.rs gives `ping`/`tools_list`.
    pub fn new(engine: Arc<QueryEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }
}

fn entity_id_param(params: &serde_json::Value, key: &str) -> Result<crate::model::GraphId, EngineError> {
    let raw = params.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        EngineError::invalid(format!("missing `{key}` parameter"))
    })?;
    crate::model::parse_graph_id(raw).ok_or_else(|| EngineError::invalid(format!("bad id in `{key}`")))
}

impl QueryAgent {
    /// Resolves an entity reference that may arrive as either a raw
    /// `entityId` or a human-readable `entityName` (spec's
    /// `list_entity_relationships` names the latter). Name lookup does a
    /// full scan since storage has no name index; fine at this tool's
    /// scale, first match wins.
    async fn resolve_entity_ref(&self, params: &serde_json::Value) -> Result<crate::model::GraphId, EngineError> {
        if params.get("entityId").is_some() {
            return entity_id_param(params, "entityId");
        }
        let name = params
            .get("entityName")
            .and_then(|v| v.as_str())
            .ok_or_else(|| EngineError::invalid("missing `entityId` or `entityName` parameter"))?;
        let entities = self.engine.list_entities(EntityFilter::default()).await?;
        entities
            .into_iter()
            .find(|e| e.name == name)
            .map(|e| e.id)
            .ok_or_else(|| EngineError::invalid(format!("no entity named `{name}`")))
    }
}

#[async_trait]
impl AgentWorker for QueryAgent {
    fn agent_type(&self) -> &'static str {
        "query"
    }

    fn accepts(&self, task: &Task) -> bool {
        matches!(task.payload, TaskPayload::Query { .. })
    }

    /// `query`'s payload names an op (`list_file_entities`,
    /// `list_entity_relationships`, `analyze_code_impact`,
    /// `analyze_hotspots`, `find_related_concepts`) plus structured
    /// `params`; anything else is treated as a free-text entity listing,
    /// matching the plain `query` tool (spec §6).
    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
        let TaskPayload::Query { query, limit, params } = &task.payload else {
            return Err(EngineError::invalid("query agent received a non-query task"));
        };

        match query.as_str() {
            "list" | "query" | "" => {
                let entities = self.engine.list_entities(EntityFilter::default()).await?;
                let limited: Vec<_> = entities.into_iter().take(limit.unwrap_or(100)).collect();
                Ok(serde_json::json!({"results": limited}))
            }
            "list_file_entities" => {
                let file_path = params.get("filePath").and_then(|v| v.as_str()).map(str::to_string);
                let entity_types = params
                    .get("entityTypes")
                    .and_then(|v| serde_json::from_value::<Vec<EntityType>>(v.clone()).ok());
                let entities = self.engine.list_entities(EntityFilter { file_path, entity_types }).await?;
                Ok(serde_json::json!({"entities": entities}))
            }
            "list_entity_relationships" => {
                let entity_id = self.resolve_entity_ref(params).await?;
                let depth = params.get("depth").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
                let requested_types = params
                    .get("relationshipTypes")
                    .and_then(|v| serde_json::from_value::<Vec<crate::model::RelationshipType>>(v.clone()).ok());
                let relationships = match requested_types {
                    Some(types) if !types.is_empty() => {
                        let mut all = Vec::new();
                        for rel_type in types {
                            all.extend(self.engine.get_relationships(entity_id, Some(rel_type)).await?);
                        }
                        all
                    }
                    _ => self.engine.get_relationships(entity_id, None).await?,
                };
                let _ = depth.min(5); // depth beyond direct relationships is reached via find_related_concepts
                Ok(serde_json::json!({"relationships": relationships}))
            }
            "analyze_code_impact" => {
                let entity_id = entity_id_param(params, "entityId")?;
                let depth = params.get("depth").and_then(|v| v.as_u64()).unwrap_or(2) as usize;
                let include_indirect = params.get("includeIndirect").and_then(|v| v.as_bool()).unwrap_or(true);
                let mut report = self.engine.get_impacted_entities(entity_id, depth).await?;
                if !include_indirect {
                    report.indirect.clear();
                }
                Ok(serde_json::to_value(report).unwrap_or(serde_json::Value::Null))
            }
            "analyze_hotspots" | "hotspots" => {
                let hotspots = self.engine.analyze_hotspots(limit.unwrap_or(10)).await?;
                Ok(serde_json::json!({"items": hotspots}))
            }
            "find_related_concepts" => {
                let entity_id = entity_id_param(params, "entityId")?;
                let concept_depth = params.get("conceptDepth").and_then(|v| v.as_u64()).unwrap_or(2) as usize;
                let related_ids = self.engine.get_related_entities(entity_id, concept_depth).await?;
                let mut related = Vec::new();
                for id in related_ids.into_iter().take(limit.unwrap_or(10)) {
                    if let Some(entity) = self.engine.get_entity(id).await? {
                        related.push(entity);
                    }
                }
                Ok(serde_json::json!({"related": related}))
            }
            other => {
                if let Some(rest) = other.strip_prefix("entity:") {
                    let id = crate::model::parse_graph_id(rest)
                        .ok_or_else(|| EngineError::invalid("bad entity id"))?;
                    let entity = self.engine.get_entity(id).await?;
                    return Ok(serde_json::json!({"entity": entity}));
                }
                Err(EngineError::invalid(format!("unrecognized query op: {other}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Task, TaskPriority};
    use crate::query::QueryEngine;
    use crate::storage::{GraphStore, SqliteManager};

    async fn test_agent() -> (QueryAgent, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SqliteManager::open(dir.path().join("query.db"), 1).unwrap());
        let store = Arc::new(GraphStore::new(manager));
        store.ensure_schema().await.unwrap();
        (QueryAgent::new(Arc::new(QueryEngine::new(store, 4, Default::default()))), dir)
    }

    fn query_task(query: &str, params: serde_json::Value) -> Task {
        Task::new(
            TaskPayload::Query { query: query.to_string(), limit: None, params },
            TaskPriority::default(),
        )
    }

    #[tokio::test]
    async fn unrecognized_op_is_invalid() {
        let (agent, _dir) = test_agent().await;
        let result = agent.handle(&query_task("not_a_real_op", serde_json::Value::Null)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn list_file_entities_with_no_match_returns_empty() {
        let (agent, _dir) = test_agent().await;
        let result = agent
            .handle(&query_task("list_file_entities", serde_json::json!({"filePath": "nope.rs"})))
            .await
            .unwrap();
        assert_eq!(result["entities"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn analyze_code_impact_requires_entity_id() {
        let (agent, _dir) = test_agent().await;
        let result = agent.handle(&query_task("analyze_code_impact", serde_json::json!({}))).await;
        assert!(result.is_err());
    }
}
