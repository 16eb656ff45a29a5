//! Indexer agent (spec §4.4): assigns ids/hashes are already computed by the
//! parser, so this agent's job is transactional persistence — upsert
//! entities, resolve relationship endpoints against the current batch and
//! the existing store, clean up stale entities, and publish `index:updated`
//! then `semantic:new_entities` in that order after the transaction commits
//! (spec §5 ordering guarantee).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::bus::KnowledgeBus;
use crate::error::EngineError;
use crate::model::{Entity, GraphId, Relationship, Task, TaskPayload};
use crate::storage::GraphStore;

use super::base::AgentWorker;

pub struct IndexerAgent {
    store: Arc<GraphStore>,
    bus: Arc<KnowledgeBus>,
}

impl IndexerAgent {
    pub fn new(store: Arc<GraphStore>, bus: Arc<KnowledgeBus>) -> Self {
        Self { store, bus }
    }

    /// Resolves each relationship's endpoints against the just-inserted
    /// batch plus the existing store (spec §4.4), dropping edges whose
    /// endpoint resolves to neither with a structured warning rather than
    /// failing the whole file.
    ///
    /// Endpoints already carry the entity's id by the time a relationship
    /// reaches here (parsers build relationships from the `Entity` values
    /// they just constructed, so same-batch edges are already id-correct);
    /// what's missing before this fix was the "existing store" half of that
    /// lookup, which is what makes a cross-file edge (entity indexed in an
    /// earlier file of the same run, or a previous run entirely) resolvable.
    async fn resolve_relationships(
        &self,
        relationships: Vec<Relationship>,
        by_id: &HashMap<GraphId, &Entity>,
    ) -> Vec<Relationship> {
        let mut resolved = Vec::with_capacity(relationships.len());
        for relationship in relationships {
            let from_ok = by_id.contains_key(&relationship.from_id) || self.entity_exists(relationship.from_id).await;
            let to_ok = by_id.contains_key(&relationship.to_id) || self.entity_exists(relationship.to_id).await;
            if from_ok && to_ok {
                resolved.push(relationship);
            } else {
                tracing::warn!(
                    from_id = %relationship.from_id,
                    to_id = %relationship.to_id,
                    relationship_type = relationship.relationship_type.as_str(),
                    "indexer: dropping relationship with unresolvable endpoint",
                );
            }
        }
        resolved
    }

    async fn entity_exists(&self, id: GraphId) -> bool {
        matches!(self.store.get_entity(id).await, Ok(Some(_)))
    }

    /// Indexes one file's parsed entities/relationships: upserts entities,
    /// resolves and upserts relationships, removes stale entities whose hash
    /// no longer appears, then emits the two bus events (spec §4.4).
    pub async fn index_file(
        &self,
        file_path: &str,
        entities: Vec<Entity>,
        relationships: Vec<Relationship>,
    ) -> Result<serde_json::Value, EngineError> {
        let current_hashes: HashSet<String> = entities.iter().map(|e| e.hash.clone()).collect();

        let summary = self.store.upsert_entities(entities.clone()).await?;

        let by_id: HashMap<GraphId, &Entity> = entities.iter().map(|e| (e.id, e)).collect();
        let resolved = self.resolve_relationships(relationships, &by_id).await;
        let rel_count = if resolved.is_empty() {
            0
        } else {
            self.store.upsert_relationships(resolved).await?
        };

        let removed = self
            .store
            .delete_stale_entities(file_path.to_string(), current_hashes)
            .await?;

        self.bus.publish(
            "index:updated",
            serde_json::json!({
                "filePath": file_path,
                "inserted": summary.inserted,
                "updated": summary.updated,
                "unchanged": summary.unchanged,
                "relationships": rel_count,
                "removed": removed.len(),
            }),
            "indexer",
            None,
        );

        self.bus.publish(
            "semantic:new_entities",
            serde_json::json!({"filePath": file_path, "entities": entities}),
            "indexer",
            None,
        );

        Ok(serde_json::json!({
            "filePath": file_path,
            "inserted": summary.inserted,
            "updated": summary.updated,
            "unchanged": summary.unchanged,
            "relationshipsIndexed": rel_count,
            "staleRemoved": removed.len(),
        }))
    }
}

#[async_trait]
impl AgentWorker for IndexerAgent {
    fn agent_type(&self) -> &'static str {
        "indexer"
    }

    fn accepts(&self, task: &Task) -> bool {
        matches!(task.payload, TaskPayload::IndexFile { .. })
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
        let TaskPayload::IndexFile {
            entities,
            relationships,
            file_path,
        } = &task.payload
        else {
            return Err(EngineError::invalid("indexer agent received a non-index-file task"));
        };
        self.index_file(file_path, entities.clone(), relationships.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Location, Position, RelationshipType};
    use crate::storage::SqliteManager;

    async fn agent() -> (IndexerAgent, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SqliteManager::open(dir.path().join("idx.db"), 1).unwrap());
        let store = Arc::new(GraphStore::new(manager));
        store.ensure_schema().await.unwrap();
        let bus = Arc::new(KnowledgeBus::new());
        (IndexerAgent::new(store, bus), dir)
    }

    fn loc(i: u32) -> Location {
        Location {
            start: Position::with_index(1, 0, i),
            end: Position::with_index(2, 0, i + 10),
        }
    }

    #[tokio::test]
    async fn indexing_publishes_index_updated_then_semantic_new_entities() {
        let (agent, _dir) = agent().await;
        let mut rx_index = agent.bus.subscribe("index:updated");
        let mut rx_semantic = agent.bus.subscribe("semantic:new_entities");

        let entity = Entity::new("parse", EntityType::Function, "src/lib.rs", loc(0));
        agent.index_file("src/lib.rs", vec![entity], vec![]).await.unwrap();

        let index_evt = rx_index.recv().await.unwrap();
        let semantic_evt = rx_semantic.recv().await.unwrap();
        assert!(index_evt.timestamp <= semantic_evt.timestamp);
    }

    #[tokio::test]
    async fn relationships_with_unknown_endpoints_are_dropped_not_fatal() {
        let (agent, _dir) = agent().await;
        let a = Entity::new("A", EntityType::Class, "src/a.rs", loc(0));
        let bogus_rel = Relationship::new(a.id, crate::model::new_id(), RelationshipType::Calls);
        let result = agent.index_file("src/a.rs", vec![a], vec![bogus_rel]).await.unwrap();
        assert_eq!(result["relationshipsIndexed"], 0);
    }

    #[tokio::test]
    async fn relationships_crossing_a_previously_indexed_file_resolve_against_the_store() {
        let (agent, _dir) = agent().await;
        let a = Entity::new("A", EntityType::Class, "src/a.rs", loc(0));
        agent.index_file("src/a.rs", vec![a.clone()], vec![]).await.unwrap();

        let b = Entity::new("B", EntityType::Class, "src/b.rs", loc(1));
        let cross_file_rel = Relationship::new(b.id, a.id, RelationshipType::Extends);
        let result = agent.index_file("src/b.rs", vec![b], vec![cross_file_rel]).await.unwrap();
        assert_eq!(result["relationshipsIndexed"], 1);
    }
}
