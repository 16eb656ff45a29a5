//! `SemanticEngine`: ties the embedder, vector store, hybrid search, clone
//! detection, and circuit breaker together behind the operation surface
//! listed in spec §4.7.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::bus::KnowledgeBus;
use crate::error::EngineError;
use crate::metrics::VectorSearchMetrics;
use crate::model::{Embedding, EmbeddingId, Entity, GraphId};
use crate::storage::{GraphStore, VectorStore};

use super::circuit_breaker::{CircuitBreaker, CircuitState};
use super::clones::{detect_clones as cluster_clones, CloneGroup};
use super::embedder::Embedder;
use super::hybrid::{blend, HybridHit, DEFAULT_ALPHA};

/// A search or embedding result annotated with whether it came from the
/// circuit breaker's fallback path (spec §4.7: "degraded responses carry a
/// flag so the caller can indicate reduced confidence").
#[derive(Debug, Clone)]
pub struct Degradable<T> {
    pub value: T,
    pub degraded: bool,
}

pub struct SemanticEngine {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorStore>,
    graph_store: Arc<GraphStore>,
    breaker: CircuitBreaker,
    alpha: f32,
    batch_size: usize,
    entity_cache: RwLock<HashMap<GraphId, Entity>>,
    vector_search_metrics: Arc<VectorSearchMetrics>,
}

impl SemanticEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<GraphStore>,
    ) -> Self {
        Self::with_metrics(embedder, vector_store, graph_store, Arc::new(VectorSearchMetrics::default()))
    }

    /// Like [`Self::new`], but records vector search latency into a shared
    /// registry instead of a private, unreachable one (spec §6 `get_metrics`
    /// `vectorSearch` section).
    pub fn with_metrics(
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorStore>,
        graph_store: Arc<GraphStore>,
        vector_search_metrics: Arc<VectorSearchMetrics>,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            graph_store,
            breaker: CircuitBreaker::new(),
            alpha: DEFAULT_ALPHA,
            batch_size: 32,
            entity_cache: RwLock::new(HashMap::new()),
            vector_search_metrics,
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Vector store occupancy for the `get_metrics` `semanticAgent` section.
    pub async fn vector_stats(&self) -> Result<crate::storage::VectorStats, EngineError> {
        Ok(self.vector_store.stats().await?)
    }

    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    /// `generateCodeEmbedding(code)`: guarded by the circuit breaker. On
    /// `OPEN`, returns a zero vector flagged as degraded rather than erroring.
    pub async fn generate_code_embedding(&self, code: &str) -> Degradable<Vec<f32>> {
        if !self.breaker.allow() {
            return Degradable {
                value: vec![0.0; self.embedder.dimension()],
                degraded: true,
            };
        }
        match self.embedder.generate(code).await {
            Ok(vector) => {
                self.breaker.record_success();
                Degradable {
                    value: vector,
                    degraded: false,
                }
            }
            Err(_) => {
                self.breaker.record_failure();
                Degradable {
                    value: vec![0.0; self.embedder.dimension()],
                    degraded: true,
                }
            }
        }
    }

    /// `semanticSearch(query, limit)`: embeds the query, runs a vector KNN
    /// search, blends with lexical matches. Falls back to empty results on
    /// an open circuit.
    pub async fn semantic_search(&self, query: &str, limit: usize) -> Degradable<Vec<HybridHit>> {
        if !self.breaker.allow() {
            return Degradable {
                value: Vec::new(),
                degraded: true,
            };
        }
        let query_vector = match self.embedder.generate(query).await {
            Ok(v) => {
                self.breaker.record_success();
                v
            }
            Err(_) => {
                self.breaker.record_failure();
                return Degradable {
                    value: Vec::new(),
                    degraded: true,
                };
            }
        };
        let search_started = Instant::now();
        let search_result = self.vector_store.search(&query_vector, limit.max(10) * 2).await;
        self.vector_search_metrics.record(search_started.elapsed());
        let hits = match search_result {
            Ok(h) => h,
            Err(_) => {
                return Degradable {
                    value: Vec::new(),
                    degraded: true,
                }
            }
        };
        let entities = self.entity_cache.read().await.clone();
        Degradable {
            value: blend(query, hits, &entities, self.alpha, limit),
            degraded: false,
        }
    }

    /// `findSimilarCode(code, threshold)`: embeds `code` and returns vector
    /// hits at or above `threshold` cosine similarity.
    pub async fn find_similar_code(&self, code: &str, threshold: f32) -> Degradable<Vec<crate::storage::VectorHit>> {
        let embedding = self.generate_code_embedding(code).await;
        if embedding.degraded {
            return Degradable {
                value: Vec::new(),
                degraded: true,
            };
        }
        let search_started = Instant::now();
        let search_result = self.vector_store.search(&embedding.value, 50).await;
        self.vector_search_metrics.record(search_started.elapsed());
        match search_result {
            Ok(hits) => Degradable {
                value: hits.into_iter().filter(|h| h.score >= threshold).collect(),
                degraded: false,
            },
            Err(_) => Degradable {
                value: Vec::new(),
                degraded: true,
            },
        }
    }

    /// Resolves a `scope` (file path prefix, e.g. `"src/parser/"` or an
    /// exact file path) to the embedding ids of entities cached under it,
    /// for callers of [`Self::detect_clones`] that only know a scope rather
    /// than explicit ids.
    pub async fn embedding_ids_in_scope(&self, scope: &str) -> Vec<EmbeddingId> {
        self.entity_cache
            .read()
            .await
            .values()
            .filter(|e| e.file_path == scope || e.file_path.starts_with(scope))
            .map(|e| EmbeddingId::for_entity(e.id))
            .collect()
    }

    /// `detectClones(minSimilarity)`: loads every stored embedding id+vector
    /// and clusters them with single-linkage clustering.
    pub async fn detect_clones(&self, min_similarity: f32, ids: &[EmbeddingId]) -> Vec<CloneGroup> {
        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(Some(embedding)) = self.vector_store.get(id).await {
                if !embedding.vector.is_empty() {
                    items.push((id.clone(), embedding.vector));
                }
            }
        }
        cluster_clones(&items, min_similarity)
    }

    /// `analyzeCodeSemantics(code)`: a lightweight structural summary used
    /// when a full embedding call is undesirable (no network/model call).
    pub fn analyze_code_semantics(&self, code: &str) -> CodeSemantics {
        CodeSemantics {
            line_count: code.lines().count(),
            token_estimate: code.split_whitespace().count(),
        }
    }

    /// `crossLanguageSearch(query, langs)`: `semanticSearch` filtered to the
    /// requested languages via entity metadata, since embeddings themselves
    /// are language-agnostic vectors.
    pub async fn cross_language_search(&self, query: &str, langs: &[String], limit: usize) -> Degradable<Vec<HybridHit>> {
        let result = self.semantic_search(query, limit * 4).await;
        if result.degraded {
            return result;
        }
        let entities = self.entity_cache.read().await;
        let filtered: Vec<HybridHit> = result
            .value
            .into_iter()
            .filter(|hit| {
                entities
                    .get(&hit.entity_id)
                    .and_then(|e| e.language.as_deref())
                    .map(|lang| langs.iter().any(|l| l.eq_ignore_ascii_case(lang)))
                    .unwrap_or(false)
            })
            .take(limit)
            .collect();
        Degradable {
            value: filtered,
            degraded: false,
        }
    }

    /// `suggestRefactoring(code)`: surfaces the clones `code` belongs to as
    /// refactoring candidates; never calls out to an external model.
    pub async fn suggest_refactoring(&self, code: &str, threshold: f32) -> Degradable<Vec<crate::storage::VectorHit>> {
        self.find_similar_code(code, threshold).await
    }

    /// Handles `semantic:new_entities`: extracts an embedding-friendly text
    /// per entity and upserts vectors under `ent:<entityId>` (spec §4.7).
    pub async fn handle_new_entities(&self, entities: Vec<Entity>, bus: &KnowledgeBus) {
        let mut cache = self.entity_cache.write().await;
        for entity in &entities {
            cache.insert(entity.id, entity.clone());
        }
        drop(cache);

        let mut texts = Vec::with_capacity(entities.len());
        for entity in &entities {
            texts.push(embeddable_text(entity).await);
        }
        let text_refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        for chunk_entities in entities.chunks(self.batch_size) {
            let start = entities.iter().position(|e| e.id == chunk_entities[0].id).unwrap_or(0);
            let chunk_texts = &text_refs[start..start + chunk_entities.len()];
            let vectors = if self.breaker.allow() {
                match self.embedder.generate_batch(chunk_texts).await {
                    Ok(v) => {
                        self.breaker.record_success();
                        Some(v)
                    }
                    Err(_) => {
                        self.breaker.record_failure();
                        None
                    }
                }
            } else {
                None
            };

            let Some(vectors) = vectors else { continue };
            for ((entity, vector), text) in chunk_entities.iter().zip(vectors).zip(chunk_texts) {
                let mut metadata = HashMap::new();
                metadata.insert("path".to_string(), serde_json::json!(entity.file_path));
                metadata.insert("type".to_string(), serde_json::json!(entity.entity_type.as_str()));
                metadata.insert("name".to_string(), serde_json::json!(entity.name));
                metadata.insert("language".to_string(), serde_json::json!(entity.language));
                metadata.insert(
                    "byteRange".to_string(),
                    serde_json::json!([entity.location.start_index(), entity.location.end.index]),
                );
                metadata.insert("model".to_string(), serde_json::json!("configured-embedder"));

                let mut embedding = Embedding::new(EmbeddingId::for_entity(entity.id), (*text).to_string(), vector);
                embedding.metadata = metadata;
                let _ = self.vector_store.upsert(embedding).await;
            }
        }

        bus.publish(
            "semantic:embeddings:complete",
            serde_json::json!({"count": entities.len()}),
            "semanticEngine",
            None,
        );
    }

    /// Loads the full entity set from storage into the lexical-search cache;
    /// called at startup and after a bulk re-index.
    pub async fn refresh_entity_cache(&self) -> Result<(), EngineError> {
        let entities = self.graph_store.all_entities().await?;
        let mut cache = self.entity_cache.write().await;
        cache.clear();
        for entity in entities {
            cache.insert(entity.id, entity);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CodeSemantics {
    pub line_count: usize,
    pub token_estimate: usize,
}

/// Header line + source slice when file/location ranges are known,
/// otherwise just the header (spec §4.7).
async fn embeddable_text(entity: &Entity) -> String {
    let header = format!("{} {} {}", entity.entity_type.as_str(), entity.name, entity.file_path);

    let (Some(start), Some(end)) = (entity.location.start.index, entity.location.end.index) else {
        return header;
    };
    let (start, end) = (start as usize, end as usize);

    let Ok(source) = tokio::fs::read_to_string(&entity.file_path).await else {
        return header;
    };
    if start >= end || end > source.len() || !source.is_char_boundary(start) || !source.is_char_boundary(end) {
        return header;
    }

    format!("{header}\n{}", &source[start..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Location, Position};
    use crate::semantic::embedder::MemoryEmbedder;
    use crate::storage::{FallbackVectorStore, SqliteManager};

    async fn engine() -> (SemanticEngine, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SqliteManager::open(dir.path().join("semantic.db"), 1).unwrap());
        let graph_store = Arc::new(GraphStore::new(manager.clone()));
        graph_store.ensure_schema().await.unwrap();
        let vector_store: Arc<dyn VectorStore> = Arc::new(FallbackVectorStore::open(manager, 8).await.unwrap());
        let embedder: Arc<dyn Embedder> = Arc::new(MemoryEmbedder::new(8));
        (SemanticEngine::new(embedder, vector_store, graph_store), dir)
    }

    #[tokio::test]
    async fn semantic_search_degrades_gracefully_when_circuit_is_open() {
        let (engine, _dir) = engine().await;
        for _ in 0..5 {
            engine.breaker.record_failure();
        }
        let result = engine.semantic_search("parse", 5).await;
        assert!(result.degraded);
        assert!(result.value.is_empty());
    }

    #[tokio::test]
    async fn new_entities_are_embedded_and_become_searchable() {
        let (engine, _dir) = engine().await;
        let bus = KnowledgeBus::new();
        let entity = Entity::new(
            "parse_config",
            EntityType::Function,
            "src/config.rs",
            Location {
                start: Position::new(1, 0),
                end: Position::new(5, 0),
            },
        );
        engine.handle_new_entities(vec![entity.clone()], &bus).await;
        let stored = engine.vector_store.get(&EmbeddingId::for_entity(entity.id)).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn embeddable_text_falls_back_to_header_when_location_has_no_byte_offsets() {
        let entity = Entity::new(
            "parse_config",
            EntityType::Function,
            "src/config.rs",
            Location {
                start: Position::new(1, 0),
                end: Position::new(5, 0),
            },
        );
        let text = embeddable_text(&entity).await;
        assert_eq!(text, "function parse_config src/config.rs");
    }

    #[tokio::test]
    async fn embeddable_text_appends_the_source_slice_when_byte_offsets_are_known() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("config.rs");
        tokio::fs::write(&file_path, "fn parse_config() -> Config {\n    todo!()\n}\n").await.unwrap();

        let mut start = Position::new(1, 0);
        start.index = Some(0);
        let mut end = Position::new(1, 30);
        end.index = Some(29);

        let entity = Entity::new(
            "parse_config",
            EntityType::Function,
            file_path.to_str().unwrap(),
            Location { start, end },
        );

        let text = embeddable_text(&entity).await;
        assert!(text.ends_with("fn parse_config() -> Config {"), "got: {text}");
    }

    #[tokio::test]
    async fn semantic_search_records_vector_search_latency() {
        let (engine, _dir) = engine().await;
        engine.semantic_search("parse", 5).await;
        let snapshot = engine.vector_search_metrics.snapshot();
        assert_eq!(snapshot.count, 1);
    }
}
