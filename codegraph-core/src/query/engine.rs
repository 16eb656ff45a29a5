//! The query agent's engine: wraps storage reads with a concurrency
//! limiter and the LRU query cache, and implements every operation listed
//! in spec §4.6.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::bus::KnowledgeBus;
use crate::model::{Entity, GraphId, Relationship, RelationshipType};
use crate::storage::{EntityFilter, GraphStore};

use super::cache::{CacheStats, GraphQuery, QueryCache};
use super::cycles::{detect_cycles, CycleReport};
use super::graph_view::GraphView;
use super::hotspots::{analyze_hotspots, HotspotEntry, HotspotWeights};
use super::impact::{analyze_impact, calculate_change_ripple, find_dependencies, ImpactReport};
use super::traversal::{find_path, related_entities, subgraph};

#[derive(Debug, Serialize, Clone, Default)]
pub struct QueryEngineStats {
    pub cache: CacheStatsView,
    pub max_concurrency: usize,
}

#[derive(Debug, Serialize, Clone, Default)]
pub struct CacheStatsView {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl From<CacheStats> for CacheStatsView {
    fn from(s: CacheStats) -> Self {
        Self {
            hits: s.hits,
            misses: s.misses,
            evictions: s.evictions,
        }
    }
}

/// Owns the query cache and a concurrency limiter that is *replaced* (not
/// resized) whenever `resources:adjusted` fires (spec §4.6).
pub struct QueryEngine {
    store: Arc<GraphStore>,
    cache: QueryCache,
    limiter: ArcSwap<Semaphore>,
    default_max_concurrency: usize,
    effective_max_concurrency: AtomicUsize,
    hotspot_weights: HotspotWeights,
}

impl QueryEngine {
    pub fn new(store: Arc<GraphStore>, max_concurrency: usize, hotspot_weights: HotspotWeights) -> Self {
        Self {
            store,
            cache: QueryCache::default(),
            limiter: ArcSwap::from_pointee(Semaphore::new(max_concurrency.max(1))),
            default_max_concurrency: max_concurrency.max(1),
            effective_max_concurrency: AtomicUsize::new(max_concurrency.max(1)),
            hotspot_weights,
        }
    }

    /// Replaces the concurrency limiter with a fresh semaphore clamped to
    /// `[1, defaultMaxConcurrency*2]` (spec §8 testable property).
    pub fn adjust_concurrency(&self, new_limit: usize) {
        let clamped = new_limit.clamp(1, self.default_max_concurrency * 2);
        self.limiter.store(Arc::new(Semaphore::new(clamped)));
        self.effective_max_concurrency.store(clamped, Ordering::Relaxed);
    }

    pub fn effective_max_concurrency(&self) -> usize {
        self.effective_max_concurrency.load(Ordering::Relaxed)
    }

    /// Evicts cached queries referencing `file_path` and republishes
    /// `cache:invalidated` with the evicted hashes (spec §4.6).
    pub fn invalidate_for_file(&self, bus: &KnowledgeBus, file_path: &str) {
        let evicted = self.cache.invalidate_for_file(file_path);
        if !evicted.is_empty() {
            bus.publish(
                "cache:invalidated",
                serde_json::json!({"filePath": file_path, "hashes": evicted}),
                "queryEngine",
                None,
            );
        }
    }

    pub fn stats(&self) -> QueryEngineStats {
        QueryEngineStats {
            cache: self.cache.stats().into(),
            max_concurrency: self.effective_max_concurrency(),
        }
    }

    async fn view(&self) -> Result<GraphView, crate::storage::StorageError> {
        let entities = self.store.all_entities().await?;
        let relationships = self.store.all_relationships().await?;
        Ok(GraphView::build(entities, relationships))
    }

    async fn permit(&self) -> tokio::sync::OwnedSemaphorePermit {
        self.limiter
            .load_full()
            .acquire_owned()
            .await
            .expect("query concurrency limiter is never closed")
    }

    /// Runs `op` under the concurrency limiter, consulting and populating
    /// the query cache under `query`'s canonical hash.
    async fn cached<F, Fut, T>(&self, query: GraphQuery, op: F) -> Result<T, crate::storage::StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, crate::storage::StorageError>>,
        T: Serialize + serde::de::DeserializeOwned,
    {
        let hash = query.hash();
        if let Some(cached) = self.cache.get(&hash) {
            if let Ok(value) = serde_json::from_value(cached) {
                return Ok(value);
            }
        }
        let _permit = self.permit().await;
        let result = op().await?;
        if let Ok(value) = serde_json::to_value(&result) {
            self.cache.put(hash, value, query.referenced_paths);
        }
        Ok(result)
    }

    pub async fn get_entity(&self, id: GraphId) -> Result<Option<Entity>, crate::storage::StorageError> {
        self.store.get_entity(id).await
    }

    pub async fn list_entities(&self, filter: EntityFilter) -> Result<Vec<Entity>, crate::storage::StorageError> {
        let paths = filter.file_path.clone().into_iter().collect();
        let query = GraphQuery::new(
            "listEntities",
            serde_json::json!({"filePath": filter.file_path, "entityTypes": filter.entity_types}),
            paths,
        );
        let filter2 = filter.clone();
        self.cached(query, || async move { self.store.list_entities(filter2).await }).await
    }

    pub async fn get_relationships(
        &self,
        entity_id: GraphId,
        relationship_type: Option<RelationshipType>,
    ) -> Result<Vec<Relationship>, crate::storage::StorageError> {
        self.store.get_relationships(entity_id, relationship_type).await
    }

    pub async fn get_related_entities(&self, entity_id: GraphId, depth: usize) -> Result<Vec<GraphId>, crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(related_entities(&view, entity_id, depth))
    }

    pub async fn find_path(&self, from: GraphId, to: GraphId) -> Result<Option<Vec<GraphId>>, crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(find_path(&view, from, to))
    }

    pub async fn get_subgraph(&self, root: GraphId, depth: usize) -> Result<(Vec<GraphId>, Vec<Relationship>), crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(subgraph(&view, root, depth))
    }

    pub async fn find_dependencies(&self, entity_id: GraphId) -> Result<Vec<GraphId>, crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(find_dependencies(&view, entity_id, 3))
    }

    pub async fn detect_cycles(&self) -> Result<CycleReport, crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(detect_cycles(&view))
    }

    pub async fn analyze_hotspots(&self, limit: usize) -> Result<Vec<HotspotEntry>, crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(analyze_hotspots(&view, self.hotspot_weights, limit))
    }

    pub async fn get_impacted_entities(&self, entity_id: GraphId, depth: usize) -> Result<ImpactReport, crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(analyze_impact(&view, entity_id, depth))
    }

    pub async fn calculate_change_ripple(&self, changes: &[GraphId], depth: usize) -> Result<ImpactReport, crate::storage::StorageError> {
        let view = self.view().await?;
        Ok(calculate_change_ripple(&view, changes, depth))
    }
}
