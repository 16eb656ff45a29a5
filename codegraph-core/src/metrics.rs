//! Metrics aggregator behind the `get_metrics` tool response (spec §6):
//! simple atomic counters per subsystem rather than a full Prometheus stack,
//! which nothing else in this codebase pulls in either.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::query::{CacheStatsView, QueryEngineStats};
use crate::semantic::CircuitState;
use crate::storage::VectorStats;

#[derive(Debug, Default)]
pub struct VectorSearchMetrics {
    count: AtomicU64,
    total_latency_micros: AtomicU64,
}

impl VectorSearchMetrics {
    pub fn record(&self, latency: std::time::Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_latency_micros.fetch_add(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> VectorSearchSnapshot {
        let count = self.count.load(Ordering::Relaxed);
        let total = self.total_latency_micros.load(Ordering::Relaxed);
        VectorSearchSnapshot {
            count,
            avg_latency_ms: if count == 0 { 0.0 } else { (total as f64 / count as f64) / 1000.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorSearchSnapshot {
    pub count: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemorySnapshot {
    pub resident_mb: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub vector_search: VectorSearchSnapshot,
    pub memory: MemorySnapshot,
    pub query_agent: QueryEngineStats,
    pub semantic_agent: SemanticAgentSnapshot,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticAgentSnapshot {
    pub circuit_state: String,
    pub vector_store: Option<VectorStats>,
}

/// Process-wide metrics registry. One instance lives for the process
/// lifetime and is handed by `Arc` to the parts of the system that record
/// into it and the transport layer that reads it out for `get_metrics`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    pub vector_search: std::sync::Arc<VectorSearchMetrics>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle for the components that record into this registry
    /// (e.g. [`crate::semantic::SemanticEngine`]'s vector search calls).
    pub fn vector_search_handle(&self) -> std::sync::Arc<VectorSearchMetrics> {
        self.vector_search.clone()
    }

    pub async fn snapshot(
        &self,
        query_stats: QueryEngineStats,
        circuit_state: CircuitState,
        vector_stats: Option<VectorStats>,
    ) -> MetricsSnapshot {
        MetricsSnapshot {
            vector_search: self.vector_search.snapshot(),
            memory: MemorySnapshot {
                resident_mb: sample_process_memory_mb(),
            },
            query_agent: query_stats,
            semantic_agent: SemanticAgentSnapshot {
                circuit_state: format!("{circuit_state:?}"),
                vector_store: vector_stats,
            },
        }
    }
}

fn sample_process_memory_mb() -> f64 {
    let Ok(contents) = std::fs::read_to_string("/proc/self/statm") else {
        return 0.0;
    };
    let resident_pages: u64 = contents.split_whitespace().nth(1).and_then(|s| s.parse().ok()).unwrap_or(0);
    (resident_pages as f64 * 4.0) / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_search_snapshot_averages_recorded_latencies() {
        let metrics = VectorSearchMetrics::default();
        metrics.record(std::time::Duration::from_millis(10));
        metrics.record(std::time::Duration::from_millis(20));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.count, 2);
        assert!((snapshot.avg_latency_ms - 15.0).abs() < 0.5);
    }

    #[tokio::test]
    async fn snapshot_assembles_all_subsystem_sections() {
        let registry = MetricsRegistry::new();
        let snapshot = registry
            .snapshot(
                QueryEngineStats {
                    cache: CacheStatsView::default(),
                    max_concurrency: 4,
                },
                CircuitState::Closed,
                None,
            )
            .await;
        assert_eq!(snapshot.query_agent.max_concurrency, 4);
        assert_eq!(snapshot.semantic_agent.circuit_state, "Closed");
    }
}
