//! Wires a [`codegraph_config::EngineConfig`] into a running
//! [`Conductor`] with every worker role registered (spec §4.1-§4.9).
//! Grounded on the teacher's `serve::AppState`/`run_serve` construction,
//! which owns the one long-lived set of shared handles a connection
//! dispatches against.

use std::sync::Arc;

use codegraph_config::EngineConfig;
use codegraph_core::{
    Agent, AgentCapabilities, AgentWorker, Conductor, DevAgent, EngineError, IndexerAgent,
    KnowledgeBus, LoadBalancingStrategy, MetricsRegistry, ParserAgent, QueryAgent, SemanticAgent,
    Task,
};
use codegraph_core::query::QueryEngine;
use codegraph_core::semantic::{Embedder, HttpEmbedder, MemoryEmbedder, SemanticEngine};
use codegraph_core::storage::{open_vector_store, GraphStore, SqliteManager};

/// Everything a [`crate::dispatch::Dispatcher`] needs: the Conductor for
/// mandatory delegation, plus direct handles to the query/semantic engines
/// and the metrics registry for the reads that bypass it (`get_metrics`),
/// mirroring the teacher's `ping`/`tools_list` bypass in connection.rs.
pub struct Runtime {
    pub conductor: Arc<Conductor>,
    pub query_engine: Arc<QueryEngine>,
    pub semantic_engine: Arc<SemanticEngine>,
    pub metrics: Arc<MetricsRegistry>,
    pub storage: Arc<SqliteManager>,
}

impl Runtime {
    /// Graceful shutdown (spec.md "exit codes"): tears every registered
    /// agent down in reverse dependency order, then checkpoints the WAL so
    /// a killed process afterward doesn't lose un-checkpointed writes.
    pub async fn shutdown(&self) {
        self.conductor.shutdown_all().await;
        if let Err(e) = self.storage.checkpoint_wal().await {
            tracing::warn!(error = %e, "failed to checkpoint WAL during shutdown");
        }
    }
}

fn load_balancing_strategy(cfg: codegraph_config::LoadBalancingStrategyConfig) -> LoadBalancingStrategy {
    match cfg {
        codegraph_config::LoadBalancingStrategyConfig::RoundRobin => LoadBalancingStrategy::RoundRobin,
        codegraph_config::LoadBalancingStrategyConfig::LeastLoaded => LoadBalancingStrategy::LeastLoaded,
        codegraph_config::LoadBalancingStrategyConfig::HighestPriority => LoadBalancingStrategy::HighestPriority,
    }
}

/// Builds the embedder named by `config.mcp.embedding.provider`. `Onnx`
/// has no model-loading path in this build (no tokenizer/model file is
/// configurable yet) so it falls back to `Memory` with a warning rather
/// than failing startup over a feature with no concrete grounding here.
fn build_embedder(config: &EngineConfig) -> Arc<dyn Embedder> {
    use codegraph_config::EmbeddingProvider;

    match config.mcp.embedding.provider {
        EmbeddingProvider::Http => {
            let block = &config.mcp.embedding.ollama;
            let endpoint = block.base_url.clone().unwrap_or_else(|| "http://localhost:11434/api/embeddings".into());
            let model = config.mcp.embedding.model.clone().unwrap_or_else(|| "nomic-embed-text".into());
            Arc::new(HttpEmbedder::new(endpoint, model, 768))
        }
        EmbeddingProvider::Onnx => {
            tracing::warn!("mcp.embedding.provider=onnx has no model-loading path in this build, falling back to memory");
            Arc::new(MemoryEmbedder::new(256))
        }
        EmbeddingProvider::Memory => Arc::new(MemoryEmbedder::new(256)),
    }
}

/// Thin [`AgentWorker`] adapters for roles whose production constructor
/// already returns an `Arc<Self>` (because they spawn a background bus
/// listener that needs `self: Arc<Self>`). [`Agent::new`] needs an owned
/// value to wrap, so these hold the `Arc` and delegate.
struct SemanticAgentHandle(Arc<SemanticAgent>);

#[async_trait::async_trait]
impl AgentWorker for SemanticAgentHandle {
    fn agent_type(&self) -> &'static str {
        self.0.agent_type()
    }

    fn accepts(&self, task: &Task) -> bool {
        self.0.accepts(task)
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
        self.0.handle(task).await
    }
}

struct DevAgentHandle(Arc<DevAgent>);

#[async_trait::async_trait]
impl AgentWorker for DevAgentHandle {
    fn agent_type(&self) -> &'static str {
        self.0.agent_type()
    }

    fn accepts(&self, task: &Task) -> bool {
        self.0.accepts(task)
    }

    async fn handle(&self, task: &Task) -> Result<serde_json::Value, EngineError> {
        self.0.handle(task).await
    }
}

/// Opens storage, builds every engine and agent named in spec §4, and
/// registers them all with a freshly constructed Conductor (spec §4.2:
/// "mandatory delegation"). Returns the handles transport needs.
pub async fn build_runtime(config: &EngineConfig) -> Result<Runtime, EngineError> {
    let manager = Arc::new(
        SqliteManager::open(&config.database.path, 4)
            .map_err(|e| EngineError::Fatal(format!("cannot open database {}: {e}", config.database.path.display())))?,
    );
    let graph_store = Arc::new(GraphStore::new(manager.clone()));
    graph_store
        .ensure_schema()
        .await
        .map_err(|e| EngineError::Fatal(format!("schema setup failed: {e}")))?;

    let vector_store = open_vector_store(manager.clone(), 256)
        .await
        .map_err(|e| EngineError::Fatal(format!("vector store setup failed: {e}")))?;

    let bus = Arc::new(KnowledgeBus::new());

    let metrics = Arc::new(MetricsRegistry::new());

    let embedder = build_embedder(config);
    let semantic_engine = Arc::new(SemanticEngine::with_metrics(
        embedder,
        vector_store,
        graph_store.clone(),
        metrics.vector_search_handle(),
    ));
    semantic_engine
        .refresh_entity_cache()
        .await
        .map_err(|e| EngineError::Fatal(format!("entity cache warmup failed: {e}")))?;

    let query_engine = Arc::new(QueryEngine::new(
        graph_store.clone(),
        config.query_agent.max_concurrency,
        Default::default(),
    ));

    let conductor = Conductor::with_complexity_threshold(
        bus.clone(),
        config.conductor.task_queue_limit,
        load_balancing_strategy(config.conductor.load_balancing_strategy),
        config.conductor.complexity_threshold,
    );

    // The parser agent has no Conductor-reachable role of its own: nothing
    // ever constructs a `TaskPayload::Parse` (the dev agent's own `run` uses
    // a private `ParserAgent` instance directly, below), so a standalone
    // `"parser"`-role registration here would be unreachable dead code.

    // The indexer agent has no Conductor-reachable role of its own (nothing
    // routes to `agent_type() == "indexer"`) — it's only ever invoked
    // internally by the dev agent's own `run`, so it isn't registered here.
    let indexer_agent = Arc::new(IndexerAgent::new(graph_store.clone(), bus.clone()));

    let dev_agent = DevAgent::new(
        Arc::new(ParserAgent::new(Vec::new())),
        indexer_agent,
        bus.clone(),
        config.dev_agent.max_concurrency,
    );
    let dev_caps = AgentCapabilities {
        max_concurrency: config.dev_agent.max_concurrency,
        memory_limit_mb: config.dev_agent.memory_limit_mb,
        priority: config.dev_agent.priority,
    };
    let dev_handle = Agent::new(DevAgentHandle(dev_agent), dev_caps, bus.clone());
    conductor.register_agent(dev_handle).await;

    let query_agent = QueryAgent::new(query_engine.clone());
    let query_caps = AgentCapabilities {
        max_concurrency: config.query_agent.max_concurrency,
        memory_limit_mb: config.query_agent.memory_limit_mb,
        priority: config.query_agent.priority,
    };
    let query_handle = Agent::new(query_agent, query_caps, bus.clone());
    conductor.register_agent(query_handle).await;

    let semantic_agent = SemanticAgent::new(semantic_engine.clone(), bus.clone());
    let semantic_caps = AgentCapabilities {
        max_concurrency: config.mcp.agents.max_concurrent,
        memory_limit_mb: config.conductor.memory_limit_mb,
        priority: config.conductor.priority,
    };
    let semantic_handle = Agent::new(SemanticAgentHandle(semantic_agent), semantic_caps, bus.clone());
    conductor.register_agent(semantic_handle).await;

    Ok(Runtime {
        conductor,
        query_engine,
        semantic_engine,
        metrics,
        storage: manager,
    })
}
