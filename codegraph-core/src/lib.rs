//! # codegraph-core
//!
//! The code-graph retrieval engine: a knowledge bus, SQLite-backed graph and
//! vector storage, a query engine, a semantic search engine, and the
//! Conductor/agent runtime that ties them together behind a mandatory
//! single-entry-point delegation model.
//!
//! ## Design principles
//!
//! - **Mandatory delegation**: all work enters through [`agents::Conductor`];
//!   nothing executes outside an agent.
//! - **Typed errors, no panics on the happy path**: [`error::EngineError`]
//!   is the one error type every public surface converges on.
//! - **One database, two kinds of rows**: [`storage::GraphStore`] and
//!   [`storage::VectorStore`] share a single SQLite file, one writable
//!   connection, a bounded read pool, WAL mode.
//! - **Degrade, don't fail**: the semantic engine's circuit breaker returns
//!   flagged fallback values ([`semantic::Degradable`]) instead of erroring
//!   when an embedding provider is unhealthy.
//!
//! ## Main modules
//!
//! - [`model`]: the typed graph — [`model::Entity`], [`model::Relationship`],
//!   [`model::Embedding`], [`model::Task`], and the time-ordered [`model::GraphId`].
//! - [`storage`]: SQLite-backed persistence for entities/relationships/embeddings.
//! - [`bus`]: the process-wide pub/sub [`bus::KnowledgeBus`].
//! - [`query`]: [`query::QueryEngine`] — traversal, cycle detection, hotspots, impact analysis.
//! - [`semantic`]: [`semantic::SemanticEngine`] — embeddings, hybrid search, clone detection.
//! - [`agents`]: the runtime — [`agents::Agent`], [`agents::Conductor`], and the five worker roles.
//! - [`ingest`]: directory walking, batching, and heuristic entity synthesis for the dev agent.
//! - [`metrics`]: the aggregator behind the `get_metrics` tool response.
//! - [`error`]: [`error::EngineError`], the crate-wide error type.

pub mod agents;
pub mod bus;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod query;
pub mod semantic;
pub mod storage;

pub use agents::{
    Agent, AgentCapabilities, AgentMessage, AgentMetrics, AgentStatus, AgentWorker, Conductor,
    DevAgent, DevRunSummary, DynAgent, IndexerAgent, LoadBalancingStrategy, MethodProposal,
    ParserAgent, QueryAgent, SemanticAgent, SourceParser,
};
pub use bus::{BusEntry, KnowledgeBus};
pub use error::{BusyReason, EngineError};
pub use metrics::{MetricsRegistry, MetricsSnapshot};
pub use model::{
    new_id, parse_graph_id, Embedding, EmbeddingId, Entity, EntityType, GraphId, Location,
    Position, Relationship, RelationshipType, Task, TaskPayload, TaskPriority, TaskType,
};
pub use query::QueryEngine;
pub use semantic::{Degradable, SemanticEngine};
pub use storage::{EntityFilter, GraphStore, StorageError};
