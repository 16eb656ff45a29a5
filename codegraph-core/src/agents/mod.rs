//! The agent runtime (spec §4.1-§4.5): a generic [`base::Agent`] wrapper
//! shared by every worker role, a point-to-point [`message::AgentMessage`]
//! envelope, and the [`conductor::Conductor`] that mandatorily delegates all
//! incoming work to one of them.

pub mod base;
pub mod conductor;
pub mod dev_agent;
pub mod indexer;
pub mod message;
pub mod parser;
pub mod query_agent;
pub mod semantic_agent;

pub use base::{Agent, AgentCapabilities, AgentMetrics, AgentStatus, AgentWorker, DynAgent};
pub use conductor::{Conductor, LoadBalancingStrategy, MethodProposal};
pub use dev_agent::{DevAgent, DevRunSummary};
pub use indexer::IndexerAgent;
pub use message::AgentMessage;
pub use parser::{FileParseOutcome, ParserAgent, SourceParser};
pub use query_agent::QueryAgent;
pub use semantic_agent::SemanticAgent;
