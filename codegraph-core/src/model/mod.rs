//! Shared data-model types: the typed graph (entities, relationships), the
//! vector embedding record, and the in-memory task envelope that flows
//! through agent queues and the Conductor.

mod embedding;
mod entity;
mod id;
mod relationship;
mod task;

pub use embedding::{Embedding, EmbeddingId};
pub use entity::{Entity, EntityType, Location, Position};
pub use id::{new_id, parse_graph_id, GraphId};
pub use relationship::{Relationship, RelationshipType};
pub use task::{Task, TaskPayload, TaskPriority, TaskType};
