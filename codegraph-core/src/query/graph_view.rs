//! An in-memory, arena-style snapshot of the graph used by traversals,
//! cycle detection, hotspot scoring, and impact analysis (design note:
//! "use arena-style storage... rather than in-memory object graphs;
//! traversals must carry a visited set"). Built fresh from the storage
//! layer for each analysis so readers never observe a half-written batch.

use std::collections::HashMap;

use crate::model::{Entity, GraphId, Relationship, RelationshipType};

pub struct GraphView {
    pub entities: HashMap<GraphId, Entity>,
    /// Outgoing edges, grouped by source id, in insertion order.
    pub outgoing: HashMap<GraphId, Vec<Relationship>>,
    /// Incoming edges, grouped by target id, in insertion order.
    pub incoming: HashMap<GraphId, Vec<Relationship>>,
}

impl GraphView {
    pub fn build(entities: Vec<Entity>, relationships: Vec<Relationship>) -> Self {
        let mut outgoing: HashMap<GraphId, Vec<Relationship>> = HashMap::new();
        let mut incoming: HashMap<GraphId, Vec<Relationship>> = HashMap::new();
        for rel in relationships {
            outgoing.entry(rel.from_id).or_default().push(rel.clone());
            incoming.entry(rel.to_id).or_default().push(rel);
        }
        let entities = entities.into_iter().map(|e| (e.id, e)).collect();
        Self {
            entities,
            outgoing,
            incoming,
        }
    }

    pub fn entity_ids(&self) -> impl Iterator<Item = &GraphId> {
        self.entities.keys()
    }

    /// Neighbors reachable by `edge_types` from `id`, sorted by id for
    /// deterministic tie-breaking (spec §4.6: "tie-break by smaller id").
    pub fn neighbors(&self, id: GraphId, edge_types: impl Fn(RelationshipType) -> bool) -> Vec<GraphId> {
        let mut out: Vec<GraphId> = self
            .outgoing
            .get(&id)
            .into_iter()
            .flatten()
            .filter(|r| edge_types(r.relationship_type))
            .map(|r| r.to_id)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn incoming_count(&self, id: GraphId) -> usize {
        self.incoming.get(&id).map(|v| v.len()).unwrap_or(0)
    }

    pub fn outgoing_count(&self, id: GraphId) -> usize {
        self.outgoing.get(&id).map(|v| v.len()).unwrap_or(0)
    }
}
