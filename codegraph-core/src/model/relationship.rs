use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::GraphId;

/// The kind of edge between two [`crate::model::Entity`] rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    Contains,
    Imports,
    Exports,
    Calls,
    Extends,
    Implements,
    Uses,
    HasMethod,
    DefinesClass,
    DefinesFunction,
    DependsOn,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Contains => "contains",
            RelationshipType::Imports => "imports",
            RelationshipType::Exports => "exports",
            RelationshipType::Calls => "calls",
            RelationshipType::Extends => "extends",
            RelationshipType::Implements => "implements",
            RelationshipType::Uses => "uses",
            RelationshipType::HasMethod => "has_method",
            RelationshipType::DefinesClass => "defines_class",
            RelationshipType::DefinesFunction => "defines_function",
            RelationshipType::DependsOn => "depends_on",
        }
    }

    /// Edge types the query engine expands a dependency tree along (spec §4.6).
    pub fn is_dependency_edge(&self) -> bool {
        matches!(
            self,
            RelationshipType::Imports
                | RelationshipType::Calls
                | RelationshipType::Uses
                | RelationshipType::DependsOn
        )
    }

    /// Edge types reverse-impact analysis walks backwards along (spec §4.7).
    pub fn is_impact_edge(&self) -> bool {
        matches!(
            self,
            RelationshipType::Calls
                | RelationshipType::Uses
                | RelationshipType::Imports
                | RelationshipType::HasMethod
        )
    }

    /// Edge types treated as symmetric for the `findPath` round-trip property (spec §8).
    pub fn is_symmetric(&self) -> bool {
        matches!(self, RelationshipType::Calls | RelationshipType::Uses)
    }
}

impl std::fmt::Display for RelationshipType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, typed edge between two entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: GraphId,
    pub from_id: GraphId,
    pub to_id: GraphId,
    #[serde(rename = "type")]
    pub relationship_type: RelationshipType,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Relationship {
    pub fn new(from_id: GraphId, to_id: GraphId, relationship_type: RelationshipType) -> Self {
        Self {
            id: super::id::new_id(),
            from_id,
            to_id,
            relationship_type,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// The natural dedup key: `(fromId, toId, type)`.
    pub fn dedup_key(&self) -> (GraphId, GraphId, RelationshipType) {
        (self.from_id, self.to_id, self.relationship_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::id::new_id;

    #[test]
    fn dedup_key_ignores_metadata_and_timestamps() {
        let from = new_id();
        let to = new_id();
        let mut a = Relationship::new(from, to, RelationshipType::Calls);
        a.metadata.insert("context".into(), serde_json::json!("x"));
        let b = Relationship::new(from, to, RelationshipType::Calls);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn dependency_and_impact_edge_sets_are_spec_defined() {
        assert!(RelationshipType::Imports.is_dependency_edge());
        assert!(!RelationshipType::Contains.is_dependency_edge());
        assert!(RelationshipType::HasMethod.is_impact_edge());
        assert!(!RelationshipType::Contains.is_impact_edge());
    }
}
