//! Hotspot scoring (spec §4.6): a simple combined structural/complexity
//! score, top-N by score with ties broken by entity id. The weighting
//! constants are empirical in the source system and are made configurable
//! here per the open design question in spec §9.

use crate::model::GraphId;

use super::graph_view::GraphView;

/// Weights for the hotspot score: `incoming * incoming_weight +
/// outgoing * outgoing_weight + complexity_score (default complexity_default)`.
#[derive(Debug, Clone, Copy)]
pub struct HotspotWeights {
    pub incoming_weight: f64,
    pub outgoing_weight: f64,
    pub complexity_default: f64,
}

impl Default for HotspotWeights {
    fn default() -> Self {
        Self {
            incoming_weight: 2.0,
            outgoing_weight: 1.0,
            complexity_default: 1.0,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HotspotEntry {
    pub id: GraphId,
    pub score: f64,
}

pub fn analyze_hotspots(view: &GraphView, weights: HotspotWeights, limit: usize) -> Vec<HotspotEntry> {
    let mut scored: Vec<HotspotEntry> = view
        .entities
        .values()
        .map(|entity| {
            let incoming = view.incoming_count(entity.id) as f64;
            let outgoing = view.outgoing_count(entity.id) as f64;
            let complexity = entity.complexity_score.unwrap_or(weights.complexity_default);
            let score = incoming * weights.incoming_weight + outgoing * weights.outgoing_weight + complexity;
            HotspotEntry { id: entity.id, score }
        })
        .collect();

    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.id.cmp(&b.id)));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityType, Location, Position, Relationship, RelationshipType};

    fn entity(name: &str) -> Entity {
        Entity::new(
            name,
            EntityType::Function,
            "src/lib.rs",
            Location {
                start: Position::new(1, 0),
                end: Position::new(2, 0),
            },
        )
    }

    #[test]
    fn default_weights_match_spec_constants() {
        let weights = HotspotWeights::default();
        assert_eq!(weights.incoming_weight, 2.0);
        assert_eq!(weights.outgoing_weight, 1.0);
        assert_eq!(weights.complexity_default, 1.0);
    }

    #[test]
    fn entity_with_more_incoming_edges_scores_higher() {
        let a = entity("a");
        let b = entity("b");
        let c = entity("c");
        let (ida, idb, idc) = (a.id, b.id, c.id);
        let rels = vec![
            Relationship::new(ida, idc, RelationshipType::Calls),
            Relationship::new(idb, idc, RelationshipType::Calls),
        ];
        let view = GraphView::build(vec![a, b, c], rels);
        let hotspots = analyze_hotspots(&view, HotspotWeights::default(), 10);
        assert_eq!(hotspots[0].id, idc);
    }
}
