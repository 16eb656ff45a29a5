//! Reverse BFS impact analysis: the set of entities reachable backwards
//! from a target along dependency-style edges (spec §4.6, §4.7).

use std::collections::{HashSet, VecDeque};

use crate::model::{GraphId, RelationshipType};

use super::graph_view::GraphView;

#[derive(Debug, Clone, serde::Serialize)]
pub struct ImpactReport {
    pub direct: Vec<GraphId>,
    pub indirect: Vec<GraphId>,
    pub score: f64,
}

/// Walks backwards along `calls, uses, imports, has_method` from `target`,
/// bounded by `depth`. `direct` are the one-hop callers/users; `indirect`
/// are everything else reached within the bound.
pub fn analyze_impact(view: &GraphView, target: GraphId, depth: usize) -> ImpactReport {
    let mut visited = HashSet::new();
    visited.insert(target);
    let mut direct = Vec::new();
    let mut indirect = Vec::new();

    let mut frontier = vec![target];
    for hop in 0..depth.max(1) {
        let mut next_frontier = Vec::new();
        for id in &frontier {
            for caller in reverse_neighbors(view, *id) {
                if visited.insert(caller) {
                    if hop == 0 {
                        direct.push(caller);
                    } else {
                        indirect.push(caller);
                    }
                    next_frontier.push(caller);
                }
            }
        }
        if next_frontier.is_empty() {
            break;
        }
        frontier = next_frontier;
    }

    direct.sort();
    indirect.sort();
    let score = direct.len() as f64 * 2.0 + indirect.len() as f64;
    ImpactReport { direct, indirect, score }
}

fn reverse_neighbors(view: &GraphView, id: GraphId) -> Vec<GraphId> {
    view.incoming
        .get(&id)
        .into_iter()
        .flatten()
        .filter(|r| r.relationship_type.is_impact_edge())
        .map(|r| r.from_id)
        .collect()
}

/// `calculateChangeRipple`: the union of impacted entities across a set of
/// changed entities, deduplicated, with an aggregate ripple score.
pub fn calculate_change_ripple(view: &GraphView, changes: &[GraphId], depth: usize) -> ImpactReport {
    let mut direct = HashSet::new();
    let mut indirect = HashSet::new();
    for &change in changes {
        let report = analyze_impact(view, change, depth);
        direct.extend(report.direct);
        indirect.extend(report.indirect);
    }
    indirect.retain(|id| !direct.contains(id));
    let mut direct: Vec<GraphId> = direct.into_iter().collect();
    let mut indirect: Vec<GraphId> = indirect.into_iter().collect();
    direct.sort();
    indirect.sort();
    let score = direct.len() as f64 * 2.0 + indirect.len() as f64;
    ImpactReport { direct, indirect, score }
}

/// `findDependencies`: the forward counterpart of impact analysis, used by
/// `query.findDependencies(entityId)`.
pub fn find_dependencies(view: &GraphView, entity: GraphId, depth: usize) -> Vec<GraphId> {
    super::traversal::related_entities(
        view,
        entity,
        depth,
    )
    .into_iter()
    .filter(|id| *id != entity)
    .collect()
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
    fn direct_callers_are_one_hop_away() {
        let a = entity("a");
        let b = entity("b");
        let target = entity("target");
        let (ida, idb, idt) = (a.id, b.id, target.id);
        let rels = vec![
            Relationship::new(ida, idt, RelationshipType::Calls),
            Relationship::new(idb, ida, RelationshipType::Calls),
        ];
        let view = GraphView::build(vec![a, b, target], rels);
        let report = analyze_impact(&view, idt, 2);
        assert_eq!(report.direct, vec![ida]);
        assert_eq!(report.indirect, vec![idb]);
    }
}
