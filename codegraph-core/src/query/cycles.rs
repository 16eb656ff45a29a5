//! Tarjan's strongly-connected-components algorithm restricted to
//! dependency-style edges (spec §4.6): components of size ≥ 2 are cycles;
//! self-loops are reported separately.

use std::collections::HashMap;

use crate::model::{GraphId, RelationshipType};

use super::graph_view::GraphView;

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycles: Vec<Vec<GraphId>>,
    pub self_loops: Vec<GraphId>,
}

struct TarjanState {
    index_counter: usize,
    index: HashMap<GraphId, usize>,
    lowlink: HashMap<GraphId, usize>,
    on_stack: HashMap<GraphId, bool>,
    stack: Vec<GraphId>,
    sccs: Vec<Vec<GraphId>>,
}

pub fn detect_cycles(view: &GraphView) -> CycleReport {
    let mut self_loops = Vec::new();
    for (id, edges) in &view.outgoing {
        if edges.iter().any(|r| r.relationship_type.is_dependency_edge() && r.to_id == *id) {
            self_loops.push(*id);
        }
    }
    self_loops.sort();

    let mut state = TarjanState {
        index_counter: 0,
        index: HashMap::new(),
        lowlink: HashMap::new(),
        on_stack: HashMap::new(),
        stack: Vec::new(),
        sccs: Vec::new(),
    };

    let mut ids: Vec<GraphId> = view.entity_ids().copied().collect();
    ids.sort();
    for id in ids {
        if !state.index.contains_key(&id) {
            strong_connect(view, id, &mut state);
        }
    }

    let cycles: Vec<Vec<GraphId>> = state
        .sccs
        .into_iter()
        .filter(|scc| scc.len() >= 2)
        .map(|mut scc| {
            scc.sort();
            scc
        })
        .collect();

    CycleReport { cycles, self_loops }
}

fn strong_connect(view: &GraphView, v: GraphId, state: &mut TarjanState) {
    state.index.insert(v, state.index_counter);
    state.lowlink.insert(v, state.index_counter);
    state.index_counter += 1;
    state.stack.push(v);
    state.on_stack.insert(v, true);

    for w in view.neighbors(v, RelationshipType::is_dependency_edge) {
        if !state.index.contains_key(&w) {
            strong_connect(view, w, state);
            let w_low = state.lowlink[&w];
            let v_low = state.lowlink[&v];
            state.lowlink.insert(v, v_low.min(w_low));
        } else if *state.on_stack.get(&w).unwrap_or(&false) {
            let w_idx = state.index[&w];
            let v_low = state.lowlink[&v];
            state.lowlink.insert(v, v_low.min(w_idx));
        }
    }

    if state.lowlink[&v] == state.index[&v] {
        let mut scc = Vec::new();
        loop {
            let w = state.stack.pop().expect("stack non-empty while unwinding scc");
            state.on_stack.insert(w, false);
            scc.push(w);
            if w == v {
                break;
            }
        }
        state.sccs.push(scc);
    }
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
    fn three_node_cycle_is_detected_as_one_component() {
        let a = entity("a");
        let b = entity("b");
        let c = entity("c");
        let (ida, idb, idc) = (a.id, b.id, c.id);
        let rels = vec![
            Relationship::new(ida, idb, RelationshipType::Calls),
            Relationship::new(idb, idc, RelationshipType::Calls),
            Relationship::new(idc, ida, RelationshipType::Calls),
        ];
        let view = GraphView::build(vec![a, b, c], rels);
        let report = detect_cycles(&view);
        assert_eq!(report.cycles.len(), 1);
        let mut cycle = report.cycles[0].clone();
        cycle.sort();
        let mut expected = vec![ida, idb, idc];
        expected.sort();
        assert_eq!(cycle, expected);
    }

    #[test]
    fn self_loop_is_reported_separately_from_cycles() {
        let a = entity("a");
        let id = a.id;
        let rels = vec![Relationship::new(id, id, RelationshipType::Calls)];
        let view = GraphView::build(vec![a], rels);
        let report = detect_cycles(&view);
        assert_eq!(report.self_loops, vec![id]);
        assert!(report.cycles.is_empty());
    }

    #[test]
    fn acyclic_graph_has_no_cycles() {
        let a = entity("a");
        let b = entity("b");
        let (ida, idb) = (a.id, b.id);
        let rels = vec![Relationship::new(ida, idb, RelationshipType::Calls)];
        let view = GraphView::build(vec![a, b], rels);
        assert!(detect_cycles(&view).cycles.is_empty());
    }
}
