//! Hybrid search: a weighted blend of a simple lexical term index against
//! entity names/signatures and vector cosine similarity (spec §4.7). The
//! blend is `alpha * lexical + (1 - alpha) * vector`, default alpha = 0.3.

use std::collections::HashMap;

use crate::model::{Entity, GraphId};
use crate::storage::VectorHit;

pub const DEFAULT_ALPHA: f32 = 0.3;

#[derive(Debug, Clone, serde::Serialize)]
pub struct HybridHit {
    pub entity_id: GraphId,
    pub score: f32,
    pub lexical_score: f32,
    pub vector_score: f32,
}

/// Term-frequency lexical score against an entity's name and signature,
/// normalized to `[0, 1]` by the fraction of query terms matched.
pub fn lexical_score(query: &str, entity: &Entity) -> f32 {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let signature = entity
        .metadata
        .get("signature")
        .and_then(|v| v.as_str())
        .unwrap_or_default();
    let haystack = format!("{} {}", entity.name.to_lowercase(), signature.to_lowercase());
    let matched = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    matched as f32 / terms.len() as f32
}

/// Blends lexical and vector scores for every vector hit whose entity can
/// be resolved, deduplicates by entity id (keeping the best score), sorts
/// descending, and caps at `limit` (spec §4.7).
pub fn blend(
    query: &str,
    hits: Vec<VectorHit>,
    entities: &HashMap<GraphId, Entity>,
    alpha: f32,
    limit: usize,
) -> Vec<HybridHit> {
    let mut best: HashMap<GraphId, HybridHit> = HashMap::new();
    for hit in hits {
        let Some(entity_id) = entity_id_from_embedding_id(&hit.embedding.id.0) else {
            continue;
        };
        let Some(entity) = entities.get(&entity_id) else {
            continue;
        };
        let lexical = lexical_score(query, entity);
        let vector = hit.score;
        let score = alpha * lexical + (1.0 - alpha) * vector;
        let candidate = HybridHit {
            entity_id,
            score,
            lexical_score: lexical,
            vector_score: vector,
        };
        best.entry(entity_id)
            .and_modify(|existing| {
                if candidate.score > existing.score {
                    *existing = candidate.clone();
                }
            })
            .or_insert(candidate);
    }
    let mut ranked: Vec<HybridHit> = best.into_values().collect();
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then(a.entity_id.cmp(&b.entity_id)));
    ranked.truncate(limit);
    ranked
}

fn entity_id_from_embedding_id(embedding_id: &str) -> Option<GraphId> {
    let rest = embedding_id.strip_prefix("ent:")?;
    crate::model::parse_graph_id(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Location, Position};
    use crate::model::EmbeddingId;
    use std::collections::HashMap as Map;

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
    fn lexical_score_reflects_fraction_of_matched_terms() {
        let e = entity("parse_config");
        assert_eq!(lexical_score("parse", &e), 1.0);
        assert_eq!(lexical_score("parse unrelated", &e), 0.5);
    }

    #[test]
    fn blend_deduplicates_and_caps_at_limit() {
        let e1 = entity("alpha");
        let id1 = e1.id;
        let mut entities = Map::new();
        entities.insert(id1, e1);

        let embedding = crate::model::Embedding {
            id: EmbeddingId(format!("ent:{id1}")),
            content: String::new(),
            vector: vec![],
            metadata: Default::default(),
            created_at: chrono::Utc::now(),
        };
        let hits = vec![VectorHit { embedding, score: 0.9 }];
        let ranked = blend("alpha", hits, &entities, DEFAULT_ALPHA, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entity_id, id1);
    }
}
