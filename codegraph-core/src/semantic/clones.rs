//! Clone detection: single-linkage clustering over pairwise cosine
//! similarity (spec §4.7). Any two embeddings whose similarity is at or
//! above `min_similarity` are linked into the same cluster; clusters of
//! size >= 2 are reported as clone groups.

use crate::model::EmbeddingId;

#[derive(Debug, Clone)]
pub struct CloneGroup {
    pub members: Vec<EmbeddingId>,
    pub min_pairwise_similarity: f32,
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        if self.parent[x] != x {
            self.parent[x] = self.find(self.parent[x]);
        }
        self.parent[x]
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent[ra] = rb;
        }
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Clusters `(id, vector)` pairs via single-linkage over pairwise cosine
/// similarity, emitting one [`CloneGroup`] per cluster of size >= 2.
pub fn detect_clones(items: &[(EmbeddingId, Vec<f32>)], min_similarity: f32) -> Vec<CloneGroup> {
    let n = items.len();
    let mut uf = UnionFind::new(n);
    let mut pair_similarity: std::collections::HashMap<(usize, usize), f32> = std::collections::HashMap::new();

    for i in 0..n {
        for j in (i + 1)..n {
            let sim = cosine_similarity(&items[i].1, &items[j].1);
            if sim >= min_similarity {
                uf.union(i, j);
                pair_similarity.insert((i, j), sim);
            }
        }
    }

    let mut clusters: std::collections::HashMap<usize, Vec<usize>> = std::collections::HashMap::new();
    for i in 0..n {
        let root = uf.find(i);
        clusters.entry(root).or_default().push(i);
    }

    let mut groups: Vec<CloneGroup> = clusters
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|members| {
            let mut min_sim = f32::MAX;
            for a in 0..members.len() {
                for b in (a + 1)..members.len() {
                    let key = if members[a] < members[b] {
                        (members[a], members[b])
                    } else {
                        (members[b], members[a])
                    };
                    if let Some(sim) = pair_similarity.get(&key) {
                        min_sim = min_sim.min(*sim);
                    } else {
                        let sim = cosine_similarity(&items[members[a]].1, &items[members[b]].1);
                        min_sim = min_sim.min(sim);
                    }
                }
            }
            CloneGroup {
                members: members.into_iter().map(|i| items[i].0.clone()).collect(),
                min_pairwise_similarity: if min_sim == f32::MAX { 1.0 } else { min_sim },
            }
        })
        .collect();

    groups.sort_by(|a, b| b.members.len().cmp(&a.members.len()));
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> EmbeddingId {
        EmbeddingId::for_entity(s)
    }

    #[test]
    fn near_identical_vectors_form_one_clone_group() {
        let items = vec![
            (id("a"), vec![1.0, 0.0, 0.0]),
            (id("b"), vec![0.99, 0.01, 0.0]),
            (id("c"), vec![0.0, 1.0, 0.0]),
        ];
        let groups = detect_clones(&items, 0.9);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn single_linkage_chains_transitively() {
        // a~b and b~c above threshold but a~c below: all three still cluster
        // together because clone detection is single-linkage, not complete-linkage.
        let items = vec![
            (id("a"), vec![1.0, 0.0]),
            (id("b"), vec![0.7, 0.7]),
            (id("c"), vec![0.0, 1.0]),
        ];
        let groups = detect_clones(&items, 0.6);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].members.len(), 3);
    }

    #[test]
    fn no_clusters_below_threshold() {
        let items = vec![(id("a"), vec![1.0, 0.0]), (id("b"), vec![0.0, 1.0])];
        assert!(detect_clones(&items, 0.9).is_empty());
    }
}
