use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies what a stored vector embeds: either an entity row (`ent:<id>`)
/// or a detached snippet keyed by content hash (`doc:<hash>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingId(pub String);

impl EmbeddingId {
    pub fn for_entity(entity_id: impl std::fmt::Display) -> Self {
        Self(format!("ent:{entity_id}"))
    }

    pub fn for_document(content_hash: &str) -> Self {
        Self(format!("doc:{content_hash}"))
    }
}

impl std::fmt::Display for EmbeddingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A stored vector plus the content it was generated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub id: EmbeddingId,
    pub content: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl Embedding {
    pub fn new(id: EmbeddingId, content: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id,
            content: content.into(),
            vector,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.vector.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_id_formatting_matches_spec_prefixes() {
        assert_eq!(EmbeddingId::for_entity("abc").to_string(), "ent:abc");
        assert_eq!(EmbeddingId::for_document("deadbeef").to_string(), "doc:deadbeef");
    }
}
