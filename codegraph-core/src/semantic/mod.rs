//! Semantic search, embeddings, clone detection, and the circuit breaker
//! guarding outbound embedding calls (spec §4.7).

pub mod circuit_breaker;
pub mod clones;
pub mod embedder;
pub mod engine;
pub mod hybrid;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use clones::{detect_clones, CloneGroup};
pub use embedder::{probe_dimension, Embedder, HttpEmbedder, MemoryEmbedder, OnnxEmbedder, FALLBACK_DIMENSION};
pub use engine::{CodeSemantics, Degradable, SemanticEngine};
pub use hybrid::{blend, lexical_score, HybridHit, DEFAULT_ALPHA};
