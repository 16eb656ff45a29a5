//! The query agent's domain: an in-memory view of the stored graph plus
//! the read-only analyses built on top of it (spec §4.6).

pub mod cache;
pub mod cycles;
pub mod engine;
pub mod graph_view;
pub mod hotspots;
pub mod impact;
pub mod traversal;

pub use cache::{CacheStats, GraphQuery, QueryCache};
pub use cycles::{detect_cycles, CycleReport};
pub use engine::{QueryEngine, QueryEngineStats};
pub use graph_view::GraphView;
pub use hotspots::{analyze_hotspots, HotspotEntry, HotspotWeights};
pub use impact::{analyze_impact, calculate_change_ripple, find_dependencies, ImpactReport};
pub use traversal::{dependency_tree, find_path, related_entities, subgraph, DependencyNode};
