//! Directory ingestion for the dev agent (spec §4.5): walking, batching, and
//! heuristic entity/relationship synthesis when no parser is registered.

pub mod batcher;
pub mod heuristic;
pub mod walker;

pub use batcher::{adjusted_batch_size, batches, effective_batch_size, DEFAULT_BATCH_SIZE, MIN_BATCH_SIZE};
pub use walker::{walk, WalkOptions};
