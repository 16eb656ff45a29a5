use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{new_id, GraphId};

/// The family of work a [`Task`] represents, used by the Conductor to route
/// to a worker role and by agents to recognize what they can handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Index,
    Parse,
    Implementation,
    Refactor,
    Dev,
    Research,
    Query,
    Semantic,
    Testing,
    Documentation,
    /// Rejected unconditionally by the Conductor's mandatory-delegation rule.
    Direct,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Index => "index",
            TaskType::Parse => "parse",
            TaskType::Implementation => "implementation",
            TaskType::Refactor => "refactor",
            TaskType::Dev => "dev",
            TaskType::Research => "research",
            TaskType::Query => "query",
            TaskType::Semantic => "semantic",
            TaskType::Testing => "testing",
            TaskType::Documentation => "documentation",
            TaskType::Direct => "direct",
        }
    }

    /// Indexing-class tasks are auto-approved regardless of complexity score (spec §4.2.1).
    pub fn is_indexing_class(&self) -> bool {
        matches!(self, TaskType::Index)
    }
}

/// Tagged payload variants keyed by task type (design note: "replace ad-hoc
/// payload shapes with tagged variants"; unknown variants fail validation at
/// the Conductor rather than at the worker).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Index {
        directory: String,
        #[serde(default)]
        incremental: bool,
        #[serde(default)]
        exclude_patterns: Vec<String>,
        /// Marks a decomposed batch of a larger index task.
        #[serde(default)]
        batch: Option<usize>,
    },
    Parse {
        files: Vec<String>,
        #[serde(default)]
        use_cache: bool,
        #[serde(default = "default_batch_size")]
        batch_size: usize,
    },
    IndexFile {
        entities: Vec<crate::model::Entity>,
        relationships: Vec<crate::model::Relationship>,
        file_path: String,
    },
    Query {
        /// Either free text (plain `query` tool) or an op name recognized by
        /// the query agent's dispatch table (`list_file_entities`,
        /// `list_entity_relationships`, `analyze_code_impact`,
        /// `analyze_hotspots`, `find_related_concepts`).
        query: String,
        #[serde(default)]
        limit: Option<usize>,
        /// Structured parameters for the op named in `query`, e.g.
        /// `{"entityId": "...", "depth": 2}`. Ignored by plain free-text queries.
        #[serde(default)]
        params: serde_json::Value,
    },
    Semantic {
        /// Either the free-text query for `semantic_search` or an op name
        /// (`find_similar_code`, `detect_code_clones`, `suggest_refactoring`,
        /// `cross_language_search`).
        query: String,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        params: serde_json::Value,
    },
    Research {
        topic: String,
    },
    Implementation {
        description: String,
    },
    Refactor {
        file_path: String,
        focus_area: Option<String>,
    },
    /// Always rejected: mandatory delegation means the Conductor never executes work itself.
    Direct {
        description: String,
    },
}

fn default_batch_size() -> usize {
    100
}

impl TaskPayload {
    pub fn task_type(&self) -> TaskType {
        match self {
            TaskPayload::Index { .. } => TaskType::Index,
            TaskPayload::Parse { .. } => TaskType::Parse,
            TaskPayload::IndexFile { .. } => TaskType::Index,
            TaskPayload::Query { .. } => TaskType::Query,
            TaskPayload::Semantic { .. } => TaskType::Semantic,
            TaskPayload::Research { .. } => TaskType::Research,
            TaskPayload::Implementation { .. } => TaskType::Implementation,
            TaskPayload::Refactor { .. } => TaskType::Refactor,
            TaskPayload::Direct { .. } => TaskType::Direct,
        }
    }

    /// True when this payload carries a `directory` field, which auto-approves
    /// indexing-class tasks regardless of complexity score (spec §4.2.1).
    pub fn has_directory_field(&self) -> bool {
        matches!(self, TaskPayload::Index { .. })
    }

    /// True for tasks the Conductor must reject outright (spec §4.2.6).
    pub fn is_direct_implementation(&self) -> bool {
        matches!(self, TaskPayload::Direct { .. })
    }
}

/// Priority from 1 (lowest) to 10 (highest), clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskPriority(u8);

impl TaskPriority {
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 10))
    }

    pub fn get(&self) -> u8 {
        self.0
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self(5)
    }
}

/// A unit of work flowing through the Conductor and agent queues. Tasks are
/// not persisted; they live only in memory for the duration of their
/// execution (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: GraphId,
    pub priority: TaskPriority,
    pub payload: TaskPayload,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl Task {
    pub fn new(payload: TaskPayload, priority: TaskPriority) -> Self {
        Self {
            id: new_id(),
            priority,
            payload,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.payload.task_type()
    }

    pub fn mark_started(&mut self) {
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, result: serde_json::Value) {
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_clamps_to_one_through_ten() {
        assert_eq!(TaskPriority::new(0).get(), 1);
        assert_eq!(TaskPriority::new(11).get(), 10);
        assert_eq!(TaskPriority::new(5).get(), 5);
    }

    #[test]
    fn index_payload_is_indexing_class_and_carries_directory() {
        let payload = TaskPayload::Index {
            directory: "/repo".into(),
            incremental: false,
            exclude_patterns: vec![],
            batch: None,
        };
        assert!(payload.task_type().is_indexing_class());
        assert!(payload.has_directory_field());
    }

    #[test]
    fn direct_payload_is_rejected_by_type() {
        let payload = TaskPayload::Direct {
            description: "bypass".into(),
        };
        assert!(payload.is_direct_implementation());
    }
}
