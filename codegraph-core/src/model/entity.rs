use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::id::GraphId;

/// The kind of code construct an [`Entity`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    File,
    Module,
    Package,
    Class,
    Interface,
    Function,
    Method,
    Variable,
    Type,
    Enum,
    Field,
    Parameter,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::File => "file",
            EntityType::Module => "module",
            EntityType::Package => "package",
            EntityType::Class => "class",
            EntityType::Interface => "interface",
            EntityType::Function => "function",
            EntityType::Method => "method",
            EntityType::Variable => "variable",
            EntityType::Type => "type",
            EntityType::Enum => "enum",
            EntityType::Field => "field",
            EntityType::Parameter => "parameter",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One side of an [`Entity`]'s source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub column: u32,
    /// Byte offset into the file, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line,
            column,
            index: None,
        }
    }

    pub fn with_index(line: u32, column: u32, index: u32) -> Self {
        Self {
            line,
            column,
            index: Some(index),
        }
    }
}

/// The source range of an [`Entity`], start inclusive end exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub start: Position,
    pub end: Position,
}

impl Location {
    pub fn start_index(&self) -> u32 {
        self.start.index.unwrap_or(self.start.line.wrapping_mul(100_000) + self.start.column)
    }
}

/// A typed node of the code graph: a file, module, class, function, etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: GraphId,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub file_path: String,
    pub location: Location,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// SHA-256 over the identifying fields; changes iff an identifying field does.
    pub hash: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub complexity_score: Option<f64>,
    pub language: Option<String>,
    pub size_bytes: Option<u64>,
}

impl Entity {
    /// Builds a fresh entity, generating its id and content hash.
    pub fn new(
        name: impl Into<String>,
        entity_type: EntityType,
        file_path: impl Into<String>,
        location: Location,
    ) -> Self {
        let name = name.into();
        let file_path = file_path.into();
        let now = Utc::now();
        let hash = compute_hash(&file_path, &name, entity_type, location.start_index());
        Self {
            id: super::id::new_id(),
            name,
            entity_type,
            file_path,
            location,
            metadata: HashMap::new(),
            hash,
            created_at: now,
            updated_at: now,
            complexity_score: None,
            language: None,
            size_bytes: None,
        }
    }

    /// The natural dedup key: `(filePath, name, type, startIndex)`.
    pub fn dedup_key(&self) -> (String, String, EntityType, u32) {
        (
            self.file_path.clone(),
            self.name.clone(),
            self.entity_type,
            self.location.start_index(),
        )
    }

    /// Recomputes `hash` from the current identifying fields.
    pub fn recompute_hash(&mut self) {
        self.hash = compute_hash(
            &self.file_path,
            &self.name,
            self.entity_type,
            self.location.start_index(),
        );
    }
}

fn compute_hash(file_path: &str, name: &str, entity_type: EntityType, start_index: u32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(entity_type.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(start_index.to_be_bytes());
    format!("{:x}", hasher.finalize())
}
