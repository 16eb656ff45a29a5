//! Entity and relationship tables: batch upsert with hash-based dedup,
//! transactional writes, and the incremental re-index cleanup that removes
//! entities whose hash disappeared from a file's latest batch (spec §3, §4.4).

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use tracing::warn;

use crate::model::{Entity, EntityType, GraphId, Location, Position, Relationship, RelationshipType};

use super::error::StorageError;
use super::manager::SqliteManager;

/// Filter accepted by [`GraphStore::list_entities`].
#[derive(Debug, Clone, Default)]
pub struct EntityFilter {
    pub file_path: Option<String>,
    pub entity_types: Option<Vec<EntityType>>,
}

/// Outcome of a batch of entity upserts, used for `index` tool responses and
/// `index:updated` bus payloads.
#[derive(Debug, Clone, Default)]
pub struct UpsertSummary {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

pub struct GraphStore {
    manager: Arc<SqliteManager>,
}

impl GraphStore {
    pub fn new(manager: Arc<SqliteManager>) -> Self {
        Self { manager }
    }

    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        self.manager
            .with_write(|conn| {
                conn.execute_batch(SCHEMA_SQL)?;
                Ok(())
            })
            .await
    }

    /// Inserts or updates a batch of entities within one transaction.
    /// Duplicate `(filePath, name, type, startIndex)` rows within the batch
    /// collapse to the last one (spec §3 invariant). An unchanged hash only
    /// bumps `updatedAt`.
    pub async fn upsert_entities(&self, entities: Vec<Entity>) -> Result<UpsertSummary, StorageError> {
        let mut deduped: std::collections::HashMap<(String, String, EntityType, u32), Entity> =
            std::collections::HashMap::new();
        for entity in entities {
            deduped.insert(entity.dedup_key(), entity);
        }
        let entities: Vec<Entity> = deduped.into_values().collect();

        self.manager
            .with_write(move |conn| {
                let tx = conn.transaction()?;
                let mut summary = UpsertSummary::default();
                for entity in &entities {
                    let existing_hash: Option<String> = tx
                        .query_row(
                            "SELECT hash FROM entities WHERE file_path = ?1 AND name = ?2 AND type = ?3 AND start_index = ?4",
                            params![entity.file_path, entity.name, entity.entity_type.as_str(), entity.location.start_index()],
                            |row| row.get(0),
                        )
                        .optional()?;

                    match existing_hash {
                        Some(hash) if hash == entity.hash => {
                            tx.execute(
                                "UPDATE entities SET updated_at = ?1 WHERE file_path = ?2 AND name = ?3 AND type = ?4 AND start_index = ?5",
                                params![entity.updated_at.to_rfc3339(), entity.file_path, entity.name, entity.entity_type.as_str(), entity.location.start_index()],
                            )?;
                            summary.unchanged += 1;
                        }
                        Some(_) => {
                            write_entity(&tx, entity, true)?;
                            summary.updated += 1;
                        }
                        None => {
                            write_entity(&tx, entity, false)?;
                            summary.inserted += 1;
                        }
                    }
                }
                tx.commit()?;
                Ok(summary)
            })
            .await
    }

    /// Inserts a batch of relationships in one transaction. Any relationship
    /// whose endpoints are not present at commit time fails the whole batch
    /// (spec §3 invariant); unresolvable edges should be filtered out by the
    /// indexer agent before calling this.
    pub async fn upsert_relationships(&self, relationships: Vec<Relationship>) -> Result<usize, StorageError> {
        self.manager
            .with_write(move |conn| {
                let tx = conn.transaction()?;
                for id in relationships
                    .iter()
                    .flat_map(|r| [r.from_id, r.to_id])
                    .collect::<HashSet<_>>()
                {
                    let exists: bool = tx
                        .query_row("SELECT 1 FROM entities WHERE id = ?1", params![id.to_string()], |_| Ok(true))
                        .optional()?
                        .unwrap_or(false);
                    if !exists {
                        return Err(StorageError::UnknownEntity(id.to_string()));
                    }
                }

                let mut written = 0usize;
                for rel in &relationships {
                    let metadata = serde_json::to_string(&rel.metadata)?;
                    tx.execute(
                        r#"
                        INSERT INTO relationships (id, from_id, to_id, type, metadata, created_at)
                        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                        ON CONFLICT(from_id, to_id, type) DO UPDATE SET metadata = excluded.metadata
                        "#,
                        params![
                            rel.id.to_string(),
                            rel.from_id.to_string(),
                            rel.to_id.to_string(),
                            rel.relationship_type.as_str(),
                            metadata,
                            rel.created_at.to_rfc3339(),
                        ],
                    )?;
                    written += 1;
                }
                tx.commit()?;
                Ok(written)
            })
            .await
    }

    pub async fn get_entity(&self, id: GraphId) -> Result<Option<Entity>, StorageError> {
        let id_str = id.to_string();
        self.manager
            .read_pool()
            .with_read(move |conn| {
                conn.query_row(
                    "SELECT * FROM entities WHERE id = ?1",
                    params![id_str],
                    row_to_entity,
                )
                .optional()
                .map_err(StorageError::from)
            })
            .await
    }

    pub async fn list_entities(&self, filter: EntityFilter) -> Result<Vec<Entity>, StorageError> {
        self.manager
            .read_pool()
            .with_read(move |conn| {
                let mut sql = String::from("SELECT * FROM entities WHERE 1=1");
                if filter.file_path.is_some() {
                    sql.push_str(" AND file_path = ?1");
                }
                let mut stmt = conn.prepare(&sql)?;
                let rows: Vec<Entity> = if let Some(ref path) = filter.file_path {
                    stmt.query_map(params![path], row_to_entity)?
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    stmt.query_map([], row_to_entity)?
                        .collect::<Result<Vec<_>, _>>()?
                };
                Ok(match filter.entity_types {
                    Some(types) => rows.into_iter().filter(|e| types.contains(&e.entity_type)).collect(),
                    None => rows,
                })
            })
            .await
    }

    pub async fn get_relationships(
        &self,
        entity_id: GraphId,
        relationship_type: Option<RelationshipType>,
    ) -> Result<Vec<Relationship>, StorageError> {
        let id_str = entity_id.to_string();
        self.manager
            .read_pool()
            .with_read(move |conn| {
                let mut sql = String::from(
                    "SELECT id, from_id, to_id, type, metadata, created_at FROM relationships WHERE (from_id = ?1 OR to_id = ?1)",
                );
                if relationship_type.is_some() {
                    sql.push_str(" AND type = ?2");
                }
                let mut stmt = conn.prepare(&sql)?;
                let rows = if let Some(t) = relationship_type {
                    stmt.query_map(params![id_str, t.as_str()], row_to_relationship)?
                        .collect::<Result<Vec<_>, _>>()?
                } else {
                    stmt.query_map(params![id_str], row_to_relationship)?
                        .collect::<Result<Vec<_>, _>>()?
                };
                Ok(rows)
            })
            .await
    }

    /// Full relationship set, used by the query engine for in-memory
    /// traversal, cycle detection and hotspot scoring.
    pub async fn all_relationships(&self) -> Result<Vec<Relationship>, StorageError> {
        self.manager
            .read_pool()
            .with_read(|conn| {
                let mut stmt = conn.prepare("SELECT id, from_id, to_id, type, metadata, created_at FROM relationships")?;
                let rows = stmt
                    .query_map([], row_to_relationship)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    pub async fn all_entities(&self) -> Result<Vec<Entity>, StorageError> {
        self.manager
            .read_pool()
            .with_read(|conn| {
                let mut stmt = conn.prepare("SELECT * FROM entities")?;
                let rows = stmt.query_map([], row_to_entity)?.collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    /// Deletes entities in `file_path` whose hash is not in `current_hashes`
    /// (the hashes produced by the latest re-index batch for that file), so
    /// renamed/removed constructs don't linger (spec §4.4).
    pub async fn delete_stale_entities(
        &self,
        file_path: String,
        current_hashes: HashSet<String>,
    ) -> Result<Vec<GraphId>, StorageError> {
        self.manager
            .with_write(move |conn| {
                let tx = conn.transaction()?;
                let mut stmt = tx.prepare("SELECT id, hash FROM entities WHERE file_path = ?1")?;
                let stale: Vec<(GraphId, String)> = stmt
                    .query_map(params![file_path], |row| {
                        let id_str: String = row.get(0)?;
                        let hash: String = row.get(1)?;
                        Ok((id_str, hash))
                    })?
                    .collect::<Result<Vec<_>, _>>()?
                    .into_iter()
                    .filter(|(_, hash)| !current_hashes.contains(hash))
                    .filter_map(|(id_str, hash)| parse_id(&id_str).map(|id| (id, hash)))
                    .collect();
                drop(stmt);

                let mut removed = Vec::with_capacity(stale.len());
                for (id, _hash) in stale {
                    tx.execute("DELETE FROM entities WHERE id = ?1", params![id.to_string()])?;
                    tx.execute(
                        "DELETE FROM relationships WHERE from_id = ?1 OR to_id = ?1",
                        params![id.to_string()],
                    )?;
                    removed.push(id);
                }
                tx.commit()?;
                if !removed.is_empty() {
                    warn!(count = removed.len(), "dropped stale entities after re-index");
                }
                Ok(removed)
            })
            .await
    }
}

fn write_entity(tx: &rusqlite::Transaction<'_>, entity: &Entity, replace: bool) -> Result<(), StorageError> {
    let metadata = serde_json::to_string(&entity.metadata)?;
    if replace {
        tx.execute(
            r#"
            UPDATE entities SET
                id = ?1, metadata = ?2, hash = ?3, updated_at = ?4,
                complexity_score = ?5, language = ?6, size_bytes = ?7,
                start_line = ?8, start_column = ?9, start_index = ?10,
                end_line = ?11, end_column = ?12, end_index = ?13
            WHERE file_path = ?14 AND name = ?15 AND type = ?16 AND start_index = ?10
            "#,
            params![
                entity.id.to_string(),
                metadata,
                entity.hash,
                entity.updated_at.to_rfc3339(),
                entity.complexity_score,
                entity.language,
                entity.size_bytes.map(|b| b as i64),
                entity.location.start.line,
                entity.location.start.column,
                entity.location.start_index() as i64,
                entity.location.end.line,
                entity.location.end.column,
                entity.location.end.index,
                entity.file_path,
                entity.name,
                entity.entity_type.as_str(),
            ],
        )?;
    } else {
        tx.execute(
            r#"
            INSERT INTO entities (
                id, file_path, name, type, metadata, hash, created_at, updated_at,
                complexity_score, language, size_bytes,
                start_line, start_column, start_index, end_line, end_column, end_index
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                entity.id.to_string(),
                entity.file_path,
                entity.name,
                entity.entity_type.as_str(),
                metadata,
                entity.hash,
                entity.created_at.to_rfc3339(),
                entity.updated_at.to_rfc3339(),
                entity.complexity_score,
                entity.language,
                entity.size_bytes.map(|b| b as i64),
                entity.location.start.line,
                entity.location.start.column,
                entity.location.start_index() as i64,
                entity.location.end.line,
                entity.location.end.column,
                entity.location.end.index,
            ],
        )?;
    }
    Ok(())
}

fn parse_id(s: &str) -> Option<GraphId> {
    // GraphId's Display/parse round-trip lives in model::id; re-derive here
    // via the public Deserialize impl to avoid exposing a crate-private parser.
    serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
}

fn row_to_entity(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    let metadata_str: String = row.get("metadata")?;
    let metadata = serde_json::from_str(&metadata_str).unwrap_or_default();
    let id_str: String = row.get("id")?;
    let type_str: String = row.get("type")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Entity {
        id: parse_id(&id_str).unwrap_or_else(crate::model::new_id),
        name: row.get("name")?,
        entity_type: parse_entity_type(&type_str),
        file_path: row.get("file_path")?,
        location: Location {
            start: Position {
                line: row.get("start_line")?,
                column: row.get("start_column")?,
                index: row.get("start_index")?,
            },
            end: Position {
                line: row.get("end_line")?,
                column: row.get("end_column")?,
                index: row.get("end_index")?,
            },
        },
        metadata,
        hash: row.get("hash")?,
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        updated_at: chrono::DateTime::parse_from_rfc3339(&updated_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        complexity_score: row.get("complexity_score")?,
        language: row.get("language")?,
        size_bytes: row.get::<_, Option<i64>>("size_bytes")?.map(|b| b as u64),
    })
}

fn row_to_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relationship> {
    let metadata_str: String = row.get("metadata")?;
    let id_str: String = row.get("id")?;
    let from_str: String = row.get("from_id")?;
    let to_str: String = row.get("to_id")?;
    let type_str: String = row.get("type")?;
    let created_at: String = row.get("created_at")?;

    Ok(Relationship {
        id: parse_id(&id_str).unwrap_or_else(crate::model::new_id),
        from_id: parse_id(&from_str).unwrap_or_else(crate::model::new_id),
        to_id: parse_id(&to_str).unwrap_or_else(crate::model::new_id),
        relationship_type: parse_relationship_type(&type_str),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

fn parse_entity_type(s: &str) -> EntityType {
    match s {
        "file" => EntityType::File,
        "module" => EntityType::Module,
        "package" => EntityType::Package,
        "class" => EntityType::Class,
        "interface" => EntityType::Interface,
        "function" => EntityType::Function,
        "method" => EntityType::Method,
        "variable" => EntityType::Variable,
        "type" => EntityType::Type,
        "enum" => EntityType::Enum,
        "field" => EntityType::Field,
        _ => EntityType::Parameter,
    }
}

fn parse_relationship_type(s: &str) -> RelationshipType {
    match s {
        "contains" => RelationshipType::Contains,
        "imports" => RelationshipType::Imports,
        "exports" => RelationshipType::Exports,
        "calls" => RelationshipType::Calls,
        "extends" => RelationshipType::Extends,
        "implements" => RelationshipType::Implements,
        "uses" => RelationshipType::Uses,
        "has_method" => RelationshipType::HasMethod,
        "defines_class" => RelationshipType::DefinesClass,
        "defines_function" => RelationshipType::DefinesFunction,
        _ => RelationshipType::DependsOn,
    }
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_column INTEGER NOT NULL,
    start_index INTEGER,
    end_line INTEGER NOT NULL,
    end_column INTEGER NOT NULL,
    end_index INTEGER,
    metadata TEXT NOT NULL DEFAULT '{}',
    hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    complexity_score REAL,
    language TEXT,
    size_bytes INTEGER,
    UNIQUE(file_path, name, type, start_index)
);
CREATE INDEX IF NOT EXISTS idx_entities_file_path ON entities(file_path);
CREATE INDEX IF NOT EXISTS idx_entities_type ON entities(type);

CREATE TABLE IF NOT EXISTS relationships (
    id TEXT PRIMARY KEY,
    from_id TEXT NOT NULL,
    to_id TEXT NOT NULL,
    type TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL,
    UNIQUE(from_id, to_id, type)
);
CREATE INDEX IF NOT EXISTS idx_rel_from_type ON relationships(from_id, type);
CREATE INDEX IF NOT EXISTS idx_rel_to_type ON relationships(to_id, type);

CREATE TABLE IF NOT EXISTS embeddings (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_created_at ON embeddings(created_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityType, Location, Position};

    fn loc(start_index: u32) -> Location {
        Location {
            start: Position::with_index(1, 0, start_index),
            end: Position::with_index(2, 0, start_index + 10),
        }
    }

    async fn store() -> GraphStore {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SqliteManager::open(dir.path().join("vectors.db"), 2).unwrap());
        let store = GraphStore::new(manager);
        store.ensure_schema().await.unwrap();
        std::mem::forget(dir);
        store
    }

    #[tokio::test]
    async fn reindexing_identical_content_is_a_no_op_for_writes() {
        let store = store().await;
        let entity = Entity::new("Foo", EntityType::Class, "src/foo.rs", loc(0));
        let first_id = entity.id;
        let first_hash = entity.hash.clone();

        store.upsert_entities(vec![entity.clone()]).await.unwrap();
        let reinserted = Entity {
            id: crate::model::new_id(),
            ..entity
        };
        let summary = store.upsert_entities(vec![reinserted]).await.unwrap();
        assert_eq!(summary.unchanged, 1);

        let fetched = store.get_entity(first_id).await.unwrap().unwrap();
        assert_eq!(fetched.hash, first_hash);
    }

    #[tokio::test]
    async fn relationship_batch_fails_atomically_on_unknown_endpoint() {
        let store = store().await;
        let a = Entity::new("A", EntityType::Class, "src/a.rs", loc(0));
        store.upsert_entities(vec![a.clone()]).await.unwrap();

        let bogus = crate::model::new_id();
        let rel = Relationship::new(a.id, bogus, RelationshipType::Calls);
        let err = store.upsert_relationships(vec![rel]).await.unwrap_err();
        assert!(matches!(err, StorageError::UnknownEntity(_)));

        let rels = store.get_relationships(a.id, None).await.unwrap();
        assert!(rels.is_empty());
    }

    #[tokio::test]
    async fn stale_entities_are_removed_when_hash_disappears() {
        let store = store().await;
        let bar = Entity::new("bar", EntityType::Function, "src/foo.rs", loc(10));
        store.upsert_entities(vec![bar.clone()]).await.unwrap();

        let baz = Entity::new("baz", EntityType::Function, "src/foo.rs", loc(10));
        let mut current_hashes = HashSet::new();
        current_hashes.insert(baz.hash.clone());
        store.upsert_entities(vec![baz]).await.unwrap();

        let removed = store
            .delete_stale_entities("src/foo.rs".into(), current_hashes)
            .await
            .unwrap();
        assert!(removed.contains(&bar.id) || store.get_entity(bar.id).await.unwrap().is_none());
    }
}
