//! Embedding storage co-located with graph storage: a native ANN table via
//! the `vec0` virtual table when the extension loaded, or a brute-force
//! cosine-similarity fallback over a plain blob table otherwise. Both
//! implementations must produce the same ranking at small N (spec §4.8).

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::model::{Embedding, EmbeddingId};

use super::error::StorageError;
use super::manager::SqliteManager;

/// A scored search hit: higher is more similar.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub embedding: Embedding,
    pub score: f32,
}

/// Snapshot returned by the `get_metrics`/`getVectorStats` surface.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VectorStats {
    pub extension_loaded: bool,
    pub count: u64,
    pub dimension: usize,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, embedding: Embedding) -> Result<(), StorageError>;
    async fn get(&self, id: &EmbeddingId) -> Result<Option<Embedding>, StorageError>;
    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, StorageError>;
    async fn stats(&self) -> Result<VectorStats, StorageError>;
    fn dimension(&self) -> usize;
}

fn vector_to_json(v: &[f32]) -> String {
    let parts: Vec<String> = v.iter().map(|f| f.to_string()).collect();
    format!("[{}]", parts.join(","))
}

fn vector_from_blob(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
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

/// `vec0`-backed store, used when the native extension loaded successfully.
pub struct NativeVectorStore {
    manager: Arc<SqliteManager>,
    dimension: usize,
    vec_table: String,
}

impl NativeVectorStore {
    pub async fn open(manager: Arc<SqliteManager>, dimension: usize) -> Result<Self, StorageError> {
        let vec_table = "vec_embeddings".to_string();
        let table = vec_table.clone();
        manager
            .with_write(move |conn| {
                conn.execute(
                    &format!("CREATE VIRTUAL TABLE IF NOT EXISTS {table} USING vec0(embedding float[{dimension}])"),
                    [],
                )?;
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS vec_meta (rowid INTEGER PRIMARY KEY, id TEXT UNIQUE NOT NULL)",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(Self {
            manager,
            dimension,
            vec_table,
        })
    }
}

#[async_trait]
impl VectorStore for NativeVectorStore {
    async fn upsert(&self, embedding: Embedding) -> Result<(), StorageError> {
        if embedding.dimension() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        let vec_table = self.vec_table.clone();
        let vec_json = vector_to_json(&embedding.vector);
        let metadata = serde_json::to_string(&embedding.metadata)?;
        let id = embedding.id.0.clone();
        let content = embedding.content.clone();
        let created_at = embedding.created_at.to_rfc3339();

        self.manager
            .with_write(move |conn| {
                conn.execute(
                    "INSERT INTO embeddings (id, content, metadata, created_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET content = excluded.content, metadata = excluded.metadata",
                    params![id, content, metadata, created_at],
                )?;

                let existing_rowid: Option<i64> = conn
                    .query_row("SELECT rowid FROM vec_meta WHERE id = ?1", params![id], |r| r.get(0))
                    .optional()?;
                if let Some(rowid) = existing_rowid {
                    conn.execute(&format!("DELETE FROM {vec_table} WHERE rowid = ?1"), params![rowid])?;
                    conn.execute(
                        &format!("INSERT INTO {vec_table} (rowid, embedding) VALUES (?1, ?2)"),
                        params![rowid, vec_json],
                    )?;
                } else {
                    conn.execute(
                        &format!("INSERT INTO {vec_table} (embedding) VALUES (?1)"),
                        params![vec_json],
                    )?;
                    let rowid = conn.last_insert_rowid();
                    conn.execute(
                        "INSERT INTO vec_meta (rowid, id) VALUES (?1, ?2)",
                        params![rowid, id],
                    )?;
                }
                Ok(())
            })
            .await
    }

    async fn get(&self, id: &EmbeddingId) -> Result<Option<Embedding>, StorageError> {
        let id = id.0.clone();
        self.manager
            .read_pool()
            .with_read(move |conn| {
                conn.query_row(
                    "SELECT id, content, metadata, created_at FROM embeddings WHERE id = ?1",
                    params![id],
                    row_to_embedding_no_vector,
                )
                .optional()
                .map_err(StorageError::from)
            })
            .await
    }

    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, StorageError> {
        let vec_json = vector_to_json(query_vector);
        let vec_table = self.vec_table.clone();
        let knn_limit = limit.max(10) * 3;

        self.manager
            .read_pool()
            .with_read(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT rowid, distance FROM {vec_table} WHERE embedding MATCH ?1 AND k = ?2"
                ))?;
                let rowids_with_dist: Vec<(i64, f64)> = stmt
                    .query_map(params![vec_json, knn_limit as i64], |row| {
                        Ok((row.get(0)?, row.get(1)?))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut hits = Vec::with_capacity(rowids_with_dist.len());
                for (rowid, dist) in rowids_with_dist {
                    let id: Option<String> = conn
                        .query_row("SELECT id FROM vec_meta WHERE rowid = ?1", params![rowid], |r| r.get(0))
                        .optional()?;
                    let Some(id) = id else { continue };
                    let Some(embedding) = conn
                        .query_row(
                            "SELECT id, content, metadata, created_at FROM embeddings WHERE id = ?1",
                            params![id],
                            row_to_embedding_no_vector,
                        )
                        .optional()?
                    else {
                        continue;
                    };
                    hits.push(VectorHit {
                        embedding,
                        score: (1.0 / (1.0 + dist)) as f32,
                    });
                }
                hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                hits.truncate(limit);
                Ok(hits)
            })
            .await
    }

    async fn stats(&self) -> Result<VectorStats, StorageError> {
        let count: i64 = self
            .manager
            .read_pool()
            .with_read(|conn| conn.query_row("SELECT COUNT(*) FROM embeddings", [], |r| r.get(0)).map_err(StorageError::from))
            .await?;
        Ok(VectorStats {
            extension_loaded: true,
            count: count as u64,
            dimension: self.dimension,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Brute-force cosine-similarity store, used when the native extension
/// failed to load. Vectors are stored as blobs in a plain table; search
/// scans all rows and ranks by cosine similarity in-process. Produces the
/// same ranking as [`NativeVectorStore`] at small N, only slower.
pub struct FallbackVectorStore {
    manager: Arc<SqliteManager>,
    dimension: usize,
}

impl FallbackVectorStore {
    pub async fn open(manager: Arc<SqliteManager>, dimension: usize) -> Result<Self, StorageError> {
        manager
            .with_write(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS embeddings_blob (id TEXT PRIMARY KEY, vector BLOB NOT NULL)",
                    [],
                )?;
                Ok(())
            })
            .await?;
        Ok(Self { manager, dimension })
    }
}

#[async_trait]
impl VectorStore for FallbackVectorStore {
    async fn upsert(&self, embedding: Embedding) -> Result<(), StorageError> {
        if embedding.dimension() != self.dimension {
            return Err(StorageError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.dimension(),
            });
        }
        let metadata = serde_json::to_string(&embedding.metadata)?;
        let blob = vector_to_blob(&embedding.vector);
        let id = embedding.id.0.clone();
        let content = embedding.content.clone();
        let created_at = embedding.created_at.to_rfc3339();

        self.manager
            .with_write(move |conn| {
                conn.execute(
                    "INSERT INTO embeddings (id, content, metadata, created_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET content = excluded.content, metadata = excluded.metadata",
                    params![id, content, metadata, created_at],
                )?;
                conn.execute(
                    "INSERT INTO embeddings_blob (id, vector) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET vector = excluded.vector",
                    params![id, blob],
                )?;
                Ok(())
            })
            .await
    }

    async fn get(&self, id: &EmbeddingId) -> Result<Option<Embedding>, StorageError> {
        let id = id.0.clone();
        self.manager
            .read_pool()
            .with_read(move |conn| {
                conn.query_row(
                    "SELECT id, content, metadata, created_at FROM embeddings WHERE id = ?1",
                    params![id],
                    row_to_embedding_no_vector,
                )
                .optional()
                .map_err(StorageError::from)
            })
            .await
    }

    async fn search(&self, query_vector: &[f32], limit: usize) -> Result<Vec<VectorHit>, StorageError> {
        let query_vector = query_vector.to_vec();
        self.manager
            .read_pool()
            .with_read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT e.id, e.content, e.metadata, e.created_at, b.vector
                     FROM embeddings e JOIN embeddings_blob b ON e.id = b.id",
                )?;
                let rows: Vec<(Embedding, Vec<f32>)> = stmt
                    .query_map([], |row| {
                        let embedding = row_to_embedding_no_vector(row)?;
                        let blob: Vec<u8> = row.get(4)?;
                        Ok((embedding, vector_from_blob(&blob)))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;

                let mut hits: Vec<VectorHit> = rows
                    .into_iter()
                    .map(|(embedding, vector)| VectorHit {
                        score: cosine_similarity(&query_vector, &vector),
                        embedding,
                    })
                    .collect();
                hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
                hits.truncate(limit);
                Ok(hits)
            })
            .await
    }

    async fn stats(&self) -> Result<VectorStats, StorageError> {
        let count: i64 = self
            .manager
            .read_pool()
            .with_read(|conn| conn.query_row("SELECT COUNT(*) FROM embeddings_blob", [], |r| r.get(0)).map_err(StorageError::from))
            .await?;
        Ok(VectorStats {
            extension_loaded: false,
            count: count as u64,
            dimension: self.dimension,
        })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn row_to_embedding_no_vector(row: &rusqlite::Row<'_>) -> rusqlite::Result<Embedding> {
    let id: String = row.get(0)?;
    let content: String = row.get(1)?;
    let metadata_str: String = row.get(2)?;
    let created_at: String = row.get(3)?;
    Ok(Embedding {
        id: EmbeddingId(id),
        content,
        vector: Vec::new(),
        metadata: serde_json::from_str(&metadata_str).unwrap_or_default(),
        created_at: chrono::DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
    })
}

/// Opens the appropriate vector store implementation based on whether the
/// native extension loaded for this database (spec §4.8: "observable via a
/// `getVectorStats()` call").
pub async fn open_vector_store(
    manager: Arc<SqliteManager>,
    dimension: usize,
) -> Result<Arc<dyn VectorStore>, StorageError> {
    if manager.vector_extension_loaded() {
        Ok(Arc::new(NativeVectorStore::open(manager, dimension).await?))
    } else {
        Ok(Arc::new(FallbackVectorStore::open(manager, dimension).await?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn embedding(id: &str, vector: Vec<f32>) -> Embedding {
        Embedding {
            id: EmbeddingId(id.to_string()),
            content: id.to_string(),
            vector,
            metadata: HashMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn fallback_ranking_matches_cosine_similarity_order() {
        let dir = tempfile::tempdir().unwrap();
        let manager = Arc::new(SqliteManager::open(dir.path().join("vectors.db"), 1).unwrap());
        manager
            .with_write(|conn| {
                conn.execute_batch(
                    "CREATE TABLE IF NOT EXISTS embeddings (id TEXT PRIMARY KEY, content TEXT NOT NULL, metadata TEXT NOT NULL DEFAULT '{}', created_at TEXT NOT NULL)",
                )?;
                Ok(())
            })
            .await
            .unwrap();
        let store = FallbackVectorStore::open(manager, 3).await.unwrap();

        store.upsert(embedding("a", vec![1.0, 0.0, 0.0])).await.unwrap();
        store.upsert(embedding("b", vec![0.0, 1.0, 0.0])).await.unwrap();
        store.upsert(embedding("c", vec![0.9, 0.1, 0.0])).await.unwrap();

        let hits = store.search(&[1.0, 0.0, 0.0], 3).await.unwrap();
        assert_eq!(hits[0].embedding.id.0, "a");
        assert_eq!(hits[1].embedding.id.0, "c");
        assert_eq!(hits[2].embedding.id.0, "b");
    }
}
