//! Startup migration: detects a legacy foreign key from `embeddings` to the
//! vector table and rewrites `embeddings` without the cross-table
//! constraint, preserving all rows. A timestamped backup is produced before
//! any destructive change, and a marker row prevents the migration from
//! running twice (spec §4.8, §8 scenario 6).

use std::path::Path;

use chrono::Utc;
use tracing::info;

use super::error::StorageError;

const MARKER_KEY: &str = "fk_migration_v1";

/// Runs once per database file. Safe to call on every open; a no-op after
/// the first successful run.
pub fn run_startup_migration(conn: &rusqlite::Connection, db_path: &Path) -> Result<(), StorageError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (key TEXT PRIMARY KEY, applied_at TEXT NOT NULL)",
    )?;

    let already_applied: bool = conn
        .query_row(
            "SELECT 1 FROM schema_migrations WHERE key = ?1",
            [MARKER_KEY],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if already_applied {
        return Ok(());
    }

    if !has_legacy_foreign_key(conn)? {
        mark_applied(conn)?;
        return Ok(());
    }

    backup_database(db_path)?;

    conn.execute_batch(
        r#"
        BEGIN;
        ALTER TABLE embeddings RENAME TO embeddings_legacy;
        CREATE TABLE embeddings (
            id TEXT PRIMARY KEY,
            content TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        INSERT INTO embeddings (id, content, metadata, created_at)
            SELECT id, content, metadata, created_at FROM embeddings_legacy;
        DROP TABLE embeddings_legacy;
        CREATE INDEX IF NOT EXISTS idx_embeddings_created_at ON embeddings(created_at);
        COMMIT;
        "#,
    )?;

    mark_applied(conn)?;
    info!("migrated embeddings table off legacy cross-table foreign key");
    Ok(())
}

fn has_legacy_foreign_key(conn: &rusqlite::Connection) -> Result<bool, StorageError> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'embeddings'",
            [],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if !exists {
        return Ok(false);
    }

    let mut stmt = conn.prepare("PRAGMA foreign_key_list(embeddings)")?;
    let has_fk = stmt
        .query_map([], |row| row.get::<_, String>("table"))?
        .filter_map(Result::ok)
        .any(|referenced_table| referenced_table.starts_with("vec_"));
    Ok(has_fk)
}

fn mark_applied(conn: &rusqlite::Connection) -> Result<(), StorageError> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_migrations (key, applied_at) VALUES (?1, ?2)",
        rusqlite::params![MARKER_KEY, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn backup_database(db_path: &Path) -> Result<(), StorageError> {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let backup_path = db_path.with_file_name(format!(
        "{}.backup-{timestamp}",
        db_path.file_name().and_then(|n| n.to_str()).unwrap_or("vectors.db")
    ));
    std::fs::copy(db_path, &backup_path)?;
    info!(backup = %backup_path.display(), "wrote pre-migration backup");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migration_is_idempotent_with_no_legacy_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        run_startup_migration(&conn, &path).unwrap();
        run_startup_migration(&conn, &path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schema_migrations WHERE key = ?1",
                [MARKER_KEY],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn migration_rewrites_legacy_embeddings_table_and_preserves_rows() {
        super::super::manager::register_vector_extension();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vectors.db");
        let conn = rusqlite::Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE VIRTUAL TABLE vec_embeddings USING vec0(embedding float[4]);
            CREATE TABLE embeddings (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                FOREIGN KEY (rowid) REFERENCES vec_embeddings(rowid)
            );
            INSERT INTO embeddings (id, content, metadata, created_at)
                VALUES ('ent:1', 'hello', '{}', '2024-01-01T00:00:00Z');
            "#,
        )
        .unwrap();

        run_startup_migration(&conn, &path).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM embeddings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let backups: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
            .collect();
        assert_eq!(backups.len(), 1);

        run_startup_migration(&conn, &path).unwrap();
        let backups_again: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup-"))
            .collect();
        assert_eq!(backups_again.len(), 1, "migration must not rerun");
    }
}
