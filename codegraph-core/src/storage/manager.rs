//! Owns the single writable SQLite connection and a bounded pool of
//! read-only connections. All writes are serialized behind the write
//! connection's lock; reads run concurrently against the pool, bounded by a
//! semaphore so load never exceeds the configured pool size (spec §4.8,
//! §5: "Writers do not block readers").
//!
//! Every blocking `rusqlite` call is dispatched through
//! `tokio::task::spawn_blocking`, the same idiom the vector-store
//! implementations in the memory module use throughout.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::warn;

use super::error::StorageError;

static SQLITE_VEC_INIT: std::sync::Once = std::sync::Once::new();

/// Attempts to register the `sqlite-vec` extension with SQLite's global
/// auto-extension hook. Idempotent; safe to call from multiple managers.
pub(crate) fn register_vector_extension() {
    SQLITE_VEC_INIT.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

/// A bounded pool of read-only connections, each guarded by its own lock so
/// multiple readers run concurrently while still respecting a hard cap on
/// the number of open connections.
pub struct ReadPool {
    connections: Vec<Arc<StdMutex<rusqlite::Connection>>>,
    semaphore: Arc<Semaphore>,
    next: AtomicUsize,
}

impl ReadPool {
    fn open(path: &Path, size: usize) -> Result<Self, StorageError> {
        let size = size.max(1);
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = rusqlite::Connection::open_with_flags(
                path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            connections.push(Arc::new(StdMutex::new(conn)));
        }
        Ok(Self {
            connections,
            semaphore: Arc::new(Semaphore::new(size)),
            next: AtomicUsize::new(0),
        })
    }

    /// Runs a blocking closure against one pooled read connection. Acquires a
    /// semaphore permit first so concurrent reads never exceed pool size.
    pub async fn with_read<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("semaphore is never closed");
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        let conn = self.connections[idx].clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("read connection mutex poisoned");
            f(&guard)
        })
        .await?;
        drop(permit);
        result
    }
}

/// Owns the database's single writable connection and its read pool, and
/// reports whether the native vector extension loaded successfully.
pub struct SqliteManager {
    path: PathBuf,
    write_conn: Arc<AsyncMutex<rusqlite::Connection>>,
    read_pool: Arc<ReadPool>,
    vector_extension_loaded: AtomicBool,
}

impl SqliteManager {
    /// Opens (creating if absent) the database at `path`, enables WAL mode,
    /// attempts to load the vector extension, runs the startup migration
    /// check, and opens `read_pool_size` read-only connections.
    pub fn open(path: impl AsRef<Path>, read_pool_size: usize) -> Result<Self, StorageError> {
        register_vector_extension();

        let path = path.as_ref().to_path_buf();
        let write_conn = rusqlite::Connection::open(&path)?;
        write_conn.pragma_update(None, "journal_mode", "WAL")?;
        write_conn.pragma_update(None, "foreign_keys", "ON")?;

        let vector_extension_loaded = probe_vector_extension(&write_conn);
        if !vector_extension_loaded {
            warn!(db_path = %path.display(), "vector extension unavailable, operating in brute-force fallback mode");
        }

        super::migration::run_startup_migration(&write_conn, &path)?;

        let read_pool = ReadPool::open(&path, read_pool_size.clamp(1, 4))?;

        Ok(Self {
            path,
            write_conn: Arc::new(AsyncMutex::new(write_conn)),
            read_pool: Arc::new(read_pool),
            vector_extension_loaded: AtomicBool::new(vector_extension_loaded),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn vector_extension_loaded(&self) -> bool {
        self.vector_extension_loaded.load(Ordering::Relaxed)
    }

    pub fn read_pool(&self) -> Arc<ReadPool> {
        self.read_pool.clone()
    }

    /// Runs a blocking closure with exclusive access to the write connection.
    /// Callers that need a transaction should call `conn.transaction()`
    /// inside `f` so a batch either fully commits or fully rolls back.
    pub async fn with_write<F, T>(&self, f: F) -> Result<T, StorageError>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.write_conn.clone();
        tokio::task::spawn_blocking(move || {
            // blocking_lock is fine: we're already inside spawn_blocking.
            let mut guard = conn.blocking_lock();
            f(&mut guard)
        })
        .await?
    }

    /// Forces a full WAL checkpoint, folding `-wal` back into the main
    /// database file. Called on shutdown (spec.md "exit codes") so a killed
    /// process doesn't leave uncommitted WAL frames as the only copy of
    /// recently indexed data.
    pub async fn checkpoint_wal(&self) -> Result<(), StorageError> {
        self.with_write(|conn| {
            conn.pragma_update(None, "wal_checkpoint", "TRUNCATE")?;
            Ok(())
        })
        .await
    }
}

fn probe_vector_extension(conn: &rusqlite::Connection) -> bool {
    conn.execute_batch("CREATE VIRTUAL TABLE IF NOT EXISTS __vec_probe USING vec0(embedding float[1])")
        .and_then(|_| conn.execute_batch("DROP TABLE IF EXISTS __vec_probe"))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_creates_wal_database_and_read_pool() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("vectors.db");
        let manager = SqliteManager::open(&db_path, 2).unwrap();
        assert!(db_path.exists());
        let mode: String = manager
            .with_write(|conn| {
                Ok(conn
                    .pragma_query_value(None, "journal_mode", |row| row.get(0))
                    .unwrap())
            })
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn checkpoint_wal_succeeds_on_a_freshly_opened_database() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SqliteManager::open(dir.path().join("vectors.db"), 1).unwrap();
        manager.checkpoint_wal().await.unwrap();
    }
}
