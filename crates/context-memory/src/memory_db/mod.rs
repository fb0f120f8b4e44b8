//! Memory database module - SQLite-backed storage for documents, conversations and context links
pub mod schema;
pub mod migration;
pub mod document_store;
pub mod conversation_store;
pub mod context_store;
pub use schema::*;
pub use migration::MigrationManager;
pub use document_store::DocumentStore;
pub use conversation_store::ConversationStore;
pub use context_store::ContextStore;
use std::path::Path;
use std::sync::Arc;
use r2d2::Pool;
use rusqlite::{functions::FunctionFlags, Connection};
use r2d2_sqlite::SqliteConnectionManager;
use tracing::info;
use crate::error::{MemoryError, MemoryResult};

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// SQL name of the Unicode-aware lowercase function. SQLite's own `LOWER`
/// only folds ASCII.
pub(crate) const UNICODE_LOWER_FN: &str = "unicode_lower";

/// Per-connection setup: pragmas plus the functions the stores query with.
fn init_connection(conn: &mut Connection) -> rusqlite::Result<()> {
    conn.execute_batch(CONNECTION_PRAGMAS)?;
    conn.create_scalar_function(
        UNICODE_LOWER_FN,
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let text: Option<String> = ctx.get(0)?;
            Ok(text.map(|t| t.to_lowercase()))
        },
    )
}

/// Pooled SQLite database exposing one store per entity.
pub struct MemoryDatabase {
    pub documents: DocumentStore,
    pub conversations: ConversationStore,
    pub contexts: ContextStore,
    pool: Arc<Pool<SqliteConnectionManager>>,
    file_backed: bool,
}

impl MemoryDatabase {
    /// Open (or create) a file database, run migrations and enable WAL.
    pub fn new(db_path: &Path, pool_size: u32) -> MemoryResult<Self> {
        info!("Opening memory database at: {}", db_path.display());
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| MemoryError::Store(format!("Failed to create {}: {}", parent.display(), e)))?;
            }
        }

        let manager = SqliteConnectionManager::file(db_path)
            .with_flags(
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .with_init(init_connection);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)?;

        {
            let mut conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }

        info!("Memory database initialized successfully");
        Ok(Self::from_pool(Arc::new(pool), true))
    }

    /// Private in-memory database. The pool holds a single long-lived
    /// connection so every caller sees the same data.
    pub fn new_in_memory() -> MemoryResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(init_connection);
        let pool = Pool::builder()
            .max_size(1)
            .max_lifetime(None)
            .idle_timeout(None)
            .build(manager)?;
        {
            let mut conn = pool.get()?;
            MigrationManager::new(&mut conn).initialize_database()?;
        }
        Ok(Self::from_pool(Arc::new(pool), false))
    }

    fn from_pool(pool: Arc<Pool<SqliteConnectionManager>>, file_backed: bool) -> Self {
        Self {
            documents: DocumentStore::new(Arc::clone(&pool)),
            conversations: ConversationStore::new(Arc::clone(&pool)),
            contexts: ContextStore::new(Arc::clone(&pool)),
            pool,
            file_backed,
        }
    }

    /// Run a synchronous store call on the blocking thread pool.
    pub async fn run<T, F>(self: &Arc<Self>, f: F) -> MemoryResult<T>
    where
        F: FnOnce(&MemoryDatabase) -> MemoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&db)).await?
    }

    pub fn get_stats(&self) -> MemoryResult<DatabaseStats> {
        let conn = self.pool.get()?;
        Ok(migration::get_database_stats(&conn)?)
    }

    /// Insert the starter documents if the corpus is empty.
    pub fn seed_sample_documents(&self) -> MemoryResult<usize> {
        let mut conn = self.pool.get()?;
        Ok(migration::seed_sample_documents(&mut conn)?)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> MemoryResult<()> {
        let conn = self.pool.get()?;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl Drop for MemoryDatabase {
    fn drop(&mut self) {
        if self.file_backed {
            if let Ok(conn) = self.pool.get() {
                let _ = conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.db");

        let doc_id = {
            let db = MemoryDatabase::new(&path, 4).unwrap();
            assert_eq!(db.seed_sample_documents().unwrap(), 3);
            db.conversations.ensure("sess", None).unwrap();
            db.documents.find_all(1).unwrap()[0].id.clone()
        };

        let db = MemoryDatabase::new(&path, 4).unwrap();
        let stats = db.get_stats().unwrap();
        assert_eq!(stats.total_documents, 3);
        assert_eq!(stats.total_conversations, 1);
        assert!(db.documents.exists(&doc_id).unwrap());
        assert_eq!(db.seed_sample_documents().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_run_executes_on_blocking_pool() {
        let db = Arc::new(MemoryDatabase::new_in_memory().unwrap());
        let conversation = db
            .run(|db| db.conversations.ensure("sess", None))
            .await
            .unwrap();
        assert_eq!(conversation.id, "sess");
        assert_eq!(db.get_stats().unwrap().total_conversations, 1);
    }
}
