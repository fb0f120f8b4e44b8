//! Database migration system

use rusqlite::{params, Connection, Result};
use tracing::{error, info, warn};
use chrono::Utc;
use uuid::Uuid;

use crate::memory_db::schema::{self, format_timestamp, Metadata};

/// Manages database schema migrations
pub struct MigrationManager<'a> {
    conn: &'a mut Connection,
}

impl<'a> MigrationManager<'a> {
    /// Create a new migration manager
    pub fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }

    /// Initialize database with current schema
    pub fn initialize_database(&mut self) -> Result<()> {
        info!("Initializing context memory schema...");

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        let current_version = self.get_current_version()?;
        info!("Current database schema version: {}", current_version);

        self.apply_migrations(current_version)
    }

    /// Apply all pending migrations
    fn apply_migrations(&mut self, current_version: i32) -> Result<()> {
        for (version, migration_sql) in get_migrations() {
            if version <= current_version {
                continue;
            }
            info!("Applying migration {}...", version);

            let tx = self.conn.transaction()?;
            if let Err(e) = tx.execute_batch(migration_sql) {
                error!("Failed to apply migration {}: {}", version, e);
                return Err(e);
            }
            tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
            tx.commit()?;

            info!("Migration {} applied successfully", version);
        }
        Ok(())
    }

    /// Get current schema version
    pub fn get_current_version(&self) -> Result<i32> {
        self.conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
    }

    #[cfg(test)]
    fn has_migration_applied(&self, version: i32) -> Result<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM schema_version WHERE version = ?1",
                [version],
                |_| Ok(1),
            )
            .map(|_: i32| true)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(false),
                other => Err(other),
            })
    }
}

fn get_migrations() -> Vec<(i32, &'static str)> {
    vec![(1, include_str!("migrations/001_initial.sql"))]
}

/// Get database statistics from a connection
pub fn get_database_stats(conn: &Connection) -> Result<schema::DatabaseStats> {
    fn get_table_count(conn: &Connection, table_name: &str) -> Result<i64> {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table_name), [], |row| row.get(0))
            .or_else(|e| {
                warn!("Failed to get count from table {}: {}", table_name, e);
                Ok(0)
            })
    }

    let database_size_bytes: i64 = conn
        .query_row(
            "SELECT page_count * page_size FROM pragma_page_count(), pragma_page_size()",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    Ok(schema::DatabaseStats {
        total_conversations: get_table_count(conn, "conversations")?,
        total_messages: get_table_count(conn, "messages")?,
        total_documents: get_table_count(conn, "context_documents")?,
        total_associations: get_table_count(conn, "conversation_context")?,
        database_size_bytes,
    })
}

/// Starter corpus inserted by `init` on an empty document table.
pub fn sample_documents() -> Vec<(&'static str, &'static str, Metadata)> {
    fn meta(pairs: &[(&str, &str)]) -> Metadata {
        pairs.iter().map(|(k, v)| (k.to_string(), (*v).into())).collect()
    }

    vec![
        (
            "AI Assistant Guidelines",
            "I am an AI assistant designed to be helpful, harmless, and honest. I can help with a wide variety of tasks including answering questions, writing, analysis, math, coding, and creative tasks.",
            meta(&[("type", "guidelines"), ("priority", "high")]),
        ),
        (
            "Technical Support",
            "For technical issues, please provide detailed information about your problem including error messages, steps to reproduce, and your system configuration.",
            meta(&[("type", "support"), ("category", "technical")]),
        ),
        (
            "Company Information",
            "We are a technology company focused on building AI-powered solutions to help businesses improve efficiency and customer experience.",
            meta(&[("type", "company"), ("department", "general")]),
        ),
    ]
}

/// Insert the sample documents when no documents exist. Returns how many were added.
pub fn seed_sample_documents(conn: &mut Connection) -> Result<usize> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM context_documents", [], |row| row.get(0))?;
    if existing > 0 {
        info!("Document table already holds {} rows, skipping sample data", existing);
        return Ok(0);
    }

    let tx = conn.transaction()?;
    let samples = sample_documents();
    for (title, content, metadata) in &samples {
        let now = format_timestamp(&Utc::now());
        let metadata_json = serde_json::to_string(metadata)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        tx.execute(
            "INSERT INTO context_documents (id, title, content, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![Uuid::new_v4().to_string(), title, content, metadata_json, now],
        )?;
    }
    tx.commit()?;

    info!("Inserted {} sample context documents", samples.len());
    Ok(samples.len())
}
