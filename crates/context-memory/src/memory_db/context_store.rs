//! Conversation <-> document association table
use crate::error::{MemoryError, MemoryResult};
use crate::memory_db::document_store::row_to_document;
use crate::memory_db::schema::*;
use rusqlite::params;
use chrono::Utc;
use tracing::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub struct ContextStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ContextStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Upsert an association. A repeat replaces both score and timestamp.
    pub fn add_context(
        &self,
        conversation_id: &str,
        document_id: &str,
        relevance_score: f64,
    ) -> MemoryResult<ContextAssociation> {
        if !relevance_score.is_finite() || relevance_score < 0.0 {
            return Err(MemoryError::Validation(format!(
                "relevance score must be a finite non-negative number, got {}",
                relevance_score
            )));
        }

        let association = ContextAssociation {
            conversation_id: conversation_id.to_string(),
            document_id: document_id.to_string(),
            relevance_score,
            added_at: Utc::now(),
        };

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO conversation_context (conversation_id, document_id, relevance_score, added_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (conversation_id, document_id)
             DO UPDATE SET relevance_score = excluded.relevance_score, added_at = excluded.added_at",
            params![
                conversation_id,
                document_id,
                relevance_score,
                format_timestamp(&association.added_at),
            ],
        )?;

        debug!(
            "Linked document {} to conversation {} (score {:.4})",
            document_id, conversation_id, relevance_score
        );
        Ok(association)
    }

    /// Associated documents, highest score first, newest first among equals.
    pub fn get_context_for_conversation(&self, conversation_id: &str) -> MemoryResult<Vec<ContextEntry>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT cd.id, cd.title, cd.content, cd.metadata, cd.created_at, cd.updated_at,
                    cc.relevance_score, cc.added_at
             FROM context_documents cd
             JOIN conversation_context cc ON cd.id = cc.document_id
             WHERE cc.conversation_id = ?1
             ORDER BY cc.relevance_score DESC, cc.added_at DESC, cd.id",
        )?;
        let mut rows = stmt.query([conversation_id])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(ContextEntry {
                document: row_to_document(row, 0)?,
                relevance_score: row.get(6)?,
                added_at: parse_timestamp(&row.get::<_, String>(7)?),
            });
        }
        Ok(entries)
    }

    pub fn associated_document_ids(&self, conversation_id: &str) -> MemoryResult<HashSet<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT document_id FROM conversation_context WHERE conversation_id = ?1",
        )?;
        let ids = stmt
            .query_map([conversation_id], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?;
        Ok(ids)
    }

    pub fn get_association(
        &self,
        conversation_id: &str,
        document_id: &str,
    ) -> MemoryResult<Option<ContextAssociation>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT relevance_score, added_at FROM conversation_context
             WHERE conversation_id = ?1 AND document_id = ?2",
        )?;
        let mut rows = stmt.query(params![conversation_id, document_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(ContextAssociation {
                conversation_id: conversation_id.to_string(),
                document_id: document_id.to_string(),
                relevance_score: row.get(0)?,
                added_at: parse_timestamp(&row.get::<_, String>(1)?),
            })),
            None => Ok(None),
        }
    }

    /// Idempotent; removing a missing edge is not an error.
    pub fn remove_context(&self, conversation_id: &str, document_id: &str) -> MemoryResult<bool> {
        let conn = self.get_conn()?;
        let removed = conn.execute(
            "DELETE FROM conversation_context WHERE conversation_id = ?1 AND document_id = ?2",
            params![conversation_id, document_id],
        )?;
        if removed > 0 {
            info!("Unlinked document {} from conversation {}", document_id, conversation_id);
        }
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_db::MemoryDatabase;

    fn setup() -> (MemoryDatabase, Document, Document) {
        let db = MemoryDatabase::new_in_memory().unwrap();
        db.conversations.ensure("conv", None).unwrap();
        let a = db.documents.create("Alpha", "first document", Metadata::new()).unwrap();
        let b = db.documents.create("Beta", "second document", Metadata::new()).unwrap();
        (db, a, b)
    }

    #[test]
    fn test_upsert_replaces_score() {
        let (db, a, _) = setup();
        let first = db.contexts.add_context("conv", &a.id, 0.3).unwrap();
        let second = db.contexts.add_context("conv", &a.id, 0.9).unwrap();

        let entries = db.contexts.get_context_for_conversation("conv").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].relevance_score, 0.9);
        assert!(second.added_at >= first.added_at);

        let stored = db.contexts.get_association("conv", &a.id).unwrap().unwrap();
        assert_eq!(stored.relevance_score, 0.9);
        assert_eq!(stored.added_at, second.added_at);
    }

    #[test]
    fn test_ordering_by_score_then_recency() {
        let (db, a, b) = setup();
        let c = db.documents.create("Gamma", "third document", Metadata::new()).unwrap();
        db.contexts.add_context("conv", &a.id, 0.5).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        db.contexts.add_context("conv", &b.id, 0.5).unwrap();
        db.contexts.add_context("conv", &c.id, 0.8).unwrap();

        let ids: Vec<_> = db.contexts
            .get_context_for_conversation("conv")
            .unwrap()
            .into_iter()
            .map(|e| e.document.id)
            .collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);
    }

    #[test]
    fn test_rejects_negative_or_nan_scores() {
        let (db, a, _) = setup();
        assert!(matches!(db.contexts.add_context("conv", &a.id, -0.1), Err(MemoryError::Validation(_))));
        assert!(matches!(db.contexts.add_context("conv", &a.id, f64::NAN), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let (db, a, b) = setup();
        db.contexts.add_context("conv", &a.id, 0.5).unwrap();
        db.contexts.add_context("conv", &b.id, 0.5).unwrap();

        assert!(db.contexts.remove_context("conv", &a.id).unwrap());
        assert!(!db.contexts.remove_context("conv", &a.id).unwrap());
        assert!(!db.contexts.remove_context("conv", "missing").unwrap());

        let ids = db.contexts.associated_document_ids("conv").unwrap();
        assert_eq!(ids.len(), 1);
        assert!(ids.contains(&b.id));
    }

    #[test]
    fn test_deleting_document_drops_association() {
        let (db, a, _) = setup();
        db.contexts.add_context("conv", &a.id, 0.5).unwrap();
        db.documents.delete(&a.id).unwrap();
        assert!(db.contexts.get_context_for_conversation("conv").unwrap().is_empty());
    }

    #[test]
    fn test_unknown_document_is_rejected_by_store() {
        let (db, _, _) = setup();
        assert!(matches!(db.contexts.add_context("conv", "missing", 0.5), Err(MemoryError::Store(_))));
    }
}
