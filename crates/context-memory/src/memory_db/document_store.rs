//! Context document storage and lexical ranking
use crate::error::{MemoryError, MemoryResult};
use crate::memory_db::schema::*;
use crate::memory_db::UNICODE_LOWER_FN;
use crate::utils::TextUtils;
use rusqlite::{params, Row};
use chrono::Utc;
use uuid::Uuid;
use tracing::{debug, info};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const DOCUMENT_COLUMNS: &str = "id, title, content, metadata, created_at, updated_at";

pub struct DocumentStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl DocumentStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Insert a new document. Title and content must not be blank.
    pub fn create(&self, title: &str, content: &str, metadata: Metadata) -> MemoryResult<Document> {
        if title.trim().is_empty() || content.trim().is_empty() {
            return Err(MemoryError::Validation("Title and content are required".to_string()));
        }

        let now = Utc::now();
        let document = Document {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            content: content.to_string(),
            metadata,
            created_at: now,
            updated_at: now,
        };

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO context_documents (id, title, content, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                &document.id,
                &document.title,
                &document.content,
                serde_json::to_string(&document.metadata)?,
                format_timestamp(&document.created_at),
                format_timestamp(&document.updated_at),
            ],
        )?;

        info!("Created context document {} ('{}')", document.id, document.title);
        Ok(document)
    }

    /// Newest first.
    pub fn find_all(&self, limit: usize) -> MemoryResult<Vec<Document>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM context_documents ORDER BY created_at DESC, id LIMIT ?1",
            DOCUMENT_COLUMNS
        ))?;
        let mut rows = stmt.query([limit as i64])?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(row_to_document(row, 0)?);
        }
        Ok(documents)
    }

    pub fn find_by_id(&self, id: &str) -> MemoryResult<Document> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM context_documents WHERE id = ?1",
            DOCUMENT_COLUMNS
        ))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => row_to_document(row, 0),
            None => Err(MemoryError::not_found("Document", id)),
        }
    }

    pub fn exists(&self, id: &str) -> MemoryResult<bool> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM context_documents WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Lexical search over `title + " " + content`, best rank first.
    ///
    /// Every query term has to occur in the document. Rows are prefiltered in
    /// SQL by term root and then scored with [`lexical_rank`]. Store failures
    /// surface as [`MemoryError::RankingUnavailable`].
    pub fn search(&self, term: &str, limit: usize) -> MemoryResult<Vec<RankedDocument>> {
        let terms = TextUtils::query_terms(term);
        if terms.is_empty() || limit == 0 {
            debug!("Search '{}' has no significant terms", term);
            return Ok(Vec::new());
        }

        let candidates = self
            .find_candidates(&terms)
            .map_err(|e| MemoryError::RankingUnavailable(e.to_string()))?;

        let mut ranked: Vec<RankedDocument> = candidates
            .into_iter()
            .filter_map(|document| {
                let text = format!("{} {}", document.title, document.content);
                lexical_rank(&terms, &text).map(|rank| RankedDocument { document, rank })
            })
            .collect();

        ranked.sort_by(|a, b| {
            b.rank
                .partial_cmp(&a.rank)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.document.created_at.cmp(&a.document.created_at))
                .then_with(|| a.document.id.cmp(&b.document.id))
        });
        ranked.truncate(limit);

        debug!("Search '{}' matched {} documents", term, ranked.len());
        Ok(ranked)
    }

    /// Rows whose lowercased `title + " " + content` holds the root of every
    /// term. Lowercasing goes through the same Unicode folding the tokenizer
    /// uses, so no row the scorer would accept is filtered out.
    fn find_candidates(&self, terms: &[String]) -> MemoryResult<Vec<Document>> {
        let roots: Vec<&str> = terms.iter().map(|t| TextUtils::match_root(t)).collect();

        let mut query = format!("SELECT {} FROM context_documents WHERE 1=1", DOCUMENT_COLUMNS);
        for i in 0..roots.len() {
            query.push_str(&format!(
                " AND instr({}(title || ' ' || content), ?{}) > 0",
                UNICODE_LOWER_FN,
                i + 1
            ));
        }

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&query)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(roots.iter()))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            documents.push(row_to_document(row, 0)?);
        }
        Ok(documents)
    }

    /// Idempotent; associations referencing the document go with it.
    pub fn delete(&self, id: &str) -> MemoryResult<bool> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM context_documents WHERE id = ?1", [id])?;
        if deleted > 0 {
            info!("Deleted context document {}", id);
        }
        Ok(deleted > 0)
    }
}

/// Term-frequency rank in (0, 1), or `None` unless every term occurs.
///
/// `raw = Σ ln(1 + tf)` over the query terms, squashed with `raw / (raw + 1)`.
pub fn lexical_rank(terms: &[String], text: &str) -> Option<f64> {
    let mut frequencies: HashMap<String, u32> = HashMap::new();
    for token in TextUtils::tokenize(text) {
        *frequencies.entry(token).or_insert(0) += 1;
    }

    let mut raw = 0.0;
    for term in terms {
        let tf = *frequencies.get(term)?;
        raw += (1.0 + tf as f64).ln();
    }
    if raw <= 0.0 {
        return None;
    }
    Some(raw / (raw + 1.0))
}

/// Map a row holding the document columns starting at `offset`.
pub(crate) fn row_to_document(row: &Row, offset: usize) -> MemoryResult<Document> {
    let metadata_json: String = row.get(offset + 3)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json)?;
    Ok(Document {
        id: row.get(offset)?,
        title: row.get(offset + 1)?,
        content: row.get(offset + 2)?,
        metadata,
        created_at: parse_timestamp(&row.get::<_, String>(offset + 4)?),
        updated_at: parse_timestamp(&row.get::<_, String>(offset + 5)?),
    })
}
