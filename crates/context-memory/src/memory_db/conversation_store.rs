//! Conversation rows and their append-only message log
use crate::error::{MemoryError, MemoryResult};
use crate::memory_db::schema::*;
use rusqlite::{params, Connection, OptionalExtension, Row};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;
use tracing::{debug, info};
use std::sync::Arc;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

const CONVERSATION_COLUMNS: &str = "id, user_id, title, context_summary, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, context_used, tokens_used, created_at";

pub struct ConversationStore {
    pool: Arc<Pool<SqliteConnectionManager>>,
}

impl ConversationStore {
    pub fn new(pool: Arc<Pool<SqliteConnectionManager>>) -> Self {
        Self { pool }
    }

    fn get_conn(&self) -> MemoryResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    pub fn get(&self, id: &str) -> MemoryResult<Option<Conversation>> {
        let conn = self.get_conn()?;
        Self::get_with_conn(&conn, id)
    }

    fn get_with_conn(conn: &Connection, id: &str) -> MemoryResult<Option<Conversation>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM conversations WHERE id = ?1",
            CONVERSATION_COLUMNS
        ))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_conversation(row)?)),
            None => Ok(None),
        }
    }

    /// Return the conversation, creating it with the sentinel title if absent.
    ///
    /// Safe to race: the insert is `OR IGNORE` and the row is re-read afterwards.
    pub fn ensure(&self, id: &str, user_id: Option<&str>) -> MemoryResult<Conversation> {
        let conn = self.get_conn()?;
        let now = format_timestamp(&Utc::now());
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO conversations (id, user_id, title, context_summary, created_at, updated_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
            params![id, user_id, SENTINEL_TITLE, now],
        )?;
        if inserted > 0 {
            info!("Created conversation {}", id);
        }
        Self::get_with_conn(&conn, id)?.ok_or_else(|| MemoryError::not_found("Conversation", id))
    }

    /// One-shot title transition. Returns false when a title was already set.
    pub fn set_title_if_untitled(&self, id: &str, title: &str) -> MemoryResult<bool> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE conversations SET title = ?1, updated_at = ?2
             WHERE id = ?3 AND (title = ?4 OR title = '')",
            params![title, format_timestamp(&Utc::now()), id, SENTINEL_TITLE],
        )?;
        if updated > 0 {
            info!("Titled conversation {}: {}", id, title);
        }
        Ok(updated > 0)
    }

    pub fn update_context_summary(&self, id: &str, summary: Option<&str>) -> MemoryResult<()> {
        let conn = self.get_conn()?;
        let updated = conn.execute(
            "UPDATE conversations SET context_summary = ?1, updated_at = ?2 WHERE id = ?3",
            params![summary, format_timestamp(&Utc::now()), id],
        )?;
        if updated == 0 {
            return Err(MemoryError::not_found("Conversation", id));
        }
        Ok(())
    }

    /// Append one message. Its timestamp is kept strictly after the latest
    /// message already in the conversation.
    pub fn append_message(
        &self,
        conversation_id: &str,
        role: MessageRole,
        content: &str,
        context_used: Option<&ContextSnapshot>,
        tokens_used: Option<i64>,
    ) -> MemoryResult<StoredMessage> {
        let conn = self.get_conn()?;

        let latest: Option<String> = conn
            .query_row(
                "SELECT MAX(created_at) FROM messages WHERE conversation_id = ?1",
                [conversation_id],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        let mut created_at = Utc::now();
        if let Some(latest) = latest.map(|ts| parse_timestamp(&ts)) {
            if created_at <= latest {
                created_at = latest + Duration::nanoseconds(1);
            }
        }

        let message = StoredMessage {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            context_used: context_used.filter(|snapshot| !snapshot.is_empty()).cloned(),
            tokens_used,
            created_at,
        };
        let context_json = match &message.context_used {
            Some(snapshot) => Some(serde_json::to_string(snapshot)?),
            None => None,
        };

        conn.execute(
            "INSERT INTO messages (id, conversation_id, role, content, context_used, tokens_used, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &message.id,
                &message.conversation_id,
                message.role.as_str(),
                &message.content,
                context_json,
                message.tokens_used,
                format_timestamp(&message.created_at),
            ],
        )?;

        debug!("Appended {} message to conversation {}", role, conversation_id);
        Ok(message)
    }

    /// Most recent `limit` messages (all when `None`), oldest first.
    pub fn get_messages(&self, conversation_id: &str, limit: Option<usize>) -> MemoryResult<Vec<StoredMessage>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
            MESSAGE_COLUMNS
        ))?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut rows = stmt.query(params![conversation_id, limit])?;
        let mut messages = Vec::new();
        while let Some(row) = rows.next()? {
            messages.push(row_to_message(row)?);
        }
        messages.reverse();
        Ok(messages)
    }

    pub fn message_count(&self, conversation_id: &str) -> MemoryResult<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Drop messages and associations, reset title and summary, keep the row.
    /// Returns false when the conversation does not exist.
    pub fn clear(&self, conversation_id: &str) -> MemoryResult<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row("SELECT 1 FROM conversations WHERE id = ?1", [conversation_id], |_| Ok(true))
            .optional()?
            .unwrap_or(false);
        if !exists {
            return Ok(false);
        }

        let messages = tx.execute("DELETE FROM messages WHERE conversation_id = ?1", [conversation_id])?;
        let contexts = tx.execute(
            "DELETE FROM conversation_context WHERE conversation_id = ?1",
            [conversation_id],
        )?;
        tx.execute(
            "UPDATE conversations SET title = ?1, context_summary = NULL, updated_at = ?2 WHERE id = ?3",
            params![SENTINEL_TITLE, format_timestamp(&Utc::now()), conversation_id],
        )?;
        tx.commit()?;

        info!(
            "Cleared conversation {} ({} messages, {} context links)",
            conversation_id, messages, contexts
        );
        Ok(true)
    }
}

fn row_to_conversation(row: &Row) -> MemoryResult<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        context_summary: row.get(3)?,
        created_at: parse_timestamp(&row.get::<_, String>(4)?),
        updated_at: parse_timestamp(&row.get::<_, String>(5)?),
    })
}

fn row_to_message(row: &Row) -> MemoryResult<StoredMessage> {
    let role: String = row.get(2)?;
    let role = role
        .parse::<MessageRole>()
        .map_err(MemoryError::Store)?;
    let context_used = match row.get::<_, Option<String>>(4)? {
        Some(json) => Some(serde_json::from_str(&json)?),
        None => None,
    };
    let created_at: DateTime<Utc> = parse_timestamp(&row.get::<_, String>(6)?);

    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        role,
        content: row.get(3)?,
        context_used,
        tokens_used: row.get(5)?,
        created_at,
    })
}
