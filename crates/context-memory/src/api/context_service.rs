//! Service facade over the memory subsystem
//!
//! Every session-scoped call resolves its [`ConversationMemory`] through the
//! shared [`SessionMemoryCache`]. Document and association calls go straight
//! to the stores.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context_engine::{
    relevance_ranker::DEFAULT_RELEVANT_LIMIT, ContextBuilder, ConversationContext, RelevanceRanker,
};
use crate::context_engine::context_builder::PROMPT_CONTEXT_LIMIT;
use crate::error::{MemoryError, MemoryResult};
use crate::memory_db::{
    ContextEntry, ContextSnapshot, DatabaseStats, Document, MemoryDatabase, Metadata, RankedDocument,
};
use crate::model_runtime::LanguageModel;
use crate::shared_state::SessionMemoryCache;

/// Score given to documents attached by an explicit caller request.
pub const MANUAL_ATTACH_SCORE: f64 = 0.8;

/// Page size for document listings.
pub const DEFAULT_DOCUMENT_LIMIT: usize = 100;

const MAX_SESSION_ID_LEN: usize = 256;

/// Result of one answered turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub response: String,
    pub context_used: ContextSnapshot,
}

/// Entry point for the calling layer.
///
/// Any session id passed in, including on read-only calls, gets a cached
/// [`ConversationMemory`](crate::context_engine::ConversationMemory) that
/// stays until `clear` or [`evict_idle_sessions`](Self::evict_idle_sessions).
/// Nothing evicts on a timer; the embedding layer has to call
/// `evict_idle_sessions` periodically.
pub struct ContextService {
    database: Arc<MemoryDatabase>,
    sessions: SessionMemoryCache,
    ranker: RelevanceRanker,
    config: Config,
}

impl ContextService {
    pub fn new(database: Arc<MemoryDatabase>, config: Config) -> Self {
        info!(
            "Context service ready (context enabled: {}, max history: {})",
            config.context_enabled, config.max_history
        );
        Self {
            sessions: SessionMemoryCache::new(Arc::clone(&database), config.memory_options()),
            ranker: RelevanceRanker::new(Arc::clone(&database)),
            database,
            config,
        }
    }

    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }

    pub fn sessions(&self) -> &SessionMemoryCache {
        &self.sessions
    }

    // ===== Session memory =====

    pub async fn load_context(&self, session_id: &str) -> ConversationContext {
        self.sessions.get_or_create(session_id).load_context().await
    }

    pub async fn build_context_prompt(&self, session_id: &str) -> String {
        self.sessions.get_or_create(session_id).build_context_prompt().await
    }

    pub async fn save_exchange(
        &self,
        session_id: &str,
        user_input: &str,
        assistant_output: &str,
    ) -> MemoryResult<()> {
        validate_session_id(session_id)?;
        self.sessions
            .get_or_create(session_id)
            .save_exchange(user_input, assistant_output)
            .await
    }

    /// Wipe the session's history and context, then drop its cached memory.
    pub async fn clear(&self, session_id: &str) -> MemoryResult<bool> {
        validate_session_id(session_id)?;
        let cleared = self.sessions.get_or_create(session_id).clear().await?;
        self.sessions.remove(session_id);
        Ok(cleared)
    }

    pub async fn conversation_summary(&self, session_id: &str) -> String {
        self.sessions.get_or_create(session_id).conversation_summary().await
    }

    /// Answer one user turn: load memory, prompt the model, store the exchange.
    ///
    /// A generation failure is returned as is and nothing is stored.
    pub async fn respond(
        &self,
        session_id: &str,
        user_input: &str,
        model: &dyn LanguageModel,
    ) -> anyhow::Result<TurnOutcome> {
        validate_session_id(session_id)?;
        if user_input.trim().is_empty() {
            return Err(MemoryError::Validation("user input cannot be empty".to_string()).into());
        }

        let memory = self.sessions.get_or_create(session_id);
        let loaded = memory.load_context().await;

        let rendered = &loaded.context[..loaded.context.len().min(PROMPT_CONTEXT_LIMIT)];
        let context_block = ContextBuilder::render_context_block(rendered);
        let prompt = ContextBuilder::build_turn_prompt(&context_block, &loaded.history, user_input);
        debug!(
            "Generating with {} for session {} ({} history messages, {} context documents)",
            model.name(),
            session_id,
            loaded.history.len(),
            rendered.len()
        );

        let response = model.generate(&prompt).await.map_err(|e| {
            warn!("Generation failed for session {}: {}", session_id, e);
            e
        })?;

        let snapshot = ContextSnapshot::from_entries(rendered);
        memory
            .save_exchange_with_context(user_input, &response, Some(snapshot.clone()))
            .await?;

        Ok(TurnOutcome {
            session_id: session_id.to_string(),
            response,
            context_used: snapshot,
        })
    }

    /// Drop cached memories idle longer than the configured window.
    pub fn evict_idle_sessions(&self) -> usize {
        self.sessions.evict_idle(self.config.session_idle())
    }

    // ===== Documents =====

    pub async fn add_document(&self, title: &str, content: &str, metadata: Metadata) -> MemoryResult<Document> {
        let (title, content) = (title.to_string(), content.to_string());
        self.database
            .run(move |db| db.documents.create(&title, &content, metadata))
            .await
    }

    pub async fn list_documents(&self, limit: Option<usize>) -> MemoryResult<Vec<Document>> {
        let limit = limit.unwrap_or(DEFAULT_DOCUMENT_LIMIT);
        self.database.run(move |db| db.documents.find_all(limit)).await
    }

    pub async fn get_document(&self, document_id: &str) -> MemoryResult<Document> {
        let document_id = document_id.to_string();
        self.database.run(move |db| db.documents.find_by_id(&document_id)).await
    }

    /// Idempotent; associations to the document are removed with it.
    pub async fn delete_document(&self, document_id: &str) -> MemoryResult<bool> {
        let document_id = document_id.to_string();
        self.database.run(move |db| db.documents.delete(&document_id)).await
    }

    pub async fn search_documents(&self, query: &str, limit: usize) -> MemoryResult<Vec<RankedDocument>> {
        self.ranker.rank(query, limit).await
    }

    /// Plain ranking, or conversation-boosted ranking when a session is given.
    pub async fn find_relevant_context(
        &self,
        query: &str,
        session_id: Option<&str>,
        limit: Option<usize>,
    ) -> MemoryResult<Vec<RankedDocument>> {
        let limit = limit.unwrap_or(DEFAULT_RELEVANT_LIMIT);
        match session_id {
            Some(session_id) => self.ranker.rank_for_conversation(query, session_id, limit).await,
            None => self.ranker.rank(query, limit).await,
        }
    }

    // ===== Associations =====

    /// Link documents to the session's conversation with one score.
    ///
    /// All ids are checked before anything is written, so an unknown id
    /// leaves the conversation untouched. Returns how many links were written.
    pub async fn attach_context(
        &self,
        session_id: &str,
        document_ids: &[String],
        relevance_score: Option<f64>,
    ) -> MemoryResult<usize> {
        validate_session_id(session_id)?;
        let score = relevance_score.unwrap_or(MANUAL_ATTACH_SCORE);
        if !score.is_finite() || score < 0.0 {
            return Err(MemoryError::Validation(format!(
                "relevance score must be a finite non-negative number, got {}",
                score
            )));
        }

        let session_id = session_id.to_string();
        let document_ids = document_ids.to_vec();
        self.database
            .run(move |db| {
                for document_id in &document_ids {
                    if !db.documents.exists(document_id)? {
                        return Err(MemoryError::not_found("document", document_id.as_str()));
                    }
                }
                db.conversations.ensure(&session_id, None)?;
                for document_id in &document_ids {
                    db.contexts.add_context(&session_id, document_id, score)?;
                }
                info!("Attached {} documents to session {}", document_ids.len(), session_id);
                Ok(document_ids.len())
            })
            .await
    }

    pub async fn detach_context(&self, session_id: &str, document_id: &str) -> MemoryResult<bool> {
        let (session_id, document_id) = (session_id.to_string(), document_id.to_string());
        self.database
            .run(move |db| db.contexts.remove_context(&session_id, &document_id))
            .await
    }

    pub async fn list_active_context(&self, session_id: &str) -> MemoryResult<Vec<ContextEntry>> {
        let session_id = session_id.to_string();
        self.database
            .run(move |db| db.contexts.get_context_for_conversation(&session_id))
            .await
    }

    /// Digest of the active context, also stored on the conversation row
    /// when that row exists.
    pub async fn context_summary(&self, session_id: &str) -> MemoryResult<String> {
        let entries = self.list_active_context(session_id).await?;
        let summary = ContextBuilder::render_context_summary(&entries);

        let (id, stored) = (session_id.to_string(), summary.clone());
        let persisted = self
            .database
            .run(move |db| db.conversations.update_context_summary(&id, Some(&stored)))
            .await;
        match persisted {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!("No conversation row for session {}", session_id),
            Err(e) => return Err(e),
        }
        Ok(summary)
    }

    pub async fn stats(&self) -> MemoryResult<DatabaseStats> {
        self.database.run(|db| db.get_stats()).await
    }
}

fn validate_session_id(session_id: &str) -> MemoryResult<()> {
    if session_id.trim().is_empty() {
        return Err(MemoryError::Validation("Session ID cannot be empty".to_string()));
    }
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(MemoryError::Validation(format!(
            "Session ID too long (max {} chars)",
            MAX_SESSION_ID_LEN
        )));
    }
    Ok(())
}
