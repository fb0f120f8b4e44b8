//! Per-session memory: chat history plus attached context documents

use crate::context_engine::context_builder::ContextBuilder;
use crate::context_engine::relevance_ranker::RelevanceRanker;
use crate::error::MemoryResult;
use crate::memory_db::{ContextEntry, ContextSnapshot, MemoryDatabase, MessageRole, StoredMessage};
use crate::utils::TextUtils;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Documents auto-attached from each new user message.
pub const AUTO_ATTACH_LIMIT: usize = 3;

/// Score stored for an auto-attached document without a usable rank.
pub const DEFAULT_ATTACH_SCORE: f64 = 0.5;

const SUMMARY_SOURCE_MESSAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryState {
    Uninitialized,
    Loaded,
    Saving,
    Cleared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOptions {
    pub context_enabled: bool,
    pub max_history: usize,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            context_enabled: true,
            max_history: 50,
        }
    }
}

/// What a turn gets to see: chronological history and ordered context.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationContext {
    pub history: Vec<StoredMessage>,
    pub context: Vec<ContextEntry>,
}

impl ConversationContext {
    pub fn is_empty(&self) -> bool {
        self.history.is_empty() && self.context.is_empty()
    }
}

pub struct ConversationMemory {
    session_id: String,
    database: Arc<MemoryDatabase>,
    ranker: RelevanceRanker,
    options: MemoryOptions,
    state: RwLock<MemoryState>,
    last_accessed: RwLock<Instant>,
}

impl ConversationMemory {
    pub fn new(session_id: impl Into<String>, database: Arc<MemoryDatabase>, options: MemoryOptions) -> Self {
        let ranker = RelevanceRanker::new(Arc::clone(&database));
        Self {
            session_id: session_id.into(),
            database,
            ranker,
            options,
            state: RwLock::new(MemoryState::Uninitialized),
            last_accessed: RwLock::new(Instant::now()),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn options(&self) -> MemoryOptions {
        self.options
    }

    pub fn state(&self) -> MemoryState {
        self.state.read().map(|s| *s).unwrap_or(MemoryState::Uninitialized)
    }

    pub fn idle_for(&self) -> Duration {
        self.last_accessed
            .read()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    fn set_state(&self, next: MemoryState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
        if let Ok(mut last) = self.last_accessed.write() {
            *last = Instant::now();
        }
    }

    /// History and context for the next turn. Never fails: a store error is
    /// logged and yields an empty context so the turn can still be answered.
    pub async fn load_context(&self) -> ConversationContext {
        match self.try_load_context().await {
            Ok(context) => {
                self.set_state(MemoryState::Loaded);
                debug!(
                    "Loaded {} messages and {} context documents for session {}",
                    context.history.len(),
                    context.context.len(),
                    self.session_id
                );
                context
            }
            Err(e) => {
                warn!("Error loading memory for session {}: {}", self.session_id, e);
                ConversationContext::default()
            }
        }
    }

    async fn try_load_context(&self) -> MemoryResult<ConversationContext> {
        let session_id = self.session_id.clone();
        let max_history = self.options.max_history;
        let history = self
            .database
            .run(move |db| db.conversations.get_messages(&session_id, Some(max_history)))
            .await?;

        let context = if self.options.context_enabled {
            self.fetch_context().await?
        } else {
            Vec::new()
        };

        Ok(ConversationContext { history, context })
    }

    async fn fetch_context(&self) -> MemoryResult<Vec<ContextEntry>> {
        let session_id = self.session_id.clone();
        self.database
            .run(move |db| db.contexts.get_context_for_conversation(&session_id))
            .await
    }

    /// Persist one exchange, title the conversation on its first exchange and
    /// auto-attach documents relevant to the user input.
    pub async fn save_exchange(&self, user_input: &str, assistant_output: &str) -> MemoryResult<()> {
        self.save_exchange_with_context(user_input, assistant_output, None).await
    }

    /// As [`save_exchange`](Self::save_exchange), recording which context the
    /// assistant reply was produced with.
    pub async fn save_exchange_with_context(
        &self,
        user_input: &str,
        assistant_output: &str,
        context_used: Option<ContextSnapshot>,
    ) -> MemoryResult<()> {
        self.set_state(MemoryState::Saving);
        let persisted = self.persist_exchange(user_input, assistant_output, context_used).await;
        self.set_state(MemoryState::Loaded);
        persisted?;

        if self.options.context_enabled {
            match self.attach_relevant_context(user_input).await {
                Ok(attached) => debug!("Auto-attached {} documents to session {}", attached, self.session_id),
                Err(e) => warn!("Error adding relevant context for session {}: {}", self.session_id, e),
            }
        }
        Ok(())
    }

    async fn persist_exchange(
        &self,
        user_input: &str,
        assistant_output: &str,
        context_used: Option<ContextSnapshot>,
    ) -> MemoryResult<()> {
        let session_id = self.session_id.clone();
        let conversation = self
            .database
            .run(move |db| db.conversations.ensure(&session_id, None))
            .await?;

        // User and assistant messages are separate writes; a failure between
        // them leaves an orphaned user turn, which readers accept.
        let (session_id, input) = (self.session_id.clone(), user_input.to_string());
        self.database
            .run(move |db| db.conversations.append_message(&session_id, MessageRole::User, &input, None, None))
            .await?;

        let (session_id, output) = (self.session_id.clone(), assistant_output.to_string());
        self.database
            .run(move |db| {
                db.conversations
                    .append_message(&session_id, MessageRole::Assistant, &output, context_used.as_ref(), None)
            })
            .await?;

        if conversation.is_untitled() {
            let title = TextUtils::derive_title(user_input);
            if !title.is_empty() {
                let session_id = self.session_id.clone();
                self.database
                    .run(move |db| db.conversations.set_title_if_untitled(&session_id, &title))
                    .await?;
            }
        }
        Ok(())
    }

    /// Rank documents against `user_input` (no conversation boost) and upsert
    /// the top results with their rank as score.
    async fn attach_relevant_context(&self, user_input: &str) -> MemoryResult<usize> {
        let ranked = self.ranker.rank(user_input, AUTO_ATTACH_LIMIT).await?;
        if ranked.is_empty() {
            return Ok(0);
        }

        let session_id = self.session_id.clone();
        self.database
            .run(move |db| {
                for item in &ranked {
                    let score = if item.rank.is_finite() && item.rank > 0.0 {
                        item.rank
                    } else {
                        DEFAULT_ATTACH_SCORE
                    };
                    db.contexts.add_context(&session_id, &item.document.id, score)?;
                }
                Ok(ranked.len())
            })
            .await
    }

    /// Context block for the prompt, empty when disabled, empty or unreadable.
    pub async fn build_context_prompt(&self) -> String {
        if !self.options.context_enabled {
            return String::new();
        }
        match self.fetch_context().await {
            Ok(entries) => ContextBuilder::render_context_block(&entries),
            Err(e) => {
                warn!("Error getting context prompt for session {}: {}", self.session_id, e);
                String::new()
            }
        }
    }

    /// Recent-message digest, empty when there is no history.
    pub async fn conversation_summary(&self) -> String {
        let session_id = self.session_id.clone();
        match self
            .database
            .run(move |db| db.conversations.get_messages(&session_id, Some(SUMMARY_SOURCE_MESSAGES)))
            .await
        {
            Ok(history) => ContextBuilder::render_conversation_summary(&history),
            Err(e) => {
                warn!("Error creating conversation summary for session {}: {}", self.session_id, e);
                String::new()
            }
        }
    }

    /// Delete messages and context links and reset the title. The
    /// conversation row itself is kept.
    pub async fn clear(&self) -> MemoryResult<bool> {
        let session_id = self.session_id.clone();
        let cleared = self
            .database
            .run(move |db| db.conversations.clear(&session_id))
            .await?;
        self.set_state(MemoryState::Cleared);
        info!("Cleared memory for session {}", self.session_id);
        Ok(cleared)
    }
}
