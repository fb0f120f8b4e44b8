//! Conversation context: ranking, prompt rendering and per-session memory

pub mod context_builder;
pub mod conversation_memory;
pub mod relevance_ranker;

pub use context_builder::ContextBuilder;
pub use conversation_memory::{ConversationContext, ConversationMemory, MemoryOptions, MemoryState};
pub use relevance_ranker::{apply_conversation_boost, RelevanceRanker, CONVERSATION_BOOST};
