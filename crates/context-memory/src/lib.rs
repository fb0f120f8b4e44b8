pub mod api;
pub mod config;
pub mod context_engine;
pub mod error;
pub mod memory_db;
pub mod model_runtime;
pub mod shared_state;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use api::{ApiResponse, ContextService, TurnOutcome};
pub use config::Config;
pub use context_engine::{
    ConversationContext, ConversationMemory, MemoryOptions, MemoryState, RelevanceRanker,
};
pub use error::{MemoryError, MemoryResult};
pub use memory_db::{
    ContextEntry, Conversation, Document, MemoryDatabase, MessageRole, Metadata, MetadataValue,
    RankedDocument, StoredMessage,
};
pub use model_runtime::{HttpLanguageModel, LanguageModel};
pub use shared_state::SessionMemoryCache;
