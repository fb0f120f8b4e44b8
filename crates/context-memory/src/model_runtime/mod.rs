//! Text generation seam used by the per-turn flow

pub mod http_runtime;
pub mod runtime_trait;

pub use http_runtime::HttpLanguageModel;
pub use runtime_trait::LanguageModel;
