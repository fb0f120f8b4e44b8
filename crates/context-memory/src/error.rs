//! Error taxonomy shared by the stores, the ranker and the memory layer

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Ranking unavailable: {0}")]
    RankingUnavailable(String),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

impl MemoryError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        MemoryError::NotFound { entity, id: id.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MemoryError::NotFound { .. })
    }
}

impl From<rusqlite::Error> for MemoryError {
    fn from(err: rusqlite::Error) -> Self {
        MemoryError::Store(err.to_string())
    }
}

impl From<r2d2::Error> for MemoryError {
    fn from(err: r2d2::Error) -> Self {
        MemoryError::Store(format!("Failed to get connection from pool: {}", err))
    }
}

impl From<serde_json::Error> for MemoryError {
    fn from(err: serde_json::Error) -> Self {
        MemoryError::Store(format!("JSON error: {}", err))
    }
}

impl From<tokio::task::JoinError> for MemoryError {
    fn from(err: tokio::task::JoinError) -> Self {
        MemoryError::Store(format!("Blocking store task failed: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message_names_entity() {
        let err = MemoryError::not_found("Document", "doc-1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Document not found: doc-1");
    }

    #[test]
    fn test_sqlite_errors_map_to_store() {
        let err: MemoryError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, MemoryError::Store(_)));
    }
}
