//! Calling-layer surface: the service facade and its structured results

pub mod context_service;

pub use context_service::{ContextService, TurnOutcome, DEFAULT_DOCUMENT_LIMIT, MANUAL_ATTACH_SCORE};

use crate::error::MemoryResult;
use serde::Serialize;

/// Success flag plus message, with the payload on success.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self::ok_with_message(data, "Success")
    }

    pub fn ok_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: Some(data),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: None,
        }
    }
}

impl<T> From<MemoryResult<T>> for ApiResponse<T> {
    fn from(result: MemoryResult<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::error(e.to_string()),
        }
    }
}
