//! Database schema definitions for the context memory system
use serde::{Deserialize, Serialize};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Placeholder title a conversation carries until its first exchange names it.
pub const SENTINEL_TITLE: &str = "New Conversation";

/// Ordered metadata bag attached to a document.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Closed set of values a metadata entry may hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Number(f64),
    String(String),
    Map(BTreeMap<String, MetadataValue>),
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::String(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::String(value)
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Number(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Number(value as f64)
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

/// A context document. Content is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub content: String,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: Option<String>,
    pub title: String,
    pub context_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// True while the title is still the sentinel placeholder.
    pub fn is_untitled(&self) -> bool {
        self.title.is_empty() || self.title == SENTINEL_TITLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role: {}", other)),
        }
    }
}

/// Which documents were in the context block when a message was produced.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub documents: Vec<SnapshotEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub document_id: String,
    pub title: String,
    pub relevance_score: f64,
}

impl ContextSnapshot {
    pub fn from_entries(entries: &[ContextEntry]) -> Self {
        Self {
            documents: entries
                .iter()
                .map(|entry| SnapshotEntry {
                    document_id: entry.document.id.clone(),
                    title: entry.document.title.clone(),
                    relevance_score: entry.relevance_score,
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Append-only chat message; ordered by `(created_at, id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub context_used: Option<ContextSnapshot>,
    pub tokens_used: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Scored edge between a conversation and a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextAssociation {
    pub conversation_id: String,
    pub document_id: String,
    pub relevance_score: f64,
    pub added_at: DateTime<Utc>,
}

/// An associated document joined with its edge data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub document: Document,
    pub relevance_score: f64,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDocument {
    pub document: Document,
    pub rank: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_conversations: i64,
    pub total_messages: i64,
    pub total_documents: i64,
    pub total_associations: i64,
    pub database_size_bytes: i64,
}

/// Fixed-width RFC 3339 so that text order matches time order.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn parse_timestamp(value: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f") {
        return DateTime::from_naive_utc_and_offset(dt, Utc);
    }
    warn!("Failed to parse timestamp '{}', using current time", value);
    Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metadata_round_trips_through_json() {
        let mut nested = BTreeMap::new();
        nested.insert("level".to_string(), MetadataValue::from(2i64));
        let mut metadata = Metadata::new();
        metadata.insert("type".to_string(), "guidelines".into());
        metadata.insert("pinned".to_string(), true.into());
        metadata.insert("extra".to_string(), MetadataValue::Map(nested));

        let json = serde_json::to_string(&metadata).unwrap();
        assert_eq!(json, r#"{"extra":{"level":2.0},"pinned":true,"type":"guidelines"}"#);
        let back: Metadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::nanoseconds(1_500);
        let (a, b) = (format_timestamp(&early), format_timestamp(&late));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
        assert_eq!(parse_timestamp(&b), late);
    }

    #[test]
    fn test_legacy_timestamp_format() {
        let parsed = parse_timestamp("2024-03-01 12:30:00");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap());
    }

    #[test]
    fn test_message_role_parsing() {
        assert_eq!("assistant".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("robot".parse::<MessageRole>().is_err());
        assert_eq!(MessageRole::System.to_string(), "system");
    }
}
