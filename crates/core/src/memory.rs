//! Memory trait — conversation memory that outlives a single pipe run.
//!
//! Pipes recall entries relevant to the current query before each agent
//! runs, and persist every new goal judgment afterwards.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;
use crate::message::Role;

/// A single remembered turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Unique ID for this memory (assigned by the backend when empty)
    pub id: String,

    /// Conversation this entry belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,

    /// Who produced the content
    pub role: Role,

    /// The remembered content
    pub content: String,

    /// The judge's reasoning, for assistant results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Tags for categorization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// When this memory was created
    pub created_at: DateTime<Utc>,

    /// Relevance score (set by search operations)
    #[serde(default)]
    pub score: f32,
}

impl MemoryEntry {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            conversation_id: None,
            role,
            content: content.into(),
            reason: None,
            tags: Vec::new(),
            created_at: Utc::now(),
            score: 0.0,
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Render recalled entries as a prompt section, one per line.
pub fn format_memories(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|entry| match &entry.reason {
            Some(reason) => format!("[{}] {} (reason: {})", entry.role, entry.content, reason),
            None => format!("[{}] {}", entry.role, entry.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// A query for searching memories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryQuery {
    /// The search text
    pub text: String,

    /// Maximum number of results
    #[serde(default = "default_limit")]
    pub limit: usize,

    /// Minimum relevance score threshold
    #[serde(default)]
    pub min_score: f32,

    /// Restrict to one conversation
    #[serde(default)]
    pub conversation_id: Option<String>,

    /// Filter by tags
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_limit() -> usize {
    5
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: default_limit(),
            min_score: 0.0,
            conversation_id: None,
            tags: Vec::new(),
        }
    }
}

/// Fraction of the query's terms that appear in `content` (case-insensitive).
///
/// Terms shorter than three characters are ignored; a query with no usable
/// terms scores 0.
pub fn term_overlap(query: &str, content: &str) -> f32 {
    let content = content.to_lowercase();
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let hits = terms.iter().filter(|t| content.contains(t.as_str())).count();
    hits as f32 / terms.len() as f32
}

/// The core MemoryBackend trait.
///
/// Implementations: in-memory (for testing), JSONL file, none (no-op).
#[async_trait]
pub trait MemoryBackend: Send + Sync {
    /// The backend name (e.g., "file", "in_memory", "none").
    fn name(&self) -> &str;

    /// Store a new memory entry.
    async fn store(&self, entry: MemoryEntry) -> std::result::Result<String, MemoryError>;

    /// Search memories by query.
    async fn search(&self, query: MemoryQuery) -> std::result::Result<Vec<MemoryEntry>, MemoryError>;

    /// Delete a memory by ID.
    async fn delete(&self, id: &str) -> std::result::Result<bool, MemoryError>;

    /// Get a memory by ID.
    async fn get(&self, id: &str) -> std::result::Result<Option<MemoryEntry>, MemoryError>;

    /// Get total memory count.
    async fn count(&self) -> std::result::Result<usize, MemoryError>;

    /// Clear all memories.
    async fn clear(&self) -> std::result::Result<(), MemoryError>;
}
