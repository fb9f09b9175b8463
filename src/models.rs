//! Core data models shared across the pipeline and the CRM store.
//!
//! Entity rows mirror the SQLite schema in [`crate::migrate`]; timestamps
//! are epoch milliseconds, JSON columns are carried as [`serde_json::Value`]
//! already decoded from their TEXT columns.

use serde::Serialize;
use serde_json::Value;

/// A CRM user. Optional fields start empty and are enriched over time by
/// the profile extractor; they are never overwritten with empty values.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub role: Option<String>,
    /// Open key/value map; unknown extracted attributes are folded in here.
    pub preferences: Value,
    pub created_at: i64,
    pub updated_at: i64,
    pub is_active: bool,
}

/// A time-bounded credential scoping one user's continuous interaction.
/// At most one row per user has `is_active = true`.
#[derive(Debug, Clone, Serialize)]
pub struct UserSession {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub created_at: i64,
    pub expires_at: i64,
    pub is_active: bool,
}

/// The durable thread of messages for one (user, session) pair.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub session_id: String,
    pub title: Option<String>,
    /// Recomputed after every turn from the latest exchange (last-turn-wins).
    pub category: Option<String>,
    /// `active`, `resolved`, or `unresolved`.
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single chat message. Append-only; ordered by timestamp ascending.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// `user`, `assistant`, or `system`.
    pub role: String,
    pub content: String,
    pub metadata: Value,
    pub timestamp: i64,
}

/// A knowledge-base document. Soft-deleted on replacement so the relational
/// record survives as an audit trail; its index chunks are hard-deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub content_type: String,
    pub file_size: i64,
    pub metadata: Value,
    pub created_at: i64,
    pub indexed_at: Option<i64>,
    pub is_active: bool,
}

/// A chunk ready for the vector index: text, metadata, and its embedding.
/// IDs are derived as `{document_id}_chunk_{n}` so re-ingestion under a
/// fresh document id never collides with stale entries.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub id: String,
    pub document_id: String,
    pub filename: String,
    pub chunk_index: i64,
    pub text: String,
    pub metadata: Value,
    pub embedding: Vec<f32>,
}

/// One retrieval hit: chunk text, its metadata, and the cosine similarity
/// against the query embedding.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedChunk {
    pub content: String,
    pub metadata: Value,
    pub similarity_score: f32,
}

impl RetrievedChunk {
    /// Source filename recorded at ingestion time, if present.
    pub fn filename(&self) -> &str {
        self.metadata
            .get("filename")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
    }
}
