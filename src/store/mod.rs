//! Durable session storage.
//!
//! `SessionStore` is the system of record: sessions, their messages, and
//! their tool-execution events live in relational tables with cascade
//! delete from the owning session. All writes are append-only except the
//! session status column, which enforces the transition invariant.

mod error;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::api::{EventStatus, MessageRole, MessageType, SessionStatus};

pub use error::{StoreError, StoreResult};
pub use sqlite::SqliteSessionStore;

// ============================================================================
// Records
// ============================================================================

/// A persisted session row.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Internal row id. Foreign keys reference this, not `session_id`.
    pub id: i64,
    /// Externally visible opaque identifier.
    pub session_id: String,
    pub title: Option<String>,
    pub system_prompt: Option<String>,
    pub model_name: Option<String>,
    pub tool_version: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Fields for creating a session. Status starts as `active`.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub session_id: String,
    pub title: String,
    pub system_prompt: String,
    pub model_name: String,
    pub tool_version: String,
}

/// A persisted chat message. Immutable once written.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: i64,
    /// Owning session row id.
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub message_type: MessageType,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub message_type: MessageType,
    pub metadata: Option<serde_json::Value>,
}

impl NewMessage {
    /// A plain text message with no metadata.
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            message_type: MessageType::Text,
            metadata: None,
        }
    }
}

/// A persisted tool-execution trace entry. Append-only.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub id: i64,
    /// Owning session row id.
    pub session_id: i64,
    pub event_type: String,
    pub tool_name: Option<String>,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub tool_name: Option<String>,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub status: EventStatus,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

/// One page of sessions plus the total row count.
#[derive(Debug)]
pub struct SessionPage {
    pub sessions: Vec<SessionRecord>,
    pub total: i64,
}

/// Full history of one session.
#[derive(Debug)]
pub struct SessionHistory {
    pub session: SessionRecord,
    /// Ordered by timestamp, ties broken by insertion order.
    pub messages: Vec<MessageRecord>,
    /// Ordered by timestamp, ties broken by insertion order.
    pub events: Vec<EventRecord>,
}

// ============================================================================
// Trait
// ============================================================================

/// Storage interface for sessions, messages, and events.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session with status `active`.
    async fn create_session(&self, new: NewSession) -> StoreResult<SessionRecord>;

    /// Look up a session by its external identifier.
    async fn get_session(&self, session_id: &str) -> StoreResult<SessionRecord>;

    /// List sessions ordered by creation time, newest first.
    ///
    /// `page` is 1-based; `size` is clamped to `[1, 100]`.
    async fn list_sessions(&self, page: u32, size: u32) -> StoreResult<SessionPage>;

    /// Append a message to a session. Never updates existing rows.
    async fn append_message(
        &self,
        session_row: i64,
        message: NewMessage,
    ) -> StoreResult<MessageRecord>;

    /// Append a tool-execution event to a session. Never updates existing rows.
    async fn append_event(&self, session_row: i64, event: NewEvent) -> StoreResult<EventRecord>;

    /// Transition a session's status.
    ///
    /// Fails with `InvalidTransition` if the current status is terminal
    /// and differs from `status`. Setting the current status again is a
    /// no-op. `completed_at`, when given, is recorded alongside.
    async fn update_status(
        &self,
        session_row: i64,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Fetch a session with all its messages and events in timestamp order.
    async fn get_history(&self, session_id: &str) -> StoreResult<SessionHistory>;

    /// Delete a session and, via cascade, its messages and events.
    async fn delete_session(&self, session_id: &str) -> StoreResult<()>;
}
