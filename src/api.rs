//! Public API types: status enums, request/response DTOs, and ID prefixes.
//!
//! These are the wire shapes shared by the REST handlers and the WebSocket
//! transport. Database records live in `store`; conversions into response
//! types are implemented here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{EventRecord, MessageRecord, SessionRecord};

/// Prefix for externally visible session identifiers.
pub const SESSION_ID_PREFIX: &str = "session_";

// ============================================================================
// Enums
// ============================================================================

/// Lifecycle status of a session.
///
/// Transitions are monotonic forward: `Active` may move to any terminal
/// status; terminal statuses (`Completed`, `Failed`, `Cancelled`) never
/// change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status permits no further transitions.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }

    /// Check the status-transition invariant.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match self {
            Self::Active => true,
            _ => *self == next,
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(format!("unknown session status '{other}'")),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Author of a message within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            other => Err(format!("unknown message role '{other}'")),
        }
    }
}

/// Kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    ToolCall,
    ToolResult,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "tool_call" => Ok(Self::ToolCall),
            "tool_result" => Ok(Self::ToolResult),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown message type '{other}'")),
        }
    }
}

/// Execution status of a recorded tool event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

// ============================================================================
// Request Types
// ============================================================================

/// POST /api/v1/sessions
///
/// Every field is optional; missing fields fall back to the configured
/// agent defaults.
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    pub title: Option<String>,
    pub system_prompt: Option<String>,
    pub model_name: Option<String>,
    pub tool_version: Option<String>,
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: i64,
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

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventResponse {
    pub id: i64,
    pub session_id: i64,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_data: Option<serde_json::Value>,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

/// GET /api/v1/sessions/{id} — full history.
#[derive(Debug, Serialize)]
pub struct SessionDetailResponse {
    pub session: SessionResponse,
    pub messages: Vec<MessageResponse>,
    pub events: Vec<EventResponse>,
}

/// GET /api/v1/sessions — one page of sessions plus the total count.
#[derive(Debug, Serialize)]
pub struct ListSessionsResponse {
    pub sessions: Vec<SessionResponse>,
    pub total: i64,
    pub page: u32,
    pub size: u32,
}

/// GET /api/v1/sessions/{id}/status
#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// DELETE /api/v1/sessions/{id}
#[derive(Debug, Serialize)]
pub struct CloseSessionResponse {
    pub message: String,
}

// ============================================================================
// Conversions
// ============================================================================

impl From<SessionRecord> for SessionResponse {
    fn from(r: SessionRecord) -> Self {
        Self {
            id: r.id,
            session_id: r.session_id,
            title: r.title,
            system_prompt: r.system_prompt,
            model_name: r.model_name,
            tool_version: r.tool_version,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
            completed_at: r.completed_at,
        }
    }
}

impl From<MessageRecord> for MessageResponse {
    fn from(r: MessageRecord) -> Self {
        Self {
            id: r.id,
            session_id: r.session_id,
            role: r.role,
            content: r.content,
            message_type: r.message_type,
            metadata: r.metadata,
            timestamp: r.timestamp,
        }
    }
}

impl From<EventRecord> for EventResponse {
    fn from(r: EventRecord) -> Self {
        Self {
            id: r.id,
            session_id: r.session_id,
            event_type: r.event_type,
            tool_name: r.tool_name,
            input_data: r.input_data,
            output_data: r.output_data,
            status: r.status,
            error_message: r.error_message,
            timestamp: r.timestamp,
            duration_ms: r.duration_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_transitions_anywhere() {
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Completed));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Failed));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Cancelled));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Active));
    }

    #[test]
    fn terminal_statuses_are_frozen() {
        for terminal in [
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(SessionStatus::Active));
            assert!(terminal.can_transition_to(terminal));
        }
        for other in [SessionStatus::Failed, SessionStatus::Cancelled] {
            assert!(!SessionStatus::Completed.can_transition_to(other));
        }
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            SessionStatus::Active,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            let parsed: SessionStatus = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!(
            serde_json::to_string(&MessageType::ToolCall).unwrap(),
            "\"tool_call\""
        );
    }
}
