//! Real-time chat over WebSocket.
//!
//! Wire frames are JSON objects of the shape `{"type": ..., "data": {...}}`
//! in both directions. One connection per session: a second connect for the
//! same session replaces the first.

mod handler;
mod hub;

use serde::{Deserialize, Serialize};

use crate::api::{MessageRole, MessageType, SessionStatus};

pub use handler::ws_chat;
pub use hub::ConnectionHub;

/// Frames sent to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once after the socket is accepted.
    Connection {
        message: String,
        session_id: String,
    },
    /// Echoed immediately for each accepted chat message.
    Ack {
        message: String,
        user_message: String,
    },
    /// Assistant text produced during a turn.
    Content {
        role: MessageRole,
        content: String,
        message_type: MessageType,
    },
    /// A tool the agent invoked during a turn.
    ToolCall { tool_name: String, input: String },
    /// Output returned by a tool during a turn.
    ToolResult { tool_name: String, output: String },
    /// The turn (and session) finished.
    Complete { status: SessionStatus },
    Error { error: String },
    Pong { timestamp: i64 },
}

/// Frames received from the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    Chat { message: String },
    Ping,
}
