//! Response generation.
//!
//! A `ResponseGenerator` turns one user message into a stream of response
//! events. The stream is the only contract: the session layer persists and
//! delivers events without knowing how they were produced, so a scripted
//! demo backend and a real model backend are interchangeable here.

mod scripted;

use std::pin::Pin;

use futures::Stream;
use thiserror::Error;

pub use scripted::ScriptedGenerator;

/// One unit of agent output within a turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    /// Assistant text.
    Content { content: String },
    /// The agent invoked a tool.
    ToolCall { tool_name: String, input: String },
    /// Output returned by a previously invoked tool.
    ToolResult { tool_name: String, output: String },
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation failed: {0}")]
    Failed(String),
}

/// Ordered stream of events for a single turn.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent, GenerateError>> + Send>>;

/// Everything a generator may condition on for one turn.
#[derive(Debug, Clone)]
pub struct TurnPrompt {
    pub session_id: String,
    pub system_prompt: Option<String>,
    pub model_name: Option<String>,
    /// Prior conversation, oldest first.
    pub history: Vec<BufferedMessage>,
    /// The user message that started this turn.
    pub message: String,
}

/// A prior message, reduced to what a generator needs.
#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub role: crate::api::MessageRole,
    pub content: String,
}

/// Produces the agent side of a turn as an event stream.
///
/// Implementations must be cheap to call; the heavy work happens as the
/// returned stream is polled.
pub trait ResponseGenerator: Send + Sync {
    fn respond(&self, prompt: &TurnPrompt) -> EventStream;
}
