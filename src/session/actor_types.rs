//! Session actor types and protocol.
//!
//! This module defines the command protocol for communicating with session
//! actors, along with error types and the turn handshake structures.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::api::SessionStatus;
use crate::generate::{BufferedMessage, TurnPrompt};
use crate::store::{SessionRecord, SessionStore, StoreError};

// ============================================================================
// Session Command
// ============================================================================

/// Commands that can be sent to a session actor.
pub enum SessionCommand {
    /// Start a turn: persist the user message and claim the turn slot.
    ///
    /// Fails with `Busy` if a turn is already in flight, or `NotActive`
    /// once the session reached a terminal status.
    BeginTurn {
        message: String,
        reply: oneshot::Sender<Result<TurnContext, SessionError>>,
    },
    /// Persist one assistant text event produced during the current turn.
    RecordContent {
        content: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Persist one tool call event produced during the current turn.
    RecordToolCall {
        tool_name: String,
        input: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Persist one tool result event produced during the current turn.
    RecordToolResult {
        tool_name: String,
        output: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// End the current turn and settle the session status.
    FinishTurn {
        outcome: TurnOutcome,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    /// Cancel the session if it is still active. Idempotent.
    Close {
        reply: oneshot::Sender<Result<SessionStatus, SessionError>>,
    },
    /// Read the current in-memory state.
    GetView {
        reply: oneshot::Sender<SessionView>,
    },
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The actor has shut down.
    #[error("session actor has shut down")]
    ActorShutdown,

    /// Session not found.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The session already reached a terminal status.
    #[error("session is {status}, not active")]
    NotActive { status: SessionStatus },

    /// A turn is already in flight for this session.
    #[error("session is already processing a message")]
    Busy,

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

// ============================================================================
// Turn Handshake
// ============================================================================

/// Granted by `BeginTurn`: everything the generator needs for the turn.
///
/// Holding a `TurnContext` means the actor's turn slot is claimed; the
/// holder must eventually send `FinishTurn` to release it.
#[derive(Debug)]
pub struct TurnContext {
    pub prompt: TurnPrompt,
}

/// How a turn ended.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// All events were generated and persisted.
    Completed,
    /// Generation or persistence failed partway through.
    Failed { message: String },
}

/// Point-in-time view of a session actor's state.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session_id: String,
    pub status: SessionStatus,
    pub generating: bool,
    pub message_count: usize,
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for spawning an actor.
pub struct ActorConfig {
    /// The persisted session row this actor manages.
    pub record: SessionRecord,
    /// Prior conversation, oldest first. Empty for fresh sessions.
    pub history: Vec<BufferedMessage>,
    pub store: Arc<dyn SessionStore>,
}

// ============================================================================
// Constants
// ============================================================================

/// Channel capacity for commands.
///
/// A turn produces a handful of events; if this fills up, callers block
/// on send(), giving backpressure.
pub const CHANNEL_CAPACITY: usize = 64;
