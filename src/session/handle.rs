//! Session handle for communicating with a session actor.
//!
//! `SessionHandle` is a thin wrapper around an `mpsc::Sender<SessionCommand>`.
//! It provides async methods for all session operations and is cheap to clone.

use tokio::sync::{mpsc, oneshot};

use crate::api::SessionStatus;

use super::actor_types::{SessionCommand, SessionError, SessionView, TurnContext, TurnOutcome};

/// Handle for interacting with a session actor.
///
/// Cheap to clone (just an `Arc` inside the `mpsc::Sender`). All methods
/// are async and communicate with the actor via message passing.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    id: String,
}

impl SessionHandle {
    pub(crate) fn new(tx: mpsc::Sender<SessionCommand>, id: String) -> Self {
        Self { tx, id }
    }

    /// Get the session ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Start a turn for the given user message.
    ///
    /// Persists the message and claims the session's turn slot. The caller
    /// must call `finish_turn` once the turn ends, whatever the outcome.
    pub async fn begin_turn(&self, message: String) -> Result<TurnContext, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::BeginTurn {
                message,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Persist one assistant text event of the current turn.
    pub async fn record_content(&self, content: String) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::RecordContent {
                content,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Persist one tool call event of the current turn.
    pub async fn record_tool_call(
        &self,
        tool_name: String,
        input: String,
    ) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::RecordToolCall {
                tool_name,
                input,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Persist one tool result event of the current turn.
    pub async fn record_tool_result(
        &self,
        tool_name: String,
        output: String,
    ) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::RecordToolResult {
                tool_name,
                output,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// End the current turn and settle the session status.
    pub async fn finish_turn(&self, outcome: TurnOutcome) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::FinishTurn {
                outcome,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Cancel the session if it is still active. Returns the resulting status.
    pub async fn close(&self) -> Result<SessionStatus, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::Close { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)?
    }

    /// Read the actor's current in-memory state.
    pub async fn view(&self) -> Result<SessionView, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(SessionCommand::GetView { reply: reply_tx })
            .await
            .map_err(|_| SessionError::ActorShutdown)?;

        reply_rx.await.map_err(|_| SessionError::ActorShutdown)
    }
}
