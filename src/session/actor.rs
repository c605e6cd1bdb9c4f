//! Per-session actor for serialized state mutations.
//!
//! Each session gets a dedicated actor task that serializes all mutations
//! via message passing (no locks). The actor owns the turn slot: at most
//! one turn is in flight per session, and every event of that turn is
//! persisted through the store before the caller may deliver it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::api::{EventStatus, MessageRole, SessionStatus};
use crate::generate::{BufferedMessage, TurnPrompt};
use crate::store::{NewEvent, NewMessage, SessionStore};

use super::actor_types::{
    ActorConfig, CHANNEL_CAPACITY, SessionCommand, SessionError, SessionView, TurnContext,
    TurnOutcome,
};

/// Synthetic assistant message persisted when a turn completes normally.
const COMPLETION_MARKER: &str = "Demo response completed";

/// Whether a turn is currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Idle,
    Generating,
}

// ============================================================================
// Session Actor
// ============================================================================

/// Per-session actor that owns state and handles mutations.
pub struct SessionActor {
    // Identity
    session_id: String,
    /// Store row id, used for all child-row writes.
    row_id: i64,

    // State
    status: SessionStatus,
    turn: TurnState,

    // Prompt material
    system_prompt: Option<String>,
    model_name: Option<String>,
    /// In-memory mirror of the persisted conversation, oldest first.
    history: Vec<BufferedMessage>,

    // Persistence
    store: Arc<dyn SessionStore>,

    // Communication
    command_rx: mpsc::Receiver<SessionCommand>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionActor {
    /// Spawn an actor for a session that already exists in the store.
    ///
    /// Returns the command sender and a JoinHandle for the actor task.
    pub fn spawn(
        config: ActorConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (mpsc::Sender<SessionCommand>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);

        let actor = Self {
            session_id: config.record.session_id.clone(),
            row_id: config.record.id,
            status: config.record.status,
            turn: TurnState::Idle,
            system_prompt: config.record.system_prompt,
            model_name: config.record.model_name,
            history: config.history,
            store: config.store,
            command_rx: rx,
            shutdown_rx,
        };

        let handle = tokio::spawn(actor.run());
        (tx, handle)
    }

    /// Main actor loop.
    async fn run(mut self) {
        debug!(session_id = %self.session_id, "Session actor started");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        debug!(session_id = %self.session_id, "Session actor received shutdown signal");
                        break;
                    }
                }

                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // All handles dropped.
                            debug!(session_id = %self.session_id, "All handles dropped, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        debug!(session_id = %self.session_id, "Session actor stopped");
    }

    /// Handle a single command.
    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::BeginTurn { message, reply } => {
                let result = self.begin_turn(message).await;
                let _ = reply.send(result);
            }
            SessionCommand::RecordContent { content, reply } => {
                let result = self.record_content(content).await;
                let _ = reply.send(result);
            }
            SessionCommand::RecordToolCall {
                tool_name,
                input,
                reply,
            } => {
                let result = self.record_tool_call(tool_name, input).await;
                let _ = reply.send(result);
            }
            SessionCommand::RecordToolResult {
                tool_name,
                output,
                reply,
            } => {
                let result = self.record_tool_result(tool_name, output).await;
                let _ = reply.send(result);
            }
            SessionCommand::FinishTurn { outcome, reply } => {
                let result = self.finish_turn(outcome).await;
                let _ = reply.send(result);
            }
            SessionCommand::Close { reply } => {
                let result = self.close().await;
                let _ = reply.send(result);
            }
            SessionCommand::GetView { reply } => {
                let _ = reply.send(SessionView {
                    session_id: self.session_id.clone(),
                    status: self.status,
                    generating: self.turn == TurnState::Generating,
                    message_count: self.history.len(),
                });
            }
        }
    }

    // ------------------------------------------------------------------------
    // Turn Operations
    // ------------------------------------------------------------------------

    /// Claim the turn slot and persist the user message.
    ///
    /// The status and turn checks plus the claim happen in one command, so
    /// two concurrent senders can never both start a turn.
    async fn begin_turn(&mut self, message: String) -> Result<TurnContext, SessionError> {
        if self.status != SessionStatus::Active {
            return Err(SessionError::NotActive {
                status: self.status,
            });
        }
        if self.turn == TurnState::Generating {
            return Err(SessionError::Busy);
        }

        // Prompt history is the conversation before this message.
        let prompt = TurnPrompt {
            session_id: self.session_id.clone(),
            system_prompt: self.system_prompt.clone(),
            model_name: self.model_name.clone(),
            history: self.history.clone(),
            message: message.clone(),
        };

        self.store
            .append_message(self.row_id, NewMessage::text(MessageRole::User, &message))
            .await?;

        self.history.push(BufferedMessage {
            role: MessageRole::User,
            content: message,
        });
        self.turn = TurnState::Generating;

        debug!(session_id = %self.session_id, "Turn started");
        Ok(TurnContext { prompt })
    }

    async fn record_content(&mut self, content: String) -> Result<(), SessionError> {
        self.store
            .append_message(
                self.row_id,
                NewMessage::text(MessageRole::Assistant, &content),
            )
            .await?;

        self.history.push(BufferedMessage {
            role: MessageRole::Assistant,
            content,
        });
        Ok(())
    }

    async fn record_tool_call(
        &mut self,
        tool_name: String,
        input: String,
    ) -> Result<(), SessionError> {
        self.store
            .append_event(
                self.row_id,
                NewEvent {
                    event_type: "tool_call".to_string(),
                    tool_name: Some(tool_name),
                    input_data: Some(serde_json::json!({ "input": input })),
                    output_data: None,
                    status: EventStatus::Completed,
                    error_message: None,
                    duration_ms: None,
                },
            )
            .await?;
        Ok(())
    }

    async fn record_tool_result(
        &mut self,
        tool_name: String,
        output: String,
    ) -> Result<(), SessionError> {
        self.store
            .append_event(
                self.row_id,
                NewEvent {
                    event_type: "tool_result".to_string(),
                    tool_name: Some(tool_name),
                    input_data: None,
                    output_data: Some(serde_json::json!({ "output": output })),
                    status: EventStatus::Completed,
                    error_message: None,
                    duration_ms: None,
                },
            )
            .await?;
        Ok(())
    }

    /// Release the turn slot and settle the session status.
    ///
    /// If the session was cancelled while the turn was in flight, the
    /// status is left alone; only the slot is released.
    async fn finish_turn(&mut self, outcome: TurnOutcome) -> Result<(), SessionError> {
        self.turn = TurnState::Idle;

        if self.status != SessionStatus::Active {
            debug!(
                session_id = %self.session_id,
                status = %self.status,
                "Turn finished after session left active state"
            );
            return Ok(());
        }

        let next = match &outcome {
            TurnOutcome::Completed => {
                // Completion marker row, written before the status flips.
                self.store
                    .append_message(
                        self.row_id,
                        NewMessage::text(MessageRole::Assistant, COMPLETION_MARKER),
                    )
                    .await?;
                self.history.push(BufferedMessage {
                    role: MessageRole::Assistant,
                    content: COMPLETION_MARKER.to_string(),
                });
                SessionStatus::Completed
            }
            TurnOutcome::Failed { message } => {
                warn!(session_id = %self.session_id, error = %message, "Turn failed");
                SessionStatus::Failed
            }
        };

        self.store
            .update_status(self.row_id, next, Some(Utc::now()))
            .await?;
        self.status = next;

        debug!(session_id = %self.session_id, status = %next, "Turn finished");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Cancel the session if it is still active.
    ///
    /// Closing an already-terminal session is a no-op; the current status
    /// is returned either way.
    async fn close(&mut self) -> Result<SessionStatus, SessionError> {
        if self.status != SessionStatus::Active {
            return Ok(self.status);
        }

        self.store
            .update_status(self.row_id, SessionStatus::Cancelled, Some(Utc::now()))
            .await?;
        self.status = SessionStatus::Cancelled;

        debug!(session_id = %self.session_id, "Session cancelled");
        Ok(self.status)
    }
}
