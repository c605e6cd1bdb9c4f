//! Turn execution pipeline.
//!
//! A turn is: claim the session's turn slot, run the generator, and for
//! every event persist it through the actor before offering it to the
//! client. Delivery is best effort; persistence is not. A client that
//! disconnects mid-turn stops receiving updates, but the turn keeps
//! running until every event is durable and the status is settled.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::generate::{ResponseEvent, ResponseGenerator};

use super::actor_types::{SessionError, TurnOutcome};
use super::handle::SessionHandle;

/// One update delivered to the client during a turn.
#[derive(Debug, Clone)]
pub enum TurnUpdate {
    Content { content: String },
    ToolCall { tool_name: String, input: String },
    ToolResult { tool_name: String, output: String },
    /// The turn ended and the session is completed.
    Completed,
    /// The turn ended and the session is failed.
    Failed { message: String },
}

/// Counters for one finished turn.
#[derive(Debug, Default)]
pub struct TurnReport {
    /// Events persisted.
    pub persisted: usize,
    /// Updates the client actually received.
    pub delivered: usize,
    /// Updates dropped because the client was gone.
    pub dropped: usize,
    /// Set when the turn ended in failure.
    pub error: Option<String>,
}

/// Runs turns against session actors.
#[derive(Clone)]
pub struct TurnRunner {
    generator: Arc<dyn ResponseGenerator>,
}

impl TurnRunner {
    pub fn new(generator: Arc<dyn ResponseGenerator>) -> Self {
        Self { generator }
    }

    /// Run one turn for `message` on the session behind `handle`.
    ///
    /// Returns an error only when the turn never started (busy, not
    /// active, actor gone). Once started, generation and persistence
    /// failures settle the session as failed and are reported in the
    /// returned `TurnReport` instead.
    pub async fn run_turn(
        &self,
        handle: &SessionHandle,
        message: String,
        updates: &mpsc::Sender<TurnUpdate>,
    ) -> Result<TurnReport, SessionError> {
        let ctx = handle.begin_turn(message).await?;
        let mut report = TurnReport::default();

        let mut stream = self.generator.respond(&ctx.prompt);

        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    return self.fail_turn(handle, report, e.to_string(), updates).await;
                }
            };

            // Persist first. The client never sees an event that is not
            // already durable.
            let persisted = match &event {
                ResponseEvent::Content { content } => {
                    handle.record_content(content.clone()).await
                }
                ResponseEvent::ToolCall { tool_name, input } => {
                    handle.record_tool_call(tool_name.clone(), input.clone()).await
                }
                ResponseEvent::ToolResult { tool_name, output } => {
                    handle
                        .record_tool_result(tool_name.clone(), output.clone())
                        .await
                }
            };
            if let Err(e) = persisted {
                return self.fail_turn(handle, report, e.to_string(), updates).await;
            }
            report.persisted += 1;

            let update = match event {
                ResponseEvent::Content { content } => TurnUpdate::Content { content },
                ResponseEvent::ToolCall { tool_name, input } => {
                    TurnUpdate::ToolCall { tool_name, input }
                }
                ResponseEvent::ToolResult { tool_name, output } => {
                    TurnUpdate::ToolResult { tool_name, output }
                }
            };
            Self::deliver(updates, update, &mut report).await;
        }

        handle.finish_turn(TurnOutcome::Completed).await?;
        Self::deliver(updates, TurnUpdate::Completed, &mut report).await;

        debug!(
            session_id = %handle.id(),
            persisted = report.persisted,
            delivered = report.delivered,
            dropped = report.dropped,
            "Turn completed"
        );
        Ok(report)
    }

    /// Settle a failed turn: mark the session failed, then tell the
    /// client if it is still listening.
    async fn fail_turn(
        &self,
        handle: &SessionHandle,
        mut report: TurnReport,
        message: String,
        updates: &mpsc::Sender<TurnUpdate>,
    ) -> Result<TurnReport, SessionError> {
        warn!(session_id = %handle.id(), error = %message, "Turn failed");

        handle
            .finish_turn(TurnOutcome::Failed {
                message: message.clone(),
            })
            .await?;

        Self::deliver(
            updates,
            TurnUpdate::Failed {
                message: message.clone(),
            },
            &mut report,
        )
        .await;

        report.error = Some(message);
        Ok(report)
    }

    /// Offer one update to the client. A closed channel means the client
    /// disconnected; the turn carries on regardless.
    async fn deliver(
        updates: &mpsc::Sender<TurnUpdate>,
        update: TurnUpdate,
        report: &mut TurnReport,
    ) {
        if updates.send(update).await.is_ok() {
            report.delivered += 1;
        } else {
            report.dropped += 1;
        }
    }
}
