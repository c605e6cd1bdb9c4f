//! Session lifecycle and turn execution.
//!
//! Each live session is a dedicated actor task; the registry owns the
//! actors and the turn runner drives generation through them.

mod actor;
mod actor_types;
mod handle;
mod registry;
mod turn;

pub use actor_types::{SessionError, SessionView, TurnContext, TurnOutcome};
pub use handle::SessionHandle;
pub use registry::SessionRegistry;
pub use turn::{TurnReport, TurnRunner, TurnUpdate};

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use futures::stream;

    use crate::api::{CreateSessionRequest, MessageRole, SessionStatus};
    use crate::config::AgentConfig;
    use crate::generate::{
        EventStream, GenerateError, ResponseEvent, ResponseGenerator, ScriptedGenerator,
        TurnPrompt,
    };
    use crate::store::{SessionStore, SqliteSessionStore};

    use super::*;

    /// Emits a tool call followed by its result.
    struct ToolEchoGenerator;

    impl ResponseGenerator for ToolEchoGenerator {
        fn respond(&self, _prompt: &TurnPrompt) -> EventStream {
            Box::pin(stream::iter(vec![
                Ok(ResponseEvent::ToolCall {
                    tool_name: "bash".to_string(),
                    input: "uname -a".to_string(),
                }),
                Ok(ResponseEvent::ToolResult {
                    tool_name: "bash".to_string(),
                    output: "Linux".to_string(),
                }),
            ]))
        }
    }

    /// Yields one content event, then fails.
    struct FailingGenerator;

    impl ResponseGenerator for FailingGenerator {
        fn respond(&self, _prompt: &TurnPrompt) -> EventStream {
            Box::pin(stream::iter(vec![
                Ok(ResponseEvent::Content {
                    content: "partial answer".to_string(),
                }),
                Err(GenerateError::Failed("backend went away".to_string())),
            ]))
        }
    }

    async fn setup() -> (SessionRegistry, TurnRunner, Arc<SqliteSessionStore>) {
        let store = Arc::new(SqliteSessionStore::new_in_memory().await.unwrap());
        let registry = SessionRegistry::new(store.clone(), AgentConfig::default());
        let runner = TurnRunner::new(Arc::new(ScriptedGenerator::new(Duration::ZERO)));
        (registry, runner, store)
    }

    fn request() -> CreateSessionRequest {
        CreateSessionRequest {
            title: Some("test".to_string()),
            system_prompt: None,
            model_name: None,
            tool_version: None,
        }
    }

    #[tokio::test]
    async fn turn_persists_then_delivers_and_completes() {
        let (registry, runner, store) = setup().await;
        let (handle, record) = registry.create(request()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        let report = runner
            .run_turn(&handle, "what's the weather in Dubai?".to_string(), &tx)
            .await
            .unwrap();
        drop(tx);

        // 2 content events + 3 tool calls, plus the completed marker.
        assert_eq!(report.persisted, 5);
        assert_eq!(report.delivered, 6);
        assert_eq!(report.dropped, 0);
        assert!(report.error.is_none());

        let mut updates = Vec::new();
        while let Some(u) = rx.recv().await {
            updates.push(u);
        }
        assert!(matches!(updates.last(), Some(TurnUpdate::Completed)));

        let history = store.get_history(&record.session_id).await.unwrap();
        assert_eq!(history.session.status, SessionStatus::Completed);
        assert!(history.session.completed_at.is_some());
        // user message + 2 assistant messages + completion marker
        assert_eq!(history.messages.len(), 4);
        assert_eq!(history.events.len(), 3);
        assert_eq!(history.messages[3].content, "Demo response completed");

        // Merged by timestamp, the persisted rows preserve emission order.
        let mut merged: Vec<(chrono::DateTime<chrono::Utc>, &str)> = history
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .map(|m| (m.timestamp, "content"))
            .chain(history.events.iter().map(|e| (e.timestamp, e.event_type.as_str())))
            .collect();
        merged.sort_by_key(|(ts, _)| *ts);
        let order: Vec<&str> = merged.into_iter().map(|(_, label)| label).collect();
        assert_eq!(
            order,
            vec!["content", "tool_call", "tool_call", "tool_call", "content", "content"]
        );
    }

    #[tokio::test]
    async fn concurrent_turn_is_rejected_as_busy() {
        let (registry, runner, _store) = setup().await;
        let (handle, _record) = registry.create(request()).await.unwrap();

        // Claim the turn slot directly, as a competing turn would.
        let _ctx = handle.begin_turn("first".to_string()).await.unwrap();

        let (tx, _rx) = mpsc::channel(16);
        let err = runner
            .run_turn(&handle, "second".to_string(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Busy));
    }

    #[tokio::test]
    async fn turn_after_completion_is_rejected() {
        let (registry, runner, store) = setup().await;
        let (handle, record) = registry.create(request()).await.unwrap();

        let (tx, mut rx) = mpsc::channel(16);
        runner
            .run_turn(&handle, "hello".to_string(), &tx)
            .await
            .unwrap();
        while rx.try_recv().is_ok() {}
        let before = store.get_history(&record.session_id).await.unwrap();

        let err = runner
            .run_turn(&handle, "again".to_string(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::NotActive {
                status: SessionStatus::Completed
            }
        ));

        // The rejected turn writes nothing.
        let after = store.get_history(&record.session_id).await.unwrap();
        assert_eq!(after.messages.len(), before.messages.len());
        assert_eq!(after.events.len(), before.events.len());
    }

    #[tokio::test]
    async fn client_gone_does_not_abort_persistence() {
        let (registry, runner, store) = setup().await;
        let (handle, record) = registry.create(request()).await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let report = runner
            .run_turn(&handle, "weather in san francisco".to_string(), &tx)
            .await
            .unwrap();

        assert_eq!(report.persisted, 5);
        assert_eq!(report.delivered, 0);
        assert_eq!(report.dropped, 6);

        let history = store.get_history(&record.session_id).await.unwrap();
        assert_eq!(history.session.status, SessionStatus::Completed);
        assert_eq!(history.messages.len(), 4);
    }

    #[tokio::test]
    async fn completed_turn_persists_the_completion_marker() {
        let (registry, runner, store) = setup().await;
        let (handle, record) = registry.create(request()).await.unwrap();

        let (tx, _rx) = mpsc::channel(16);
        runner
            .run_turn(&handle, "hello".to_string(), &tx)
            .await
            .unwrap();

        let history = store.get_history(&record.session_id).await.unwrap();
        assert_eq!(history.session.status, SessionStatus::Completed);

        let rows: Vec<(MessageRole, &str)> = history
            .messages
            .iter()
            .map(|m| (m.role, m.content.as_str()))
            .collect();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0], (MessageRole::User, "hello"));
        assert_eq!(rows[1].0, MessageRole::Assistant);
        assert_eq!(rows[2], (MessageRole::Assistant, "Demo response completed"));
    }

    #[tokio::test]
    async fn tool_results_are_persisted_as_events() {
        let (registry, _runner, store) = setup().await;
        let (handle, record) = registry.create(request()).await.unwrap();

        let runner = TurnRunner::new(Arc::new(ToolEchoGenerator));
        let (tx, mut rx) = mpsc::channel(16);
        let report = runner
            .run_turn(&handle, "run uname".to_string(), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(report.persisted, 2);
        let mut updates = Vec::new();
        while let Some(u) = rx.recv().await {
            updates.push(u);
        }
        assert!(matches!(
            updates[1],
            TurnUpdate::ToolResult { ref tool_name, ref output }
                if tool_name == "bash" && output == "Linux"
        ));

        let history = store.get_history(&record.session_id).await.unwrap();
        assert_eq!(history.events.len(), 2);
        assert_eq!(history.events[0].event_type, "tool_call");
        assert_eq!(history.events[1].event_type, "tool_result");
        assert_eq!(history.events[1].tool_name.as_deref(), Some("bash"));
        assert_eq!(
            history.events[1].output_data,
            Some(serde_json::json!({ "output": "Linux" }))
        );
    }

    #[tokio::test]
    async fn midstream_failure_keeps_prior_events_and_fails_the_session() {
        let (registry, _runner, store) = setup().await;
        let (handle, record) = registry.create(request()).await.unwrap();

        let runner = TurnRunner::new(Arc::new(FailingGenerator));
        let (tx, mut rx) = mpsc::channel(16);
        let report = runner
            .run_turn(&handle, "hello".to_string(), &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(report.persisted, 1);
        assert!(report.error.as_deref().unwrap().contains("backend went away"));

        let mut updates = Vec::new();
        while let Some(u) = rx.recv().await {
            updates.push(u);
        }
        assert!(matches!(updates.last(), Some(TurnUpdate::Failed { .. })));

        // The user message and the partial answer survive the failure.
        let history = store.get_history(&record.session_id).await.unwrap();
        assert_eq!(history.session.status, SessionStatus::Failed);
        assert_eq!(history.messages.len(), 2);
        assert_eq!(history.messages[1].content, "partial answer");
    }

    #[tokio::test]
    async fn close_is_idempotent_for_existing_sessions() {
        let (registry, _runner, store) = setup().await;
        let (_handle, record) = registry.create(request()).await.unwrap();

        registry.close(&record.session_id).await.unwrap();
        let fetched = store.get_session(&record.session_id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Cancelled);

        // Second close reloads the cancelled session and no-ops.
        registry.close(&record.session_id).await.unwrap();
        let fetched = store.get_session(&record.session_id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Cancelled);
    }

    #[tokio::test]
    async fn close_unknown_session_is_not_found() {
        let (registry, _runner, _store) = setup().await;

        let err = registry.close("session_missing").await.unwrap_err();
        assert!(matches!(err, SessionError::NotFound(_)));
    }

    #[tokio::test]
    async fn get_or_load_revives_a_stored_session() {
        let (registry, _runner, store) = setup().await;
        let (_handle, record) = registry.create(request()).await.unwrap();

        // Forget the live actor, keeping only the stored row.
        registry.remove(&record.session_id);
        assert!(registry.get(&record.session_id).is_none());

        let handle = registry.get_or_load(&record.session_id).await.unwrap();
        let view = handle.view().await.unwrap();
        assert_eq!(view.session_id, record.session_id);
        assert_eq!(view.status, SessionStatus::Active);
        assert!(!view.generating);

        drop(store);
    }
}
