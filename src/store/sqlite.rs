//! SQLite-backed session store.
//!
//! Schema is created with idempotent DDL on startup. Messages and events
//! carry a foreign key to the owning session row with `ON DELETE CASCADE`;
//! JSON payloads are stored as TEXT.

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
    SqliteSynchronous,
};

use crate::api::SessionStatus;

use super::error::{StoreError, StoreResult};
use super::{
    EventRecord, MessageRecord, NewEvent, NewMessage, NewSession, SessionHistory, SessionPage,
    SessionRecord, SessionStore,
};

/// Maximum page size for session listings.
const MAX_PAGE_SIZE: u32 = 100;

pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    /// Open (or create) a database file and run the schema DDL.
    pub async fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// In-memory database for tests.
    ///
    /// Single connection: each in-memory connection is its own database.
    pub async fn new_in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL UNIQUE,
                title TEXT,
                system_prompt TEXT,
                model_name TEXT,
                tool_version TEXT,
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL,
                updated_at TEXT,
                completed_at TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                message_type TEXT NOT NULL DEFAULT 'text',
                metadata TEXT,
                timestamp TEXT NOT NULL,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id INTEGER NOT NULL,
                event_type TEXT NOT NULL,
                tool_name TEXT,
                input_data TEXT,
                output_data TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error_message TEXT,
                timestamp TEXT NOT NULL,
                duration_ms INTEGER,
                FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Placeholder for future authentication. Nothing writes to it yet.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_events_session ON events(session_id, timestamp)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_created ON sessions(created_at)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn get_session_by_row(&self, session_row: i64) -> StoreResult<SessionRecord> {
        let row = sqlx::query("SELECT * FROM sessions WHERE id = ?1")
            .bind(session_row)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("row {session_row}")))?;

        session_from_row(&row)
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, new: NewSession) -> StoreResult<SessionRecord> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (session_id, title, system_prompt, model_name, tool_version, status, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 'active', ?6)
            "#,
        )
        .bind(&new.session_id)
        .bind(&new.title)
        .bind(&new.system_prompt)
        .bind(&new.model_name)
        .bind(&new.tool_version)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_session_by_row(result.last_insert_rowid()).await
    }

    async fn get_session(&self, session_id: &str) -> StoreResult<SessionRecord> {
        let row = sqlx::query("SELECT * FROM sessions WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(session_id.to_string()))?;

        session_from_row(&row)
    }

    async fn list_sessions(&self, page: u32, size: u32) -> StoreResult<SessionPage> {
        let page = page.max(1);
        let size = size.clamp(1, MAX_PAGE_SIZE);
        let offset = i64::from(page - 1) * i64::from(size);

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT * FROM sessions ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
        )
        .bind(i64::from(size))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let sessions = rows
            .iter()
            .map(session_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(SessionPage { sessions, total })
    }

    async fn append_message(
        &self,
        session_row: i64,
        message: NewMessage,
    ) -> StoreResult<MessageRecord> {
        let now = Utc::now();
        let metadata = message
            .metadata
            .as_ref()
            .map(serde_json::Value::to_string);

        let result = sqlx::query(
            r#"
            INSERT INTO messages (session_id, role, content, message_type, metadata, timestamp)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(session_row)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.message_type.as_str())
        .bind(metadata)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(MessageRecord {
            id: result.last_insert_rowid(),
            session_id: session_row,
            role: message.role,
            content: message.content,
            message_type: message.message_type,
            metadata: message.metadata,
            timestamp: now,
        })
    }

    async fn append_event(&self, session_row: i64, event: NewEvent) -> StoreResult<EventRecord> {
        let now = Utc::now();
        let input = event.input_data.as_ref().map(serde_json::Value::to_string);
        let output = event.output_data.as_ref().map(serde_json::Value::to_string);

        let result = sqlx::query(
            r#"
            INSERT INTO events (session_id, event_type, tool_name, input_data, output_data, status, error_message, timestamp, duration_ms)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(session_row)
        .bind(&event.event_type)
        .bind(&event.tool_name)
        .bind(input)
        .bind(output)
        .bind(event.status.as_str())
        .bind(&event.error_message)
        .bind(now)
        .bind(event.duration_ms)
        .execute(&self.pool)
        .await?;

        Ok(EventRecord {
            id: result.last_insert_rowid(),
            session_id: session_row,
            event_type: event.event_type,
            tool_name: event.tool_name,
            input_data: event.input_data,
            output_data: event.output_data,
            status: event.status,
            error_message: event.error_message,
            timestamp: now,
            duration_ms: event.duration_ms,
        })
    }

    async fn update_status(
        &self,
        session_row: i64,
        status: SessionStatus,
        completed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM sessions WHERE id = ?1")
                .bind(session_row)
                .fetch_optional(&mut *tx)
                .await?;

        let current = current.ok_or_else(|| StoreError::NotFound(format!("row {session_row}")))?;
        let current: SessionStatus = current
            .parse()
            .map_err(|e: String| StoreError::corrupt("status", e))?;

        if !current.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                from: current,
                to: status,
            });
        }

        sqlx::query(
            r#"
            UPDATE sessions
            SET status = ?1, updated_at = ?2, completed_at = COALESCE(?3, completed_at)
            WHERE id = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(Utc::now())
        .bind(completed_at)
        .bind(session_row)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_history(&self, session_id: &str) -> StoreResult<SessionHistory> {
        let session = self.get_session(session_id).await?;

        let message_rows =
            sqlx::query("SELECT * FROM messages WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC")
                .bind(session.id)
                .fetch_all(&self.pool)
                .await?;
        let messages = message_rows
            .iter()
            .map(message_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        let event_rows =
            sqlx::query("SELECT * FROM events WHERE session_id = ?1 ORDER BY timestamp ASC, id ASC")
                .bind(session.id)
                .fetch_all(&self.pool)
                .await?;
        let events = event_rows
            .iter()
            .map(event_from_row)
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(SessionHistory {
            session,
            messages,
            events,
        })
    }

    async fn delete_session(&self, session_id: &str) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM sessions WHERE session_id = ?1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(session_id.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

fn session_from_row(row: &SqliteRow) -> StoreResult<SessionRecord> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse()
        .map_err(|e: String| StoreError::corrupt("status", e))?;

    Ok(SessionRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        title: row.try_get("title")?,
        system_prompt: row.try_get("system_prompt")?,
        model_name: row.try_get("model_name")?,
        tool_version: row.try_get("tool_version")?,
        status,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn message_from_row(row: &SqliteRow) -> StoreResult<MessageRecord> {
    let role: String = row.try_get("role")?;
    let role = role
        .parse()
        .map_err(|e: String| StoreError::corrupt("role", e))?;

    let message_type: String = row.try_get("message_type")?;
    let message_type = message_type
        .parse()
        .map_err(|e: String| StoreError::corrupt("message_type", e))?;

    Ok(MessageRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        role,
        content: row.try_get("content")?,
        message_type,
        metadata: parse_json_column(row, "metadata")?,
        timestamp: row.try_get("timestamp")?,
    })
}

fn event_from_row(row: &SqliteRow) -> StoreResult<EventRecord> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse()
        .map_err(|e: String| StoreError::corrupt("status", e))?;

    Ok(EventRecord {
        id: row.try_get("id")?,
        session_id: row.try_get("session_id")?,
        event_type: row.try_get("event_type")?,
        tool_name: row.try_get("tool_name")?,
        input_data: parse_json_column(row, "input_data")?,
        output_data: parse_json_column(row, "output_data")?,
        status,
        error_message: row.try_get("error_message")?,
        timestamp: row.try_get("timestamp")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}

fn parse_json_column(
    row: &SqliteRow,
    column: &'static str,
) -> StoreResult<Option<serde_json::Value>> {
    let raw: Option<String> = row.try_get(column)?;
    raw.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| StoreError::corrupt(column, e.to_string()))
}
