// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite-based session storage.

use std::path::{Path, PathBuf};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::session::types::micros_to_datetime;
use crate::session::SessionMetadata;
use crate::types::Message;

#[cfg(feature = "telemetry")]
use crate::telemetry::metrics::GLOBAL_METRICS;

use super::{HistoryStore, MetadataStore};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Session storage using SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database in the default location (`~/.colloquy/sessions/sessions.db`).
    pub fn open_default() -> Result<Self, StorageError> {
        let dir = get_sessions_directory()?;
        Self::open(&dir.join("sessions.db"))
    }

    /// Open or create a session database at a specific path.
    pub fn open(db_path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(db_path.to_path_buf()),
        })
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    /// Initialize the database schema.
    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                title TEXT,
                model TEXT,
                message_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_activity INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS session_messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_last_activity ON sessions(last_activity DESC);
            CREATE INDEX IF NOT EXISTS idx_messages_session_seq ON session_messages(session_id, seq);
            "#,
        )?;

        let current_version: Option<u32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
            .optional()?;

        match current_version {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(version) if version > SCHEMA_VERSION => {
                return Err(StorageError::Database(format!(
                    "database schema version {} is newer than supported version {}",
                    version, SCHEMA_VERSION
                )));
            }
            Some(_) => {}
        }

        Ok(())
    }

    /// Get the database path (`None` for in-memory databases).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl HistoryStore for SqliteStore {
    async fn get_history(&self, session_id: &str) -> Result<Vec<Message>, StorageError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT body FROM session_messages WHERE session_id = ? ORDER BY seq ASC",
        )?;

        let bodies = stmt
            .query_map(params![session_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let messages = bodies
            .iter()
            .map(|body| {
                serde_json::from_str::<Message>(body).map_err(|e| StorageError::Corrupted {
                    session_id: session_id.to_string(),
                    message: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("storage.sqlite.get_history", start.elapsed());

        Ok(messages)
    }

    async fn save_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let body = serde_json::to_string(message)?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO session_messages (session_id, role, body, created_at) VALUES (?, ?, ?, ?)",
            params![
                session_id,
                message.role().as_str(),
                body,
                chrono::Utc::now().timestamp_micros(),
            ],
        )?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("storage.sqlite.save_message", start.elapsed());

        Ok(())
    }

    async fn clear_history(&self, session_id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM session_messages WHERE session_id = ?",
            params![session_id],
        )?;
        Ok(())
    }

    async fn message_count(&self, session_id: &str) -> Result<usize, StorageError> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM session_messages WHERE session_id = ?",
            params![session_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

fn row_to_metadata(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionMetadata> {
    let message_count: i64 = row.get(3)?;
    Ok(SessionMetadata {
        id: row.get(0)?,
        title: row.get(1)?,
        model: row.get(2)?,
        message_count: message_count as u64,
        created_at: micros_to_datetime(row.get(4)?),
        last_activity: micros_to_datetime(row.get(5)?),
    })
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn save_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO sessions (id, title, model, message_count, created_at, last_activity)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                model = excluded.model,
                message_count = excluded.message_count,
                last_activity = excluded.last_activity
            "#,
            params![
                metadata.id,
                metadata.title,
                metadata.model,
                metadata.message_count as i64,
                metadata.created_at.timestamp_micros(),
                metadata.last_activity.timestamp_micros(),
            ],
        )?;
        Ok(())
    }

    async fn get_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError> {
        let conn = self.conn.lock().await;
        let metadata = conn
            .query_row(
                r#"
                SELECT id, title, model, message_count, created_at, last_activity
                FROM sessions WHERE id = ?
                "#,
                params![session_id],
                row_to_metadata,
            )
            .optional()?;
        Ok(metadata)
    }

    async fn delete_metadata(&self, session_id: &str) -> Result<bool, StorageError> {
        let conn = self.conn.lock().await;
        let rows = conn.execute("DELETE FROM sessions WHERE id = ?", params![session_id])?;
        Ok(rows > 0)
    }

    async fn list_metadata(&self) -> Result<Vec<SessionMetadata>, StorageError> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, title, model, message_count, created_at, last_activity
            FROM sessions
            ORDER BY last_activity DESC
            "#,
        )?;
        let sessions = stmt
            .query_map([], row_to_metadata)?
            .collect::<Result<Vec<_>, _>>()?;

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("storage.sqlite.list_metadata", start.elapsed());

        Ok(sessions)
    }
}

/// Get the default sessions directory.
fn get_sessions_directory() -> Result<PathBuf, StorageError> {
    let home = dirs::home_dir()
        .ok_or_else(|| StorageError::Io("Could not determine home directory".to_string()))?;

    Ok(home.join(".colloquy").join("sessions"))
}
