// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable storage contracts for conversation history and session metadata.
//!
//! The runtime depends only on the [`HistoryStore`] and [`MetadataStore`] traits.
//! Two implementations ship with the crate:
//!
//! - [`MemoryStore`] - in-process maps, for tests and ephemeral runtimes
//! - [`SqliteStore`] - SQLite-backed persistence

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{SqliteStore, SCHEMA_VERSION};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::session::SessionMetadata;
use crate::types::Message;

/// Per-session, append-only message log.
///
/// Implementations guarantee read-your-writes ordering per session id.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// All messages for a session, in append order.
    async fn get_history(&self, session_id: &str) -> Result<Vec<Message>, StorageError>;

    /// Append a message to a session's log.
    async fn save_message(&self, session_id: &str, message: &Message) -> Result<(), StorageError>;

    /// Remove every message of a session.
    async fn clear_history(&self, session_id: &str) -> Result<(), StorageError>;

    /// Remove a session's log entirely.
    async fn delete_history(&self, session_id: &str) -> Result<(), StorageError> {
        self.clear_history(session_id).await
    }

    /// Number of stored messages for a session.
    async fn message_count(&self, session_id: &str) -> Result<usize, StorageError> {
        Ok(self.get_history(session_id).await?.len())
    }
}

/// Persistence for session metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Insert or replace a session's metadata.
    async fn save_metadata(&self, metadata: &SessionMetadata) -> Result<(), StorageError>;

    /// Metadata for a session, `None` when unknown.
    async fn get_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>, StorageError>;

    /// Remove a session's metadata. Returns whether anything was removed.
    async fn delete_metadata(&self, session_id: &str) -> Result<bool, StorageError>;

    /// All persisted sessions, most recently active first.
    async fn list_metadata(&self) -> Result<Vec<SessionMetadata>, StorageError>;
}
